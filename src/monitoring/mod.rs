pub mod aggregator;
pub mod alarms;
pub mod backend;
pub mod connection;
pub mod polling;
pub mod registry;
pub mod stomp;
pub mod types;

pub const ORDER_DETAIL_TOPIC_PREFIX: &str = "/topic/detail/";
pub const ALARM_TOPIC: &str = "/topic/alarm";

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
