use crate::error::MonitorError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 10_000;
pub const DEFAULT_HEARTBEAT_MS: u64 = 4_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const MAX_CHART_POINTS: usize = 100;
pub const MIN_CONNECT_TIMEOUT_MS: u64 = 50;
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 60_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 50;
pub const MAX_RECONNECT_DELAY_MS: u64 = 300_000;
pub const MAX_HEARTBEAT_MS: u64 = 60_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 50;
pub const MAX_POLL_INTERVAL_MS: u64 = 300_000;

pub const WS_URL_ENV: &str = "LOADING_WS_URL";
pub const API_BASE_URL_ENV: &str = "LOADING_API_BASE_URL";

/// Alarm payloads are owned by the external alarm service and forwarded
/// verbatim to consumers.
pub type AlarmEvent = simd_json::owned::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    #[serde(rename = "LOADING")]
    Loading,
    #[serde(rename = "TARA_REGISTERED")]
    TaraRegistered,
    #[serde(rename = "FINALIZED")]
    Finalized,
}

impl OrderStatus {
    /// Orders still worth tracking in the aggregator; finalized orders are
    /// pruned on the next cleanup pass.
    pub fn is_loading_eligible(self) -> bool {
        matches!(self, Self::Loading | Self::TaraRegistered)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: i64,
    pub number: String,
    pub status: OrderStatus,
    pub truck: String,
    pub preset: f64,
    #[serde(default)]
    pub accumulated: f64,
    #[serde(default)]
    pub last_temp: f64,
    #[serde(default)]
    pub density: f64,
    #[serde(default)]
    pub flow: f64,
    #[serde(default)]
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureAlarm {
    pub id: i64,
    /// true while the alarm is pending, false once accepted.
    pub alarm_state: bool,
    pub current_temperature: f64,
    pub threshold_temperature: f64,
    pub event_date_time: String,
    pub order_number: String,
}

/// Per-order telemetry as published on `/topic/detail/{orderNumber}`.
/// Numeric fields may be absent, null, or stringified on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailWire {
    #[serde(default, deserialize_with = "lossy_timestamp_ms")]
    pub timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lossy_f64")]
    pub accumulated_mass: f64,
    #[serde(default, deserialize_with = "lossy_f64")]
    pub caudal: f64,
    #[serde(default, deserialize_with = "lossy_f64")]
    pub temperature: f64,
    #[serde(default, deserialize_with = "lossy_f64")]
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub timestamp_ms: i64,
    pub accumulated_mass: f64,
    pub caudal: f64,
    pub temperature: f64,
    pub density: f64,
}

impl TelemetrySample {
    pub fn from_wire(wire: OrderDetailWire, received_at_ms: i64) -> Self {
        Self {
            timestamp_ms: wire.timestamp.unwrap_or(received_at_ms),
            accumulated_mass: wire.accumulated_mass,
            caudal: wire.caudal,
            temperature: wire.temperature,
            density: wire.density,
        }
    }
}

pub fn parse_order_detail_payload(payload: &mut [u8]) -> Result<OrderDetailWire, MonitorError> {
    Ok(simd_json::serde::from_slice(payload)?)
}

pub fn parse_alarm_payload(payload: &mut [u8]) -> Result<AlarmEvent, MonitorError> {
    Ok(simd_json::to_owned_value(payload)?)
}

/// Formats a sample timestamp as the label charted on the x axis.
pub fn chart_label(timestamp_ms: i64) -> String {
    match Local.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(moment) | chrono::LocalResult::Ambiguous(moment, _) => {
            moment.format("%H:%M:%S").to_string()
        }
        chrono::LocalResult::None => match Utc.timestamp_millis_opt(timestamp_ms) {
            chrono::LocalResult::Single(moment) => moment.format("%H:%M:%S").to_string(),
            _ => String::new(),
        },
    }
}

fn lossy_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(value) if value.is_finite() => value,
        Raw::Number(_) => 0.0,
        Raw::Text(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .unwrap_or(0.0),
        Raw::Other(_) => 0.0,
    })
}

fn lossy_timestamp_ms<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Millis(millis) => Some(millis),
        Raw::Text(text) => parse_timestamp_text(&text),
        Raw::Other(_) => None,
    })
}

fn parse_timestamp_text(text: &str) -> Option<i64> {
    if let Ok(moment) = DateTime::parse_from_rfc3339(text) {
        return Some(moment.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorArgs {
    pub ws_url: Option<String>,
    pub api_base_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub ws_url: String,
    pub api_base_url: String,
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub heartbeat_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorArgs::default()
            .normalize()
            .unwrap_or_else(|_| Self {
                ws_url: DEFAULT_WS_URL.to_string(),
                api_base_url: DEFAULT_API_BASE_URL.to_string(),
                connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
                reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
                heartbeat_ms: DEFAULT_HEARTBEAT_MS,
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            })
    }
}

fn resolve_env_url(env_key: &str) -> Option<String> {
    std::env::var(env_key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl MonitorArgs {
    pub fn normalize(self) -> Result<MonitorConfig, MonitorError> {
        let ws_url = self
            .ws_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| resolve_env_url(WS_URL_ENV))
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());

        let api_base_url = self
            .api_base_url
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| resolve_env_url(API_BASE_URL_ENV))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
            return Err(MonitorError::InvalidArgument(
                "wsUrl must use the ws:// or wss:// scheme".to_string(),
            ));
        }

        let connect_timeout_ms = self.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        if !(MIN_CONNECT_TIMEOUT_MS..=MAX_CONNECT_TIMEOUT_MS).contains(&connect_timeout_ms) {
            return Err(MonitorError::InvalidArgument(format!(
                "connectTimeoutMs must be between {MIN_CONNECT_TIMEOUT_MS} and {MAX_CONNECT_TIMEOUT_MS}"
            )));
        }

        let reconnect_delay_ms = self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(MonitorError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        // 0 disables heartbeats entirely, per the wire protocol contract.
        let heartbeat_ms = self.heartbeat_ms.unwrap_or(DEFAULT_HEARTBEAT_MS);
        if heartbeat_ms > MAX_HEARTBEAT_MS {
            return Err(MonitorError::InvalidArgument(format!(
                "heartbeatMs must be at most {MAX_HEARTBEAT_MS}"
            )));
        }

        let poll_interval_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&poll_interval_ms) {
            return Err(MonitorError::InvalidArgument(format!(
                "pollIntervalMs must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
            )));
        }

        Ok(MonitorConfig {
            ws_url,
            api_base_url,
            connect_timeout_ms,
            reconnect_delay_ms,
            heartbeat_ms,
            poll_interval_ms,
        })
    }
}
