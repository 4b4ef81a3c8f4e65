use crate::monitoring::types::{
    parse_alarm_payload, parse_order_detail_payload, AlarmEvent, TelemetrySample,
};
use crate::monitoring::{now_unix_ms, ALARM_TOPIC, ORDER_DETAIL_TOPIC_PREFIX};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::warn;

/// Logical subscription key: one per order telemetry feed, plus the single
/// global alarm topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicKey {
    OrderDetail(String),
    Alarm,
}

impl TopicKey {
    pub fn order_detail(order_number: &str) -> Self {
        Self::OrderDetail(order_number.to_string())
    }

    pub fn destination(&self) -> String {
        match self {
            Self::OrderDetail(order_number) => {
                format!("{ORDER_DETAIL_TOPIC_PREFIX}{order_number}")
            }
            Self::Alarm => ALARM_TOPIC.to_string(),
        }
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        if destination == ALARM_TOPIC {
            return Some(Self::Alarm);
        }
        destination
            .strip_prefix(ORDER_DETAIL_TOPIC_PREFIX)
            .filter(|order_number| !order_number.is_empty())
            .map(|order_number| Self::OrderDetail(order_number.to_string()))
    }
}

/// Typed delivery path for one registered topic.
#[derive(Debug)]
pub enum TopicRoute {
    OrderDetail(mpsc::UnboundedSender<TelemetrySample>),
    Alarm(mpsc::UnboundedSender<AlarmEvent>),
}

#[derive(Debug)]
pub struct TopicEntry {
    pub generation: u64,
    pub stomp_id: String,
    pub route: TopicRoute,
}

/// At most one live entry per key. Registration retires any previous entry
/// for the same key; routing and mutation share the owning lock, so a
/// message in flight during a replacement is delivered to exactly one
/// generation of the subscription.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<TopicKey, TopicEntry>,
    next_generation: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Handled,
    /// No live entry for the destination; the message is dropped.
    NoRoute,
    /// The consumer went away; the entry was pruned and its broker-side
    /// subscription id is returned so the caller can release it.
    ConsumerGone(String),
}

impl SubscriptionRegistry {
    /// Registers `route` under `key`, replacing any live entry. Returns the
    /// new entry's (generation, stomp id) and the retired entry, if any.
    pub fn register(&mut self, key: TopicKey, route: TopicRoute) -> (u64, String, Option<TopicEntry>) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let stomp_id = format!("sub-{generation}");
        let replaced = self.entries.insert(
            key,
            TopicEntry {
                generation,
                stomp_id: stomp_id.clone(),
                route,
            },
        );
        (generation, stomp_id, replaced)
    }

    /// Removes the entry for `key` only if it still belongs to `generation`.
    /// An unsubscribe capability minted for a replaced subscription is inert.
    pub fn remove_if_generation(&mut self, key: &TopicKey, generation: u64) -> Option<TopicEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.generation == generation => self.entries.remove(key),
            _ => None,
        }
    }

    /// Parses `body` according to the destination's route and forwards it.
    /// Malformed payloads are logged and swallowed so one bad message cannot
    /// break the stream.
    pub fn route_message(&mut self, destination: &str, body: &str) -> DeliveryOutcome {
        let Some(key) = TopicKey::from_destination(destination) else {
            return DeliveryOutcome::NoRoute;
        };
        let Some(entry) = self.entries.get(&key) else {
            return DeliveryOutcome::NoRoute;
        };

        let mut payload = body.as_bytes().to_vec();
        let consumer_gone = match &entry.route {
            TopicRoute::OrderDetail(sender) => match parse_order_detail_payload(&mut payload) {
                Ok(wire) => sender
                    .send(TelemetrySample::from_wire(wire, now_unix_ms()))
                    .is_err(),
                Err(error) => {
                    warn!(destination, %error, "dropping malformed telemetry payload");
                    return DeliveryOutcome::Handled;
                }
            },
            TopicRoute::Alarm(sender) => match parse_alarm_payload(&mut payload) {
                Ok(alarm) => sender.send(alarm).is_err(),
                Err(error) => {
                    warn!(destination, %error, "dropping malformed alarm payload");
                    return DeliveryOutcome::Handled;
                }
            },
        };

        if consumer_gone {
            let entry = self
                .entries
                .remove(&key)
                .map(|entry| entry.stomp_id)
                .unwrap_or_default();
            return DeliveryOutcome::ConsumerGone(entry);
        }
        DeliveryOutcome::Handled
    }

    /// (key, stomp id) of every live entry, for replaying SUBSCRIBE frames
    /// after a reconnect.
    pub fn topics(&self) -> Vec<(TopicKey, String)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.stomp_id.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
