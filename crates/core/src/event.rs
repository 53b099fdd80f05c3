//! Telemetry events — the records the hub sequences and fans out.
//!
//! Events are partitioned by radio id. Cross-radio events (heartbeats,
//! the initial ready snapshot) live on the global partition, keyed by
//! the empty string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partition key for events that are not tied to a single radio.
pub const GLOBAL_PARTITION: &str = "";

/// The kinds of events carried on the telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// Initial inventory snapshot sent to every new subscriber.
    Ready,
    /// A radio's status changed (online / recovering / offline).
    State,
    /// Transmit power was changed.
    PowerChanged,
    /// Operating frequency or channel was changed.
    ChannelChanged,
    /// A radio reported a fault.
    Fault,
    /// Periodic liveness signal on the global partition.
    Heartbeat,
}

impl EventType {
    /// Wire name, as it appears on the `event:` line of the stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Ready => "ready",
            EventType::State => "state",
            EventType::PowerChanged => "powerChanged",
            EventType::ChannelChanged => "channelChanged",
            EventType::Fault => "fault",
            EventType::Heartbeat => "heartbeat",
        }
    }
}

/// A single telemetry event.
///
/// Within one partition, ids assigned by the hub are strictly
/// increasing starting at 1. An id of 0 means "not yet sequenced".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Owning partition; empty for global events.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub radio_id: String,

    pub data: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create an unsequenced event; the hub assigns the id on publish.
    pub fn new(event_type: EventType, radio_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: 0,
            event_type,
            radio_id: radio_id.into(),
            data,
            created_at: Utc::now(),
        }
    }

    /// The partition this event is sequenced on.
    pub fn partition(&self) -> &str {
        &self.radio_id
    }
}
