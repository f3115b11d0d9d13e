//! The envelope carried by every transport.
//!
//! A `Message` is a value object: once constructed it is never mutated, only
//! cloned and moved between tasks. Connections attach no transport-specific
//! state to it — everything a peer needs to interpret a message travels in
//! `metadata`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Reserved `type` tags consumed internally by the connection layer rather
/// than surfaced to the application.
pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";
pub const TYPE_CHAT: &str = "chat";
pub const TYPE_SIGNAL: &str = "signal";
pub const TYPE_DISCOVERY: &str = "discovery";

/// A scalar metadata value. Metadata is intentionally flat — no nested
/// objects or arrays — since its only job is to carry small advisory or
/// protocol fields (a ping timestamp, a room name) alongside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Nanosecond-precision point in time, stored as nanoseconds since the Unix
/// epoch. Every transport and the persistent log stamp messages with this
/// type; wire protocols that only need second resolution (the polling HTTP
/// API) convert at the boundary via [`Timestamp::as_unix_seconds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        Timestamp(nanos as i64)
    }

    pub fn from_unix_seconds(seconds: i64) -> Self {
        Timestamp(seconds.saturating_mul(1_000_000_000))
    }

    pub fn as_unix_seconds(self) -> i64 {
        self.0 / 1_000_000_000
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn elapsed_since(self, earlier: Timestamp) -> std::time::Duration {
        std::time::Duration::from_nanos(self.0.saturating_sub(earlier.0).max(0) as u64)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp(0)
    }
}

/// The envelope carried by every transport, regardless of connection family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(from: impl Into<String>, to: impl Into<String>, msg_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            msg_type: msg_type.into(),
            payload,
            metadata: HashMap::new(),
            timestamp: Timestamp::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_ping(&self) -> bool {
        self.msg_type == TYPE_PING
    }

    pub fn is_pong(&self) -> bool {
        self.msg_type == TYPE_PONG
    }

    /// Ping/pong probes carry their originating nanosecond timestamp under
    /// this metadata key so the receiver can echo it back unchanged.
    pub fn probe_timestamp(&self) -> Option<Timestamp> {
        match self.metadata.get("probe_ts")? {
            MetadataValue::Integer(n) => Some(Timestamp(*n)),
            _ => None,
        }
    }

    pub fn ping(from: impl Into<String>, to: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Message::new(from, to, TYPE_PING, Vec::new()).with_metadata("probe_ts", now.as_nanos())
    }

    pub fn pong_for(&self, from: impl Into<String>) -> Self {
        let echoed = self.probe_timestamp().unwrap_or_else(Timestamp::now);
        Message::new(from, self.from.clone(), TYPE_PONG, Vec::new()).with_metadata("probe_ts", echoed.as_nanos())
    }

    /// The `(from, timestamp, type, payload)` tuple the spec nominates as
    /// the deduplication key an application should use if it cares about
    /// duplicates introduced by failover or backup message pumps.
    pub fn dedup_key(&self) -> (String, Timestamp, String, Vec<u8>) {
        (self.from.clone(), self.timestamp, self.msg_type.clone(), self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_round_trip_preserves_timestamp() {
        let ping = Message::ping("a", "b");
        let ts = ping.probe_timestamp().unwrap();
        let pong = ping.pong_for("b");
        assert!(pong.is_pong());
        assert_eq!(pong.probe_timestamp().unwrap(), ts);
        assert_eq!(pong.to, "a");
    }

    #[test]
    fn timestamp_seconds_round_trip() {
        let ts = Timestamp::from_unix_seconds(1_700_000_000);
        assert_eq!(ts.as_unix_seconds(), 1_700_000_000);
    }

    #[test]
    fn message_is_never_mutated_by_builder_methods() {
        let base = Message::new("a", "b", TYPE_CHAT, b"hi".to_vec());
        let with_meta = base.clone().with_metadata("room", "lobby");
        assert!(base.metadata.is_empty());
        assert_eq!(with_meta.metadata.len(), 1);
    }
}
