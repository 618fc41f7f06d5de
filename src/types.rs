//! Core types for agency replay.

use crate::state::Value;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Width of the zero-padded string form of a log index.
pub const LOG_KEY_WIDTH: usize = 20;

/// Position of an entry in the agency log.
///
/// The agency stores indexes as 20-digit zero-padded strings so that string
/// order equals numeric order. Both forms are accepted when deserializing;
/// the string form is produced when serializing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogIndex(pub u64);

impl LogIndex {
    /// The first index of a log that was never compacted.
    pub const GENESIS: LogIndex = LogIndex(0);

    /// Parse the 20-digit key form (any run of ASCII digits is accepted).
    pub fn parse(key: &str) -> Option<Self> {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        key.parse().ok().map(LogIndex)
    }

    /// The zero-padded key form.
    pub fn key(&self) -> String {
        format!("{:0width$}", self.0, width = LOG_KEY_WIDTH)
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }
}

impl fmt::Debug for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogIndex({})", self.0)
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl Serialize for LogIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for LogIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LogIndexVisitor;

        impl<'de> Visitor<'de> for LogIndexVisitor {
            type Value = LogIndex;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a log key string or a non-negative integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<LogIndex, E> {
                Ok(LogIndex(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<LogIndex, E> {
                u64::try_from(v)
                    .map(LogIndex)
                    .map_err(|_| E::custom(format!("negative log index {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<LogIndex, E> {
                LogIndex::parse(v).ok_or_else(|| E::custom(format!("invalid log key `{}`", v)))
            }
        }

        deserializer.deserialize_any(LogIndexVisitor)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Timestamp(ms.saturating_mul(1000))
    }

    /// Parse an RFC 3339 instant such as `2021-03-24T10:12:13Z`.
    pub fn parse_rfc3339(s: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Timestamp(dt.timestamp_micros()))
    }

    /// This instant shifted by a (possibly fractional) number of seconds.
    pub fn plus_secs(self, secs: f64) -> Self {
        let delta = (secs * 1_000_000.0).round();
        if !delta.is_finite() {
            return self;
        }
        Timestamp(self.0.saturating_add(delta as i64))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0 / 1000)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimestampVisitor;

        impl<'de> Visitor<'de> for TimestampVisitor {
            type Value = Timestamp;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("milliseconds since the epoch or an RFC 3339 string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
                Ok(Timestamp::from_millis(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
                i64::try_from(v)
                    .map(Timestamp::from_millis)
                    .map_err(|_| E::custom("timestamp out of range"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Timestamp, E> {
                Ok(Timestamp((v * 1000.0).round() as i64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
                Timestamp::parse_rfc3339(v)
                    .ok_or_else(|| E::custom(format!("invalid timestamp `{}`", v)))
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// One consensus-committed batch of operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "_key")]
    pub index: LogIndex,

    #[serde(default)]
    pub timestamp: Option<Timestamp>,

    #[serde(default)]
    pub term: u64,

    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,

    /// Path string to operation descriptor. Descriptors stay unparsed until
    /// replay so that a malformed one fails with its log position attached.
    #[serde(default)]
    pub request: serde_json::Map<String, serde_json::Value>,
}

impl LogEntry {
    /// Create an entry with no timestamp, term or client.
    pub fn new(index: LogIndex, request: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            index,
            timestamp: None,
            term: 0,
            client_id: None,
            request,
        }
    }

    /// Build an entry from a JSON object of `path -> descriptor`.
    ///
    /// Anything other than an object yields an empty request.
    pub fn from_request(index: u64, request: serde_json::Value) -> Self {
        let request = match request {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self::new(LogIndex(index), request)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A trusted full state asserted at a specific index.
///
/// The snapshot at index `s` is the state after every entry with index
/// `<= s` has been applied.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub index: LogIndex,
    pub root: Value,
}

impl Snapshot {
    pub fn new(index: LogIndex, root: impl Into<Value>) -> Self {
        Self {
            index,
            root: root.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_key_roundtrip() {
        let idx = LogIndex(4711);
        assert_eq!(idx.key(), "00000000000000004711");
        assert_eq!(LogIndex::parse(&idx.key()), Some(idx));
        assert_eq!(LogIndex::parse(""), None);
        assert_eq!(LogIndex::parse("12a"), None);
        assert!(LogIndex::parse("00000000000000000000").unwrap().is_genesis());
    }

    #[test]
    fn test_timestamp_parsing() {
        let ts = Timestamp::parse_rfc3339("1970-01-01T00:00:01Z").unwrap();
        assert_eq!(ts, Timestamp(1_000_000));
        assert_eq!(ts.plus_secs(0.5), Timestamp(1_500_000));
        assert!(Timestamp::parse_rfc3339("yesterday").is_none());
    }

    #[test]
    fn test_log_entry_deserialize() {
        let entry: LogEntry = serde_json::from_value(json!({
            "_key": "00000000000000000042",
            "timestamp": 1500,
            "term": 3,
            "clientId": "abc",
            "request": {"/arango/Plan/Version": {"op": "increment"}}
        }))
        .unwrap();

        assert_eq!(entry.index, LogIndex(42));
        assert_eq!(entry.timestamp, Some(Timestamp(1_500_000)));
        assert_eq!(entry.term, 3);
        assert_eq!(entry.client_id.as_deref(), Some("abc"));
        assert_eq!(entry.request.len(), 1);
    }

    #[test]
    fn test_log_entry_string_timestamp() {
        let entry: LogEntry = serde_json::from_value(json!({
            "_key": 7,
            "timestamp": "1970-01-01T00:00:02Z",
            "request": {}
        }))
        .unwrap();
        assert_eq!(entry.index, LogIndex(7));
        assert_eq!(entry.timestamp, Some(Timestamp(2_000_000)));
    }
}
