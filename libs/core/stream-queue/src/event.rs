//! Stream event wrapper
//!
//! One entry read from a stream: its id, its fields, and the time Redis
//! assigned it.

use crate::error::StreamError;
use crate::registry::MessageKey;
use chrono::{DateTime, Utc};

/// A raw stream entry
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Redis stream entry ID (e.g., "1234567890123-0")
    pub stream_id: String,

    /// Field/value pairs in insertion order
    pub fields: Vec<(String, String)>,

    /// When the entry was added (parsed from stream ID)
    pub timestamp: DateTime<Utc>,
}

impl StreamEvent {
    /// Create a new StreamEvent
    pub fn new(stream_id: String, fields: Vec<(String, String)>) -> Self {
        let timestamp = Self::parse_timestamp(&stream_id);
        Self {
            stream_id,
            fields,
            timestamp,
        }
    }

    /// Parse timestamp from Redis stream ID
    ///
    /// Stream IDs are in format "timestamp_ms-sequence"
    fn parse_timestamp(stream_id: &str) -> DateTime<Utc> {
        stream_id
            .split('-')
            .next()
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// Look up a field value
    pub fn field(&self, key: MessageKey) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key.as_ref())
            .map(|(_, v)| v.as_str())
    }

    /// Look up a field value, failing when it is absent
    pub fn require(&self, key: MessageKey) -> Result<&str, StreamError> {
        self.field(key).ok_or_else(|| StreamError::MissingField {
            stream_id: self.stream_id.clone(),
            field: key.to_string(),
        })
    }

    /// Get age in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}
