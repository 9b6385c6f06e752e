//! Dead Letter Queue (DLQ) management
//!
//! Work items that could not be stored or enqueued are written here instead of
//! being dropped, so they can be inspected and replayed later.

use crate::error::StreamError;
use crate::metrics::QueueMetrics;
use crate::registry::MessageKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

// Type alias for Redis stream entries
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

/// A failed work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Component that gave up on the item (e.g. "ingestion", "fan_out").
    pub source: String,
    /// Identifier of the item within its source (message id, job id, ...).
    pub key: String,
    /// The original payload, verbatim.
    pub payload: String,
    /// Error message that caused the failure.
    pub error: String,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// When the item was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        source: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            payload: payload.into(),
            error: error.into(),
            attempts: 1,
            failed_at: Utc::now(),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Durable destination for failed work items.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Persist a dead letter, returning its id in the sink.
    async fn record(&self, letter: DeadLetter) -> Result<String, StreamError>;
}

/// Redis-stream backed dead letter queue
pub struct DlqManager {
    redis: Arc<ConnectionManager>,
    dlq_stream: String,
    max_length: i64,
    metrics: QueueMetrics,
}

impl DlqManager {
    /// Create a new DlqManager
    pub fn new(redis: ConnectionManager, dlq_stream: impl Into<String>) -> Self {
        let dlq_stream = dlq_stream.into();
        Self {
            redis: Arc::new(redis),
            metrics: QueueMetrics::new(dlq_stream.clone()),
            dlq_stream,
            max_length: 10_000,
        }
    }

    /// Set the maximum DLQ length
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Get the DLQ stream name
    pub fn dlq_stream(&self) -> &str {
        &self.dlq_stream
    }

    /// Get DLQ statistics
    pub async fn stats(&self) -> Result<DlqStats, StreamError> {
        let mut conn = (*self.redis).clone();

        let len: i64 = conn.xlen(&self.dlq_stream).await?;

        let oldest: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let newest: StreamEntries = redis::cmd("XREVRANGE")
            .arg(&self.dlq_stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        Ok(DlqStats {
            stream_name: self.dlq_stream.clone(),
            length: len,
            oldest_entry_id: oldest.first().map(|(id, _)| id.clone()),
            newest_entry_id: newest.first().map(|(id, _)| id.clone()),
        })
    }

    /// List DLQ entries, oldest first, starting at `offset` (inclusive)
    pub async fn list(
        &self,
        count: usize,
        offset: Option<&str>,
    ) -> Result<Vec<(String, DeadLetter)>, StreamError> {
        let mut conn = (*self.redis).clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(&self.dlq_stream)
            .arg(offset.unwrap_or("-"))
            .arg("+")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut results = Vec::with_capacity(entries.len());
        for (id, fields) in entries {
            if let Some(data) = fields
                .iter()
                .find(|(k, _)| k == MessageKey::Data.as_ref())
                .map(|(_, v)| v)
            {
                results.push((id, serde_json::from_str::<DeadLetter>(data)?));
            }
        }

        Ok(results)
    }

    /// Delete an entry from the DLQ
    pub async fn delete(&self, dlq_id: &str) -> Result<bool, StreamError> {
        let mut conn = (*self.redis).clone();

        let deleted: i64 = conn.xdel(&self.dlq_stream, &[dlq_id]).await?;

        debug!(dlq_id = %dlq_id, "Deleted DLQ entry");

        Ok(deleted > 0)
    }

    /// Purge all entries from the DLQ
    pub async fn purge(&self) -> Result<i64, StreamError> {
        let mut conn = (*self.redis).clone();

        let len: i64 = conn.xlen(&self.dlq_stream).await?;

        if len > 0 {
            let _: i64 = redis::cmd("XTRIM")
                .arg(&self.dlq_stream)
                .arg("MAXLEN")
                .arg(0)
                .query_async(&mut conn)
                .await?;

            info!(count = len, stream = %self.dlq_stream, "Purged DLQ");
        }

        Ok(len)
    }
}

#[async_trait]
impl DeadLetterSink for DlqManager {
    async fn record(&self, letter: DeadLetter) -> Result<String, StreamError> {
        let data = serde_json::to_string(&letter)?;
        let mut conn = (*self.redis).clone();

        let dlq_id: String = redis::cmd("XADD")
            .arg(&self.dlq_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(MessageKey::Data.as_ref())
            .arg(&data)
            .query_async(&mut conn)
            .await?;

        self.metrics.dead_lettered(&letter.source);

        info!(
            source = %letter.source,
            key = %letter.key,
            dlq_id = %dlq_id,
            error = %letter.error,
            attempts = letter.attempts,
            "Moved item to DLQ"
        );

        Ok(dlq_id)
    }
}

impl Clone for DlqManager {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            dlq_stream: self.dlq_stream.clone(),
            max_length: self.max_length,
            metrics: self.metrics.clone(),
        }
    }
}

/// DLQ statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStats {
    pub stream_name: String,
    pub length: i64,
    pub oldest_entry_id: Option<String>,
    pub newest_entry_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_serialization() {
        let letter = DeadLetter::new(
            "fan_out",
            "user-1-AbCdEfGhIj",
            r#"{"to":"ana@example.com"}"#,
            "queue unavailable",
        )
        .with_attempts(3);

        let json = serde_json::to_string(&letter).unwrap();
        let deserialized: DeadLetter = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, letter);
        assert_eq!(deserialized.attempts, 3);
    }

    #[test]
    fn test_dead_letter_keeps_invalid_payload_verbatim() {
        let letter = DeadLetter::new("ingestion", "msg-1", "{not json", "expected value");
        let json = serde_json::to_string(&letter).unwrap();
        let deserialized: DeadLetter = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.payload, "{not json");
        assert_eq!(deserialized.attempts, 1);
    }
}
