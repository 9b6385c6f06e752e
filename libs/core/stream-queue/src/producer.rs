//! Stream producer for job enqueuing
//!
//! Redis Streams implementation of [`BatchQueue`]. Every entry becomes one
//! `XADD` carrying the job body and its caller-assigned id.
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_queue::{BatchEntry, BatchQueue, StreamProducer};
//!
//! let producer = StreamProducer::from_stream_def::<WelcomeEmailStream>(redis);
//! let outcomes = producer.submit_batch(&[BatchEntry::new("u1-abc", body)]).await?;
//! ```

use crate::batch::{validate_batch, BatchEntry, BatchQueue, EntryFailure, EntryOutcome};
use crate::error::StreamError;
use crate::metrics::QueueMetrics;
use crate::registry::{MessageKey, StreamDef};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Redis stream producer with a bounded batch size.
pub struct StreamProducer {
    redis: Arc<ConnectionManager>,
    stream_name: String,
    max_length: i64,
    max_batch_size: usize,
    metrics: QueueMetrics,
}

impl StreamProducer {
    /// Create a new StreamProducer for a specific stream.
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        Self {
            redis: Arc::new(redis),
            metrics: QueueMetrics::new(stream_name.clone()),
            stream_name,
            max_length: 100_000,
            max_batch_size: 10,
        }
    }

    /// Create a producer from a `StreamDef` implementation.
    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        Self::new(redis, S::STREAM_NAME)
            .with_max_length(S::MAX_LENGTH)
            .with_max_batch_size(S::MAX_BATCH_ENTRIES)
    }

    /// Set the maximum stream length (MAXLEN ~).
    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set the maximum entries per `submit_batch` call (at least 1).
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Get the stream name.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Get the current stream length.
    pub async fn stream_length(&self) -> Result<i64, StreamError> {
        let mut conn = (*self.redis).clone();
        let len: i64 = conn.xlen(&self.stream_name).await?;
        Ok(len)
    }

    async fn add_entry(
        &self,
        conn: &mut ConnectionManager,
        entry: &BatchEntry,
    ) -> Result<String, StreamError> {
        let stream_id: String = redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(MessageKey::JobId.as_ref())
            .arg(&entry.id)
            .arg(MessageKey::Job.as_ref())
            .arg(&entry.body)
            .query_async(conn)
            .await?;
        Ok(stream_id)
    }
}

#[async_trait]
impl BatchQueue for StreamProducer {
    async fn submit_batch(&self, entries: &[BatchEntry]) -> Result<Vec<EntryOutcome>, StreamError> {
        validate_batch(entries, self.max_batch_size)?;

        let started = Instant::now();
        let mut conn = (*self.redis).clone();
        let mut outcomes = Vec::with_capacity(entries.len());

        for entry in entries {
            match self.add_entry(&mut conn, entry).await {
                Ok(stream_id) => outcomes.push(EntryOutcome::accepted(&entry.id, stream_id)),
                Err(e) => {
                    warn!(
                        stream = %self.stream_name,
                        entry_id = %entry.id,
                        error = %e,
                        "Failed to enqueue entry"
                    );
                    outcomes.push(EntryOutcome::failed(&entry.id, EntryFailure::from(&e)));
                }
            }
        }

        let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
        self.metrics
            .batch_submitted(accepted, outcomes.len() - accepted, started.elapsed());

        debug!(
            stream = %self.stream_name,
            accepted,
            failed = outcomes.len() - accepted,
            "Submitted batch"
        );

        Ok(outcomes)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn name(&self) -> &str {
        &self.stream_name
    }
}

impl Clone for StreamProducer {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            stream_name: self.stream_name.clone(),
            max_length: self.max_length,
            max_batch_size: self.max_batch_size,
            metrics: self.metrics.clone(),
        }
    }
}
