//! Stream consumer for Redis operations
//!
//! Reads batches from a Redis stream through a consumer group. Entries stay
//! pending until acknowledged. [`StreamConsumer::claim_abandoned`] moves
//! entries that sat pending too long, under any consumer name, to this one.

use crate::config::ConsumerConfig;
use crate::error::StreamError;
use crate::event::StreamEvent;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type ReadReply = Vec<(String, Vec<(String, Vec<(String, String)>)>)>;
type EntriesReply = Vec<(String, Vec<(String, String)>)>;
/// `XPENDING` extended form: id, owner, idle ms, delivery count.
type PendingReply = Vec<(String, String, u64, u64)>;

/// Stream consumer for Redis operations
pub struct StreamConsumer {
    redis: Arc<ConnectionManager>,
    config: ConsumerConfig,
}

impl StreamConsumer {
    /// Create a new StreamConsumer
    pub fn new(redis: ConnectionManager, config: ConsumerConfig) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
        }
    }

    /// Get the stream name
    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    /// Get the consumer group
    pub fn consumer_group(&self) -> &str {
        &self.config.consumer_group
    }

    /// Initialize the consumer group if it doesn't exist
    pub async fn ensure_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = (*self.redis).clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
            }
            Err(e) => return Err(StreamError::Redis(e)),
        }

        Ok(())
    }

    /// Read entries delivered to this consumer but never acknowledged
    pub async fn read_pending(&self) -> Result<Vec<StreamEvent>, StreamError> {
        let mut conn = (*self.redis).clone();

        let reply: Option<ReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg("COUNT")
            .arg(self.config.batch_size)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg("0")
            .query_async(&mut conn)
            .await?;

        Ok(Self::parse_reply(reply))
    }

    /// Read new entries, blocking up to the configured timeout
    pub async fn read_new(&self) -> Result<Vec<StreamEvent>, StreamError> {
        let mut conn = (*self.redis).clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id);

        if let Some(timeout) = self.config.blocking_timeout_ms {
            cmd.arg("BLOCK").arg(timeout);
        }

        cmd.arg("COUNT")
            .arg(self.config.batch_size)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">");

        // Nil reply when BLOCK times out
        let reply: Option<ReadReply> = cmd.query_async(&mut conn).await?;

        Ok(Self::parse_reply(reply))
    }

    /// Claim up to `batch_size` entries idle for at least `min_idle`
    ///
    /// Covers entries owned by consumers that crashed or restarted under a
    /// new name as well as this consumer's own. Claiming restarts an entry's
    /// idle time, so repeated calls drain the backlog and then return empty.
    pub async fn claim_abandoned(&self, min_idle: Duration) -> Result<Vec<StreamEvent>, StreamError> {
        let mut conn = (*self.redis).clone();
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: PendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.config.batch_size)
            .query_async(&mut conn)
            .await?;

        if pending.is_empty() {
            return Ok(vec![]);
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_id)
            .arg(min_idle_ms);
        for (id, _, _, _) in &pending {
            cmd.arg(id);
        }

        let claimed: EntriesReply = cmd.query_async(&mut conn).await?;

        let from_others = pending
            .iter()
            .filter(|(_, owner, _, _)| *owner != self.config.consumer_id)
            .count();
        if from_others > 0 {
            warn!(
                stream = %self.config.stream_name,
                count = from_others,
                "Claimed entries abandoned by other consumers"
            );
        }
        debug!(stream = %self.config.stream_name, count = claimed.len(), "Claimed idle entries");

        Ok(claimed
            .into_iter()
            .map(|(stream_id, fields)| StreamEvent::new(stream_id, fields))
            .collect())
    }

    /// Acknowledge entries
    pub async fn ack(&self, stream_ids: &[String]) -> Result<i64, StreamError> {
        if stream_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = (*self.redis).clone();
        let acked: i64 = conn
            .xack(&self.config.stream_name, &self.config.consumer_group, stream_ids)
            .await?;

        debug!(
            stream = %self.config.stream_name,
            count = acked,
            "Acknowledged entries"
        );
        Ok(acked)
    }

    fn parse_reply(reply: Option<ReadReply>) -> Vec<StreamEvent> {
        reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_stream, entries)| entries)
            .map(|(stream_id, fields)| StreamEvent::new(stream_id, fields))
            .collect()
    }
}

impl Clone for StreamConsumer {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_flattens_streams() {
        let reply: ReadReply = vec![(
            "users:changes".to_string(),
            vec![
                ("1-0".to_string(), vec![("entry".to_string(), "{}".to_string())]),
                ("2-0".to_string(), vec![("entry".to_string(), "{}".to_string())]),
            ],
        )];

        let events = StreamConsumer::parse_reply(Some(reply));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream_id, "1-0");
        assert_eq!(events[1].stream_id, "2-0");
    }

    #[test]
    fn test_parse_reply_nil_is_empty() {
        assert!(StreamConsumer::parse_reply(None).is_empty());
    }
}
