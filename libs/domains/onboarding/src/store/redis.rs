//! Redis-backed store.
//!
//! Records are JSON strings under `{table}:{id}`. A Lua script performs the
//! `SET NX` and appends the INSERT change entry to the change stream in one
//! step, so a stored record always has its change entry.

use super::{PutOutcome, UserStore};
use crate::error::StoreError;
use crate::models::{ChangeEntry, UserRecord};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use stream_queue::MessageKey;
use tracing::debug;

const PUT_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[3], '*', ARGV[4], ARGV[2])
    return {1, ''}
end
return {0, redis.call('GET', KEYS[1])}
";

/// User store on Redis strings with a Redis stream change feed.
#[derive(Clone)]
pub struct RedisUserStore {
    redis: Arc<ConnectionManager>,
    table: String,
    changes_stream: String,
    max_changes: i64,
    script: Arc<redis::Script>,
}

impl RedisUserStore {
    pub fn new(
        redis: ConnectionManager,
        table: impl Into<String>,
        changes_stream: impl Into<String>,
    ) -> Self {
        Self {
            redis: Arc::new(redis),
            table: table.into(),
            changes_stream: changes_stream.into(),
            max_changes: 100_000,
            script: Arc::new(redis::Script::new(PUT_SCRIPT)),
        }
    }

    /// Cap the change stream length (`MAXLEN ~`).
    pub fn with_max_changes(mut self, max_changes: i64) -> Self {
        self.max_changes = max_changes;
        self
    }

    pub fn changes_stream(&self) -> &str {
        &self.changes_stream
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.table, id)
    }
}

#[async_trait]
impl UserStore for RedisUserStore {
    async fn put(&self, record: &UserRecord) -> Result<PutOutcome, StoreError> {
        let value = serde_json::to_string(record)?;
        let entry = serde_json::to_string(&ChangeEntry::insert(record))?;
        let mut conn = (*self.redis).clone();

        let (inserted, existing): (i64, String) = self
            .script
            .key(self.key(&record.id))
            .key(&self.changes_stream)
            .arg(&value)
            .arg(&entry)
            .arg(self.max_changes)
            .arg(MessageKey::Entry.as_ref())
            .invoke_async(&mut conn)
            .await?;

        if inserted == 1 {
            debug!(user_id = %record.id, stream = %self.changes_stream, "Stored user");
            return Ok(PutOutcome::Inserted);
        }

        Ok(PutOutcome::AlreadyExists(serde_json::from_str(&existing)?))
    }

    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = (*self.redis).clone();
        let value: Option<String> = conn.get(self.key(id)).await?;

        value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(StoreError::from)
    }
}

impl std::fmt::Debug for RedisUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisUserStore")
            .field("table", &self.table)
            .field("changes_stream", &self.changes_stream)
            .finish_non_exhaustive()
    }
}

