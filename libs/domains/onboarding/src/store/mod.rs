//! Durable user store.
//!
//! The store offers a write-once `put` and emits a change entry for every
//! insertion. Nothing here updates or deletes a record.

mod memory;
mod redis;

pub use memory::InMemoryUserStore;
pub use self::redis::RedisUserStore;

use crate::error::StoreError;
use crate::models::UserRecord;
use async_trait::async_trait;

/// Result of a write-once insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was written and an INSERT change was emitted.
    Inserted,
    /// A record already exists under the id; it was left untouched.
    AlreadyExists(UserRecord),
}

/// Write-once user persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert `record` unless its id is already taken.
    async fn put(&self, record: &UserRecord) -> Result<PutOutcome, StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError>;
}
