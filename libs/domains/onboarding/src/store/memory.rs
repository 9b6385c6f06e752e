//! In-memory store with a local change log.

use super::{PutOutcome, UserStore};
use crate::error::StoreError;
use crate::models::{ChangeEntry, UserRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<String, UserRecord>,
    changes: Vec<ChangeEntry>,
    next_sequence: u64,
    // remaining writes to reject
    failing_writes: u32,
}

/// Store that keeps records and their change feed in memory.
///
/// Every successful insert appends an INSERT [`ChangeEntry`] with a
/// monotonically increasing sequence, drained by [`take_changes`](Self::take_changes).
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `times` writes with [`StoreError::Unavailable`].
    pub async fn fail_writes(&self, times: u32) {
        self.state.lock().await.failing_writes = times;
    }

    /// Drain the change feed accumulated so far.
    pub async fn take_changes(&self) -> Vec<ChangeEntry> {
        std::mem::take(&mut self.state.lock().await.changes)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn put(&self, record: &UserRecord) -> Result<PutOutcome, StoreError> {
        let mut state = self.state.lock().await;

        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StoreError::Unavailable("in-memory store rejected the write".to_string()));
        }

        if let Some(existing) = state.records.get(&record.id) {
            return Ok(PutOutcome::AlreadyExists(existing.clone()));
        }

        state.records.insert(record.id.clone(), record.clone());
        state.next_sequence += 1;
        let entry = ChangeEntry::insert(record).with_sequence(state.next_sequence.to_string());
        state.changes.push(entry);

        Ok(PutOutcome::Inserted)
    }

    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationType;

    #[tokio::test]
    async fn test_put_is_write_once() {
        let store = InMemoryUserStore::new();
        let record = UserRecord::new("u-1", "Ana", "ana@example.com");

        assert_eq!(store.put(&record).await.unwrap(), PutOutcome::Inserted);

        let other = UserRecord::new("u-1", "Bea", "bea@example.com");
        assert_eq!(store.put(&other).await.unwrap(), PutOutcome::AlreadyExists(record.clone()));
        assert_eq!(store.get("u-1").await.unwrap(), Some(record));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_change_feed_only_for_inserts() {
        let store = InMemoryUserStore::new();
        let ana = UserRecord::new("u-1", "Ana", "ana@example.com");
        let bea = UserRecord::new("u-2", "Bea", "bea@example.com");

        store.put(&ana).await.unwrap();
        store.put(&ana).await.unwrap();
        store.put(&bea).await.unwrap();

        let changes = store.take_changes().await;
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.operation_type == OperationType::Insert));
        assert_eq!(changes[0].sequence.as_deref(), Some("1"));
        assert_eq!(changes[1].user().unwrap(), bea);

        assert!(store.take_changes().await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = InMemoryUserStore::new();
        store.fail_writes(1).await;
        let record = UserRecord::new("u-1", "Ana", "ana@example.com");

        assert!(matches!(store.put(&record).await, Err(StoreError::Unavailable(_))));
        assert!(store.is_empty().await);
        assert_eq!(store.put(&record).await.unwrap(), PutOutcome::Inserted);
    }
}
