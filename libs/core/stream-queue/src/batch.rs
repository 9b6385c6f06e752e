//! Batch-submit contract for outbound queues.
//!
//! A queue accepts up to [`BatchQueue::max_batch_size`] entries per call and
//! reports one [`EntryOutcome`] per entry, so callers can retry only the
//! entries that actually failed.

use crate::error::{ErrorCategory, StreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One item of a batch-submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Caller-assigned id, unique within the call.
    pub id: String,
    /// Message body as it will be stored on the queue.
    pub body: String,
}

impl BatchEntry {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// Why a single entry was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub reason: String,
    pub category: ErrorCategory,
}

impl EntryFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            category: ErrorCategory::Transient,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            category: ErrorCategory::Permanent,
        }
    }
}

impl From<&StreamError> for EntryFailure {
    fn from(err: &StreamError) -> Self {
        Self {
            reason: err.to_string(),
            category: err.category(),
        }
    }
}

/// Per-entry result of a batch-submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    /// The id of the submitted entry.
    pub id: String,
    /// Queue message id on success.
    pub result: Result<String, EntryFailure>,
}

impl EntryOutcome {
    pub fn accepted(id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Ok(message_id.into()),
        }
    }

    pub fn failed(id: impl Into<String>, failure: EntryFailure) -> Self {
        Self {
            id: id.into(),
            result: Err(failure),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outbound queue with a bounded batch-submit API.
#[async_trait]
pub trait BatchQueue: Send + Sync {
    /// Submit up to `max_batch_size()` entries in one call.
    ///
    /// `Err` means the call as a whole was rejected or never reached the
    /// queue; `Ok` carries one outcome per submitted entry.
    async fn submit_batch(&self, entries: &[BatchEntry]) -> Result<Vec<EntryOutcome>, StreamError>;

    /// Provider-defined maximum number of entries per call.
    fn max_batch_size(&self) -> usize;

    /// Queue name for logging.
    fn name(&self) -> &str;
}

/// Reject calls the provider would refuse: empty, oversized, or with repeated ids.
pub fn validate_batch(entries: &[BatchEntry], max: usize) -> Result<(), StreamError> {
    if entries.is_empty() {
        return Err(StreamError::EmptyBatch);
    }
    if entries.len() > max {
        return Err(StreamError::BatchTooLarge {
            size: entries.len(),
            max,
        });
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(StreamError::DuplicateEntryId(entry.id.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(ids: &[&str]) -> Vec<BatchEntry> {
        ids.iter().map(|id| BatchEntry::new(*id, "{}")).collect()
    }

    #[test]
    fn test_validate_batch_accepts_distinct_ids() {
        assert!(validate_batch(&entries(&["a", "b", "c"]), 10).is_ok());
    }

    #[test]
    fn test_validate_batch_rejects_empty() {
        assert!(matches!(validate_batch(&[], 10), Err(StreamError::EmptyBatch)));
    }

    #[test]
    fn test_validate_batch_rejects_oversized() {
        let err = validate_batch(&entries(&["a", "b", "c"]), 2).unwrap_err();
        assert!(matches!(err, StreamError::BatchTooLarge { size: 3, max: 2 }));
    }

    #[test]
    fn test_validate_batch_rejects_duplicate_ids() {
        let err = validate_batch(&entries(&["a", "b", "a"]), 10).unwrap_err();
        assert!(matches!(err, StreamError::DuplicateEntryId(id) if id == "a"));
    }

    #[test]
    fn test_entry_failure_from_stream_error() {
        let failure = EntryFailure::from(&StreamError::Serialization("bad json".to_string()));
        assert_eq!(failure.category, ErrorCategory::Permanent);
        assert!(failure.reason.contains("bad json"));
    }
}
