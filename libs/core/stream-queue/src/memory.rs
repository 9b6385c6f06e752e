//! In-memory queue and dead-letter sink for development and tests.

use crate::batch::{validate_batch, BatchEntry, BatchQueue, EntryFailure, EntryOutcome};
use crate::dlq::{DeadLetter, DeadLetterSink};
use crate::error::StreamError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct QueueState {
    calls: Vec<Vec<BatchEntry>>,
    accepted: Vec<BatchEntry>,
    // remaining failures per entry id prefix
    entry_failures: Vec<(String, u32, EntryFailure)>,
    // remaining whole-call failures
    call_failures: u32,
    next_message: u64,
}

/// Queue that keeps every accepted entry in memory.
///
/// Failures can be scripted per entry id prefix or for whole calls, which
/// makes partial-batch behaviour easy to exercise.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    name: String,
    max_batch_size: usize,
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>, max_batch_size: usize) -> Self {
        Self {
            name: name.into(),
            max_batch_size: max_batch_size.max(1),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Fail the next `times` submissions of entries whose id starts with `prefix`.
    pub async fn fail_entry(&self, prefix: impl Into<String>, times: u32, failure: EntryFailure) {
        self.state
            .lock()
            .await
            .entry_failures
            .push((prefix.into(), times, failure));
    }

    /// Reject the next `times` calls as a whole.
    pub async fn fail_calls(&self, times: u32) {
        self.state.lock().await.call_failures = times;
    }

    /// Every call made so far, in order, including rejected ones.
    pub async fn calls(&self) -> Vec<Vec<BatchEntry>> {
        self.state.lock().await.calls.clone()
    }

    /// Entries accepted so far, in acceptance order.
    pub async fn accepted(&self) -> Vec<BatchEntry> {
        self.state.lock().await.accepted.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }
}

#[async_trait]
impl BatchQueue for InMemoryQueue {
    async fn submit_batch(&self, entries: &[BatchEntry]) -> Result<Vec<EntryOutcome>, StreamError> {
        let mut state = self.state.lock().await;
        state.calls.push(entries.to_vec());

        validate_batch(entries, self.max_batch_size)?;

        if state.call_failures > 0 {
            state.call_failures -= 1;
            return Err(StreamError::Internal(format!("{} unavailable", self.name)));
        }

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let scripted = state
                .entry_failures
                .iter_mut()
                .find(|(prefix, remaining, _)| *remaining > 0 && entry.id.starts_with(prefix.as_str()))
                .map(|(_, remaining, failure)| {
                    *remaining -= 1;
                    failure.clone()
                });

            match scripted {
                Some(failure) => outcomes.push(EntryOutcome::failed(&entry.id, failure)),
                None => {
                    state.next_message += 1;
                    let message_id = format!("{}-{}", self.name, state.next_message);
                    state.accepted.push(entry.clone());
                    outcomes.push(EntryOutcome::accepted(&entry.id, message_id));
                }
            }
        }

        Ok(outcomes)
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Dead-letter sink backed by a `Vec`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetters {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    unavailable: bool,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose writes always fail.
    pub fn unavailable() -> Self {
        Self {
            letters: Arc::default(),
            unavailable: true,
        }
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn record(&self, letter: DeadLetter) -> Result<String, StreamError> {
        if self.unavailable {
            return Err(StreamError::Internal("dead-letter sink unavailable".to_string()));
        }
        let mut letters = self.letters.lock().await;
        letters.push(letter);
        Ok(format!("dlq-{}", letters.len()))
    }
}
