//! Change fan-out consumer.
//!
//! Turns the INSERT entries of a change-feed batch into welcome-email jobs,
//! chunks them to the queue's batch limit and submits each chunk. Per-entry
//! outcomes are inspected so only the entries that failed are resubmitted.

use crate::config::FanOutConfig;
use crate::error::{FanOutError, TemplateError};
use crate::ids::JobIdAllocator;
use crate::models::{ChangeEntry, EmailJob, FanOutSummary};
use crate::policy::{ErrorKind, ErrorPolicy};
use crate::templates::WelcomeTemplate;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stream_queue::{BatchEntry, BatchQueue, DeadLetter, DeadLetterSink, EntryFailure, EntryOutcome};
use tracing::{debug, error, info, instrument, warn};

/// Dead-letter `source` for malformed change entries.
pub const CHANGE_FEED_SOURCE: &str = "change_feed";
/// Dead-letter `source` for jobs the queue never accepted.
pub const FAN_OUT_SOURCE: &str = "fan_out";

/// A job the queue still rejected after its last attempt.
#[derive(Debug, Clone)]
struct FailedJob {
    job: EmailJob,
    failure: EntryFailure,
    attempts: u32,
}

#[derive(Debug, Default)]
struct ChunkReport {
    enqueued: usize,
    retried: usize,
    failed: Vec<FailedJob>,
}

/// Fans INSERT change entries out as welcome-email jobs.
pub struct FanOutConsumer<Q, D> {
    queue: Arc<Q>,
    dead_letters: Arc<D>,
    template: WelcomeTemplate,
    config: FanOutConfig,
}

impl<Q, D> FanOutConsumer<Q, D>
where
    Q: BatchQueue,
    D: DeadLetterSink,
{
    pub fn new(queue: Arc<Q>, dead_letters: Arc<D>, config: FanOutConfig) -> Result<Self, TemplateError> {
        Ok(Self {
            template: WelcomeTemplate::new(&config.template)?,
            queue,
            dead_letters,
            config,
        })
    }

    pub fn config(&self) -> &FanOutConfig {
        &self.config
    }

    /// Jobs per submit call: the configured size, never above the queue's limit.
    pub fn chunk_size(&self) -> usize {
        self.config
            .max_batch_size
            .min(self.queue.max_batch_size())
            .max(1)
    }

    /// Process one change-feed batch.
    ///
    /// No submission is made when the batch holds no usable INSERT entry.
    /// Malformed entries are dead-lettered only when the call returns `Ok`,
    /// so a redelivered batch never records them twice.
    #[instrument(skip(self, batch), fields(batch_size = batch.len(), queue = %self.queue.name()))]
    pub async fn fan_out(&self, batch: &[ChangeEntry]) -> Result<FanOutSummary, FanOutError> {
        let mut summary = FanOutSummary {
            received: batch.len(),
            ..FanOutSummary::default()
        };

        let (jobs, malformed) = self.build_jobs(batch, &mut summary)?;
        if jobs.is_empty() {
            self.dead_letter_all(malformed, &mut summary).await?;
            debug!(ignored = summary.ignored, malformed = summary.malformed, "No jobs to submit");
            return Ok(summary);
        }

        let mut failed = Vec::new();
        for chunk in jobs.chunks(self.chunk_size()) {
            summary.chunks += 1;
            let report = self.submit_chunk(chunk).await;
            summary.enqueued += report.enqueued;
            summary.retried += report.retried;
            failed.extend(report.failed);
        }

        counter!("onboarding_fanout_jobs_total", "outcome" => "enqueued").increment(summary.enqueued as u64);

        if failed.is_empty() {
            self.dead_letter_all(malformed, &mut summary).await?;
            info!(enqueued = summary.enqueued, chunks = summary.chunks, "Welcome jobs enqueued");
            return Ok(summary);
        }

        counter!("onboarding_fanout_jobs_total", "outcome" => "failed").increment(failed.len() as u64);
        let err = FanOutError::QueueSubmitFailed {
            failed: failed.len(),
            enqueued: summary.enqueued,
            reason: failed[0].failure.reason.clone(),
        };

        match self.config.policy.for_kind(ErrorKind::QueueSubmitFailed) {
            ErrorPolicy::FailClosed => {
                warn!(
                    error = %err,
                    deferred_dead_letters = malformed.len(),
                    "Fan-out incomplete, requesting redelivery"
                );
                Err(err)
            }
            ErrorPolicy::FailOpen => {
                self.dead_letter_all(malformed, &mut summary).await?;
                for failed_job in failed {
                    let letter = DeadLetter::new(
                        FAN_OUT_SOURCE,
                        &failed_job.job.job_id,
                        failed_job.job.message_body().to_string(),
                        &failed_job.failure.reason,
                    )
                    .with_attempts(failed_job.attempts);
                    self.dead_letter(letter).await?;
                    summary.dead_lettered += 1;
                }
                warn!(error = %err, dead_lettered = summary.dead_lettered, "Fan-out incomplete, jobs dead-lettered");
                Ok(summary)
            }
        }
    }

    /// Filter and transform, in batch order.
    ///
    /// Returns the jobs plus the dead letters owed for malformed entries.
    fn build_jobs(
        &self,
        batch: &[ChangeEntry],
        summary: &mut FanOutSummary,
    ) -> Result<(Vec<EmailJob>, Vec<DeadLetter>), FanOutError> {
        let mut ids = JobIdAllocator::new();
        let mut jobs = Vec::new();
        let mut malformed = Vec::new();

        for (index, entry) in batch.iter().enumerate() {
            if !entry.is_insert() {
                summary.ignored += 1;
                continue;
            }
            summary.inserts += 1;

            match self.build_job(entry, &mut ids) {
                Ok(job) => jobs.push(job),
                Err(reason) => {
                    summary.malformed += 1;
                    counter!("onboarding_fanout_malformed_total").increment(1);

                    let err = FanOutError::MalformedChangeEntry {
                        sequence: entry.sequence_or(index),
                        reason,
                    };
                    if self.config.policy.for_kind(ErrorKind::MalformedChangeEntry) == ErrorPolicy::FailClosed {
                        warn!(error = %err, "Malformed change entry, rejecting batch");
                        return Err(err);
                    }

                    warn!(error = %err, "Malformed change entry, skipping");
                    let payload = serde_json::to_string(entry).unwrap_or_else(|_| format!("{:?}", entry));
                    malformed.push(DeadLetter::new(
                        CHANGE_FEED_SOURCE,
                        entry.sequence_or(index),
                        payload,
                        err.to_string(),
                    ));
                }
            }
        }

        Ok((jobs, malformed))
    }

    fn build_job(&self, entry: &ChangeEntry, ids: &mut JobIdAllocator) -> Result<EmailJob, String> {
        let user = entry.user()?;
        let rendered = self.template.render(&user).map_err(|e| e.to_string())?;

        Ok(EmailJob {
            job_id: ids.allocate(&user.id),
            to: user.email,
            subject: rendered.subject,
            body: rendered.html,
        })
    }

    /// Submit one chunk, resubmitting only the entries that failed.
    ///
    /// A whole-call error counts as a failure of every pending entry. An entry
    /// the queue reported nothing for is treated as a transient failure.
    async fn submit_chunk(&self, chunk: &[EmailJob]) -> ChunkReport {
        let mut report = ChunkReport::default();
        let mut pending: Vec<&EmailJob> = chunk.iter().collect();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let entries: Vec<BatchEntry> = pending.iter().map(|job| job.to_batch_entry()).collect();

            let failures: Vec<(&EmailJob, EntryFailure)> = match self.queue.submit_batch(&entries).await {
                Ok(outcomes) => {
                    let mut by_id: HashMap<String, EntryOutcome> =
                        outcomes.into_iter().map(|o| (o.id.clone(), o)).collect();
                    let mut failures = Vec::new();

                    for job in pending {
                        match by_id.remove(&job.job_id).map(|o| o.result) {
                            Some(Ok(message_id)) => {
                                report.enqueued += 1;
                                debug!(job_id = %job.job_id, %message_id, "Job enqueued");
                            }
                            Some(Err(failure)) => failures.push((job, failure)),
                            None => failures.push((job, EntryFailure::transient("queue reported no outcome"))),
                        }
                    }
                    failures
                }
                Err(e) => {
                    warn!(error = %e, attempt, entries = entries.len(), "Batch submit call failed");
                    let failure = EntryFailure::from(&e);
                    pending.into_iter().map(|job| (job, failure.clone())).collect()
                }
            };

            let (retryable, permanent): (Vec<_>, Vec<_>) =
                failures.into_iter().partition(|(_, f)| f.category.is_retryable());

            report.failed.extend(permanent.into_iter().map(|(job, failure)| FailedJob {
                job: job.clone(),
                failure,
                attempts: attempt,
            }));

            if retryable.is_empty() {
                break;
            }

            if attempt >= self.config.max_submit_attempts {
                error!(
                    failed = retryable.len(),
                    attempts = attempt,
                    "Giving up on jobs after repeated submit failures"
                );
                report.failed.extend(retryable.into_iter().map(|(job, failure)| FailedJob {
                    job: job.clone(),
                    failure,
                    attempts: attempt,
                }));
                break;
            }

            let delay_ms = retryable
                .iter()
                .map(|(_, f)| {
                    f.category
                        .backoff_delay_ms(self.config.retry_backoff_ms, attempt - 1, self.config.max_backoff_ms)
                })
                .max()
                .unwrap_or(0);

            info!(
                retrying = retryable.len(),
                attempt,
                delay_ms,
                "Resubmitting failed jobs"
            );
            report.retried += retryable.len();

            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            pending = retryable.into_iter().map(|(job, _)| job).collect();
        }

        report
    }

    async fn dead_letter_all(&self, letters: Vec<DeadLetter>, summary: &mut FanOutSummary) -> Result<(), FanOutError> {
        for letter in letters {
            self.dead_letter(letter).await?;
            summary.dead_lettered += 1;
        }
        Ok(())
    }

    async fn dead_letter(&self, letter: DeadLetter) -> Result<String, FanOutError> {
        let key = letter.key.clone();
        self.dead_letters.record(letter).await.map_err(|e| {
            error!(error = %e, %key, "Failed to write dead letter");
            FanOutError::DeadLetterFailed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRecord;
    use crate::policy::PolicyConfig;
    use serde_json::json;
    use stream_queue::{InMemoryDeadLetters, InMemoryQueue};

    fn inserts(n: usize) -> Vec<ChangeEntry> {
        (0..n)
            .map(|i| ChangeEntry::insert(&UserRecord::new(format!("u{}", i), format!("User {}", i), format!("u{}@example.com", i))))
            .collect()
    }

    fn build(
        queue: &InMemoryQueue,
        config: FanOutConfig,
    ) -> (FanOutConsumer<InMemoryQueue, InMemoryDeadLetters>, Arc<InMemoryDeadLetters>) {
        let dead_letters = Arc::new(InMemoryDeadLetters::new());
        let consumer = FanOutConsumer::new(Arc::new(queue.clone()), dead_letters.clone(), config).unwrap();
        (consumer, dead_letters)
    }

    fn fast() -> FanOutConfig {
        FanOutConfig::default().with_retry_backoff_ms(0)
    }

    #[tokio::test]
    async fn test_chunk_size_respects_queue_limit() {
        let queue = InMemoryQueue::new("welcome", 4);
        let (consumer, _) = build(&queue, fast());
        assert_eq!(consumer.chunk_size(), 4);

        let queue = InMemoryQueue::new("welcome", 10);
        let (consumer, _) = build(&queue, fast().with_max_batch_size(3));
        assert_eq!(consumer.chunk_size(), 3);
    }

    #[tokio::test]
    async fn test_transient_entry_failure_retries_only_that_entry() {
        let queue = InMemoryQueue::new("welcome", 10);
        queue.fail_entry("u1-", 1, EntryFailure::transient("throttled")).await;
        let (consumer, dead_letters) = build(&queue, fast());

        let summary = consumer.fan_out(&inserts(3)).await.unwrap();

        assert_eq!(summary.enqueued, 3);
        assert_eq!(summary.retried, 1);
        let calls = queue.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 1);
        assert!(calls[1][0].id.starts_with("u1-"));
        assert!(dead_letters.is_empty().await);
    }

    #[tokio::test]
    async fn test_permanent_entry_failure_is_not_retried() {
        let queue = InMemoryQueue::new("welcome", 10);
        queue.fail_entry("u0-", 5, EntryFailure::permanent("invalid address")).await;
        let (consumer, _) = build(&queue, fast());

        let err = consumer.fan_out(&inserts(2)).await.unwrap_err();

        assert!(matches!(err, FanOutError::QueueSubmitFailed { failed: 1, enqueued: 1, .. }));
        assert_eq!(queue.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_whole_call_failure_retries_every_entry() {
        let queue = InMemoryQueue::new("welcome", 10);
        queue.fail_calls(2).await;
        let (consumer, _) = build(&queue, fast());

        let summary = consumer.fan_out(&inserts(2)).await.unwrap();

        assert_eq!(summary.enqueued, 2);
        assert_eq!(summary.retried, 4);
        assert_eq!(queue.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_exhausted_jobs_dead_lettered_when_fail_open() {
        let queue = InMemoryQueue::new("welcome", 10);
        queue.fail_entry("u2-", 10, EntryFailure::transient("throttled")).await;
        let policy = PolicyConfig::default().with(ErrorKind::QueueSubmitFailed, ErrorPolicy::FailOpen);
        let (consumer, dead_letters) = build(&queue, fast().with_policy(policy));

        let summary = consumer.fan_out(&inserts(3)).await.unwrap();

        assert_eq!(summary.enqueued, 2);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(queue.call_count().await, 3);

        let letters = dead_letters.letters().await;
        assert_eq!(letters[0].source, FAN_OUT_SOURCE);
        assert_eq!(letters[0].attempts, 3);
        assert!(letters[0].key.starts_with("u2-"));
        let body: serde_json::Value = serde_json::from_str(&letters[0].payload).unwrap();
        assert_eq!(body["to"], "u2@example.com");
    }

    #[tokio::test]
    async fn test_malformed_insert_fail_closed_skips_submission() {
        let queue = InMemoryQueue::new("welcome", 10);
        let policy = PolicyConfig::default().with(ErrorKind::MalformedChangeEntry, ErrorPolicy::FailClosed);
        let (consumer, _) = build(&queue, fast().with_policy(policy));

        let mut batch = inserts(2);
        batch.push(ChangeEntry {
            operation_type: crate::models::OperationType::Insert,
            after: Some(json!({"id": "u9", "name": "Nadie"})),
            sequence: Some("42-0".to_string()),
        });

        let err = consumer.fan_out(&batch).await.unwrap_err();
        assert!(matches!(err, FanOutError::MalformedChangeEntry { ref sequence, .. } if sequence == "42-0"));
        assert_eq!(queue.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_entry_dead_lettered_once_across_redeliveries() {
        let queue = InMemoryQueue::new("welcome", 10);
        // Three deliveries of three attempts each
        queue.fail_entry("u0-", 9, EntryFailure::transient("throttled")).await;
        let (consumer, dead_letters) = build(&queue, fast());

        let mut batch = inserts(1);
        batch.push(ChangeEntry {
            operation_type: crate::models::OperationType::Insert,
            after: Some(json!({"id": "x"})),
            sequence: Some("2-0".to_string()),
        });

        for _ in 0..3 {
            let err = consumer.fan_out(&batch).await.unwrap_err();
            assert!(matches!(err, FanOutError::QueueSubmitFailed { failed: 1, .. }));
            assert!(dead_letters.is_empty().await);
        }

        let summary = consumer.fan_out(&batch).await.unwrap();
        assert_eq!(summary.enqueued, 1);
        assert_eq!(summary.dead_lettered, 1);

        let keys: Vec<String> = dead_letters.letters().await.into_iter().map(|l| l.key).collect();
        assert_eq!(keys, vec!["2-0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let queue = InMemoryQueue::new("welcome", 10);
        queue.fail_calls(1).await;
        let (consumer, _) = build(&queue, FanOutConfig::default().with_retry_backoff_ms(200));

        let started = tokio::time::Instant::now();
        let summary = consumer.fan_out(&inserts(1)).await.unwrap();

        assert_eq!(summary.enqueued, 1);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
