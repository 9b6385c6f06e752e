//! Stream triggers.
//!
//! Each trigger reads a batch through a consumer group, hands it to its
//! consumer and acknowledges entries only when the consumer returned `Ok`.
//! Every `redeliver_after` a sweep claims entries left pending at least that
//! long, whichever consumer name holds them, until none are left.

use domain_onboarding::{
    ChangeEntry, ErrorKind, ErrorPolicy, FanOutConsumer, IngestionConsumer, NotificationEvent, PolicyConfig,
    RedisUserStore,
};
use std::sync::Arc;
use std::time::Duration;
use stream_queue::{
    DeadLetter, DeadLetterSink, DlqManager, MessageKey, StreamConsumer, StreamError, StreamEvent, StreamProducer,
};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Where the next read comes from.
struct ReadCursor {
    redeliver_after: Duration,
    next_sweep: Instant,
}

impl ReadCursor {
    fn new(redeliver_after: Duration) -> Self {
        // Entries stranded by a previous run are swept first
        Self {
            redeliver_after,
            next_sweep: Instant::now(),
        }
    }

    /// A sweep stays due until a claim comes back empty.
    fn sweep_due(&self) -> bool {
        Instant::now() >= self.next_sweep
    }

    fn sweep_finished(&mut self) {
        self.next_sweep = Instant::now() + self.redeliver_after;
    }
}

async fn read_batch(
    consumer: &StreamConsumer,
    cursor: &mut ReadCursor,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Result<Vec<StreamEvent>, StreamError>> {
    if cursor.sweep_due() {
        match consumer.claim_abandoned(cursor.redeliver_after).await {
            Ok(events) if !events.is_empty() => return Some(Ok(events)),
            Ok(_) => cursor.sweep_finished(),
            Err(e) => {
                cursor.sweep_finished();
                return Some(Err(e));
            }
        }
    }

    tokio::select! {
        result = consumer.read_new() => Some(result),
        _ = shutdown.changed() => None,
    }
}

async fn ack(consumer: &StreamConsumer, ids: &[String]) {
    if let Err(e) = consumer.ack(ids).await {
        // Unacked entries are redelivered, so this only costs a duplicate
        error!(error = %e, stream = %consumer.stream_name(), count = ids.len(), "Failed to acknowledge entries");
    }
}

/// Feed the notification stream into the ingestion consumer.
pub async fn run_ingestion(
    consumer: StreamConsumer,
    ingestion: Arc<IngestionConsumer<RedisUserStore, DlqManager>>,
    redeliver_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StreamError> {
    consumer.ensure_consumer_group().await?;
    info!(stream = %consumer.stream_name(), group = %consumer.consumer_group(), "Ingestion trigger started");

    let mut cursor = ReadCursor::new(redeliver_after);

    while !*shutdown.borrow() {
        let events = match read_batch(&consumer, &mut cursor, &mut shutdown).await {
            None => break,
            Some(Ok(events)) => events,
            Some(Err(e)) if e.is_block_timeout() => continue,
            Some(Err(e)) if e.is_nogroup_error() => {
                warn!(stream = %consumer.stream_name(), "Consumer group missing, recreating");
                consumer.ensure_consumer_group().await?;
                continue;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read notifications");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
                continue;
            }
        };

        let mut acked = Vec::with_capacity(events.len());
        for event in &events {
            let notification = NotificationEvent::new(
                event.stream_id.clone(),
                event.field(MessageKey::Payload).unwrap_or_default(),
            );
            match ingestion.ingest(&notification).await {
                Ok(_) => acked.push(event.stream_id.clone()),
                Err(e) => warn!(stream_id = %event.stream_id, age_ms = event.age_ms(), error = %e, "Notification left pending"),
            }
        }

        ack(&consumer, &acked).await;
    }

    info!("Ingestion trigger stopped");
    Ok(())
}

/// A change-stream entry that could not be decoded.
#[derive(Debug)]
pub struct UndecodableEntry {
    pub stream_id: String,
    pub raw: String,
    pub reason: String,
}

/// Decode change-stream events, tagging each entry with its stream id.
pub fn decode_changes(events: &[StreamEvent]) -> (Vec<ChangeEntry>, Vec<UndecodableEntry>) {
    let mut entries = Vec::with_capacity(events.len());
    let mut undecodable = Vec::new();

    for event in events {
        let decoded = event
            .require(MessageKey::Entry)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<ChangeEntry>(raw).map_err(|e| e.to_string()));

        match decoded {
            Ok(entry) => entries.push(entry.with_sequence(event.stream_id.clone())),
            Err(reason) => undecodable.push(UndecodableEntry {
                stream_id: event.stream_id.clone(),
                raw: event.field(MessageKey::Entry).unwrap_or_default().to_string(),
                reason,
            }),
        }
    }

    (entries, undecodable)
}

/// Apply the malformed-entry policy to entries that never reached the
/// fan-out consumer. Returns the stream ids that may be acknowledged.
async fn settle_undecodable<D: DeadLetterSink>(
    undecodable: Vec<UndecodableEntry>,
    policy: &PolicyConfig,
    dead_letters: &D,
) -> Vec<String> {
    if policy.for_kind(ErrorKind::MalformedChangeEntry) == ErrorPolicy::FailClosed {
        for entry in &undecodable {
            warn!(stream_id = %entry.stream_id, reason = %entry.reason, "Undecodable change entry left pending");
        }
        return Vec::new();
    }

    let mut settled = Vec::with_capacity(undecodable.len());
    for entry in undecodable {
        let letter = DeadLetter::new(
            domain_onboarding::fanout::CHANGE_FEED_SOURCE,
            &entry.stream_id,
            entry.raw,
            format!("Malformed change entry {}: {}", entry.stream_id, entry.reason),
        );
        match dead_letters.record(letter).await {
            Ok(_) => settled.push(entry.stream_id),
            Err(e) => error!(stream_id = %entry.stream_id, error = %e, "Failed to dead-letter change entry"),
        }
    }
    settled
}

/// Feed the change stream into the fan-out consumer.
pub async fn run_fan_out(
    consumer: StreamConsumer,
    fan_out: Arc<FanOutConsumer<StreamProducer, DlqManager>>,
    dead_letters: Arc<DlqManager>,
    redeliver_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), StreamError> {
    consumer.ensure_consumer_group().await?;
    info!(stream = %consumer.stream_name(), group = %consumer.consumer_group(), "Fan-out trigger started");

    let mut cursor = ReadCursor::new(redeliver_after);

    while !*shutdown.borrow() {
        let events = match read_batch(&consumer, &mut cursor, &mut shutdown).await {
            None => break,
            Some(Ok(events)) => events,
            Some(Err(e)) if e.is_block_timeout() => continue,
            Some(Err(e)) if e.is_nogroup_error() => {
                warn!(stream = %consumer.stream_name(), "Consumer group missing, recreating");
                consumer.ensure_consumer_group().await?;
                continue;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read change entries");
                tokio::time::sleep(READ_ERROR_BACKOFF).await;
                continue;
            }
        };
        if events.is_empty() {
            continue;
        }

        let (entries, undecodable) = decode_changes(&events);
        let mut acked = settle_undecodable(undecodable, &fan_out.config().policy, dead_letters.as_ref()).await;

        // The batch is all-or-nothing towards the trigger
        match fan_out.fan_out(&entries).await {
            Ok(summary) => {
                debug!(?summary, "Change batch processed");
                acked.extend(entries.into_iter().filter_map(|e| e.sequence));
            }
            Err(e) => warn!(error = %e, entries = entries.len(), "Change batch left pending"),
        }

        ack(&consumer, &acked).await;
    }

    info!("Fan-out trigger stopped");
    Ok(())
}
