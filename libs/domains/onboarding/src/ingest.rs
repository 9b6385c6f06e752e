//! Ingestion consumer: one "new user" notification in, one write-once put.

use crate::config::IngestionConfig;
use crate::error::IngestError;
use crate::models::{Ack, NewUserPayload, NotificationEvent};
use crate::policy::ErrorPolicy;
use crate::store::{PutOutcome, UserStore};
use metrics::counter;
use std::sync::Arc;
use stream_queue::{DeadLetter, DeadLetterSink};
use tracing::{error, info, instrument, warn};

/// Dead-letter `source` for ingestion failures.
pub const INGESTION_SOURCE: &str = "ingestion";

/// Validates inbound user documents and stores them write-once.
pub struct IngestionConsumer<S, D> {
    store: Arc<S>,
    dead_letters: Arc<D>,
    config: IngestionConfig,
}

impl<S, D> IngestionConsumer<S, D>
where
    S: UserStore,
    D: DeadLetterSink,
{
    pub fn new(store: Arc<S>, dead_letters: Arc<D>, config: IngestionConfig) -> Self {
        Self {
            store,
            dead_letters,
            config,
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Handle one notification.
    ///
    /// `Ok` means the trigger may treat the event as delivered, including
    /// failures that were dead-lettered under a fail-open policy. `Err`
    /// asks for redelivery.
    #[instrument(skip(self, event), fields(message_id = %event.message_id))]
    pub async fn ingest(&self, event: &NotificationEvent) -> Result<Ack, IngestError> {
        match self.store_event(event).await {
            Ok(ack) => {
                let outcome = match ack {
                    Ack::AlreadyStored { .. } => "duplicate",
                    _ => "stored",
                };
                counter!("onboarding_ingest_total", "outcome" => outcome).increment(1);
                info!(%ack, "Ingested notification");
                Ok(ack)
            }
            Err(err) => self.handle_failure(event, err).await,
        }
    }

    async fn store_event(&self, event: &NotificationEvent) -> Result<Ack, IngestError> {
        let record = NewUserPayload::parse(&event.payload)
            .map_err(|reason| IngestError::MalformedPayload {
                message_id: event.message_id.clone(),
                reason,
            })?
            .into_record();

        match self.store.put(&record).await {
            Ok(PutOutcome::Inserted) => Ok(Ack::Stored { id: record.id }),
            Ok(PutOutcome::AlreadyExists(existing)) if existing == record => {
                Ok(Ack::AlreadyStored { id: record.id })
            }
            Ok(PutOutcome::AlreadyExists(_)) => Err(IngestError::StoreConflict { id: record.id }),
            Err(e) => Err(IngestError::StoreWriteFailed {
                id: record.id,
                reason: e.to_string(),
            }),
        }
    }

    async fn handle_failure(&self, event: &NotificationEvent, err: IngestError) -> Result<Ack, IngestError> {
        let Some(kind) = err.kind() else {
            return Err(err);
        };

        match self.config.policy.for_kind(kind) {
            ErrorPolicy::FailClosed => {
                counter!("onboarding_ingest_total", "outcome" => "failed").increment(1);
                warn!(error = %err, %kind, "Ingestion failed, requesting redelivery");
                Err(err)
            }
            ErrorPolicy::FailOpen => {
                let reason = err.to_string();
                let letter = DeadLetter::new(INGESTION_SOURCE, &event.message_id, &event.payload, &reason);

                let dead_letter_id = self.dead_letters.record(letter).await.map_err(|e| {
                    error!(error = %e, original = %reason, "Failed to dead-letter notification");
                    IngestError::DeadLetterFailed(e.to_string())
                })?;

                counter!("onboarding_ingest_total", "outcome" => "dead_lettered").increment(1);
                warn!(error = %reason, %kind, %dead_letter_id, "Ingestion failed, notification dead-lettered");
                Ok(Ack::DeadLettered {
                    reason,
                    dead_letter_id,
                })
            }
        }
    }
}
