//! Error types for the onboarding domain.

use crate::policy::ErrorKind;
use thiserror::Error;

/// Errors returned by a [`UserStore`](crate::store::UserStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the ingestion consumer.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Payload is not a JSON user document or fails validation.
    #[error("Malformed payload in message {message_id}: {reason}")]
    MalformedPayload { message_id: String, reason: String },

    /// The store did not accept the write.
    #[error("Failed to store user {id}: {reason}")]
    StoreWriteFailed { id: String, reason: String },

    /// A different record is already stored under this id.
    #[error("User {id} already exists with different content")]
    StoreConflict { id: String },

    /// The failure could not be written to the dead-letter sink.
    #[error("Dead-letter write failed: {0}")]
    DeadLetterFailed(String),
}

impl IngestError {
    /// Policy kind governing this error; `None` for dead-letter failures,
    /// which always propagate.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            IngestError::MalformedPayload { .. } => Some(ErrorKind::MalformedPayload),
            IngestError::StoreWriteFailed { .. } => Some(ErrorKind::StoreWriteFailed),
            IngestError::StoreConflict { .. } => Some(ErrorKind::StoreConflict),
            IngestError::DeadLetterFailed(_) => None,
        }
    }
}

/// Failures of the change fan-out consumer.
#[derive(Debug, Error)]
pub enum FanOutError {
    /// An INSERT entry without a usable user snapshot.
    #[error("Malformed change entry {sequence}: {reason}")]
    MalformedChangeEntry { sequence: String, reason: String },

    /// Jobs still rejected by the queue after all attempts.
    #[error("Queue rejected {failed} job(s) ({enqueued} enqueued): {reason}")]
    QueueSubmitFailed {
        failed: usize,
        enqueued: usize,
        reason: String,
    },

    /// The failure could not be written to the dead-letter sink.
    #[error("Dead-letter write failed: {0}")]
    DeadLetterFailed(String),
}

impl FanOutError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            FanOutError::MalformedChangeEntry { .. } => Some(ErrorKind::MalformedChangeEntry),
            FanOutError::QueueSubmitFailed { .. } => Some(ErrorKind::QueueSubmitFailed),
            FanOutError::DeadLetterFailed(_) => None,
        }
    }
}

/// Template registration or rendering failure.
#[derive(Debug, Error)]
#[error("Template error: {0}")]
pub struct TemplateError(pub String);

impl From<handlebars::TemplateError> for TemplateError {
    fn from(err: handlebars::TemplateError) -> Self {
        TemplateError(err.to_string())
    }
}

impl From<handlebars::RenderError> for TemplateError {
    fn from(err: handlebars::RenderError) -> Self {
        TemplateError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = IngestError::StoreConflict { id: "u1".to_string() };
        assert_eq!(err.kind(), Some(ErrorKind::StoreConflict));
        assert_eq!(IngestError::DeadLetterFailed("down".to_string()).kind(), None);

        let err = FanOutError::QueueSubmitFailed {
            failed: 1,
            enqueued: 9,
            reason: "throttled".to_string(),
        };
        assert_eq!(err.kind(), Some(ErrorKind::QueueSubmitFailed));
        assert_eq!(err.to_string(), "Queue rejected 1 job(s) (9 enqueued): throttled");
    }
}
