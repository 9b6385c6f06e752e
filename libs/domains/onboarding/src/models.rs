//! Data models for the onboarding domain.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use stream_queue::BatchEntry;
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::{Validate, ValidationError};

// ============================================================================
// Users
// ============================================================================

/// A user as persisted by the ingestion consumer.
///
/// Immutable once written; nothing in the pipeline updates a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable identifier, also the store key.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub confirmed: bool,
}

impl UserRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            confirmed: false,
        }
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Inbound "new user" document.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewUserPayload {
    /// Optional caller-assigned id; generated when absent.
    #[validate(length(min = 1, max = 256), custom(function = "validate_not_blank"))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    /// `null` and absent both mean unconfirmed.
    #[serde(default)]
    pub confirmed: Option<bool>,
}

impl NewUserPayload {
    /// Parse and validate a raw JSON payload.
    ///
    /// Surrounding whitespace is stripped before validation.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut payload: NewUserPayload = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        payload.name = payload.name.trim().to_string();
        payload.email = payload.email.trim().to_string();
        payload.id = payload.id.map(|id| id.trim().to_string());
        payload.validate().map_err(|e| e.to_string())?;
        Ok(payload)
    }

    /// Build the record to store, assigning a fresh id when none was given.
    pub fn into_record(self) -> UserRecord {
        UserRecord {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            email: self.email,
            confirmed: self.confirmed.unwrap_or(false),
        }
    }
}

/// One event delivered by the notification bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Bus-assigned message id, used for tracing and dead letters.
    pub message_id: String,
    /// JSON user document, verbatim.
    pub payload: String,
}

impl NotificationEvent {
    pub fn new(message_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            payload: payload.into(),
        }
    }
}

/// Acknowledgement returned by the ingestion consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// The record was written.
    Stored { id: String },
    /// An identical record was already stored under this id.
    AlreadyStored { id: String },
    /// The event failed but was dead-lettered and may be treated as delivered.
    DeadLettered {
        reason: String,
        dead_letter_id: String,
    },
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ack::Stored { id } => write!(f, "stored user {}", id),
            Ack::AlreadyStored { id } => write!(f, "user {} already stored", id),
            Ack::DeadLettered {
                reason,
                dead_letter_id,
            } => write!(f, "dead-lettered as {}: {}", dead_letter_id, reason),
        }
    }
}

// ============================================================================
// Change feed
// ============================================================================

/// Kind of mutation reported by the store's change feed.
///
/// Unrecognised values map to [`OperationType::Unknown`] instead of failing
/// the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    Insert,
    Modify,
    Remove,
    Unknown,
}

impl From<String> for OperationType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(OperationType::Unknown)
    }
}

impl From<OperationType> for String {
    fn from(value: OperationType) -> Self {
        value.to_string()
    }
}

/// One change-feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub operation_type: OperationType,
    /// Post-mutation snapshot, kept raw so one bad snapshot only affects
    /// its own entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    /// Position in the change feed, when the feed provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
}

impl ChangeEntry {
    pub fn insert(record: &UserRecord) -> Self {
        Self {
            operation_type: OperationType::Insert,
            after: serde_json::to_value(record).ok(),
            sequence: None,
        }
    }

    pub fn modify(record: &UserRecord) -> Self {
        Self {
            operation_type: OperationType::Modify,
            after: serde_json::to_value(record).ok(),
            sequence: None,
        }
    }

    pub fn remove() -> Self {
        Self {
            operation_type: OperationType::Remove,
            after: None,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = Some(sequence.into());
        self
    }

    pub fn is_insert(&self) -> bool {
        self.operation_type == OperationType::Insert
    }

    /// Sequence for logs and dead letters, or the entry's index in its batch.
    pub fn sequence_or(&self, index: usize) -> String {
        self.sequence
            .clone()
            .unwrap_or_else(|| format!("#{}", index))
    }

    /// Decode the snapshot into a user with a non-blank name and email.
    pub fn user(&self) -> Result<UserRecord, String> {
        let after = self
            .after
            .as_ref()
            .ok_or_else(|| "missing `after` snapshot".to_string())?;
        let user: UserRecord = serde_json::from_value(after.clone()).map_err(|e| e.to_string())?;

        if user.name.trim().is_empty() {
            return Err("snapshot has an empty name".to_string());
        }
        if user.email.trim().is_empty() {
            return Err("snapshot has an empty email".to_string());
        }
        Ok(user)
    }
}

// ============================================================================
// Email jobs
// ============================================================================

/// A welcome-email render request bound for the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    /// Unique within one enqueue batch; see [`crate::ids`].
    pub job_id: String,
    pub to: String,
    pub subject: String,
    /// Rendered HTML.
    pub body: String,
}

impl EmailJob {
    /// Queue message body consumed by the email sender.
    pub fn message_body(&self) -> Value {
        json!({
            "to": self.to,
            "subject": self.subject,
            "html": self.body,
        })
    }

    pub fn to_batch_entry(&self) -> BatchEntry {
        BatchEntry::new(&self.job_id, self.message_body().to_string())
    }
}

/// Result of one fan-out invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutSummary {
    /// Entries in the delivered batch.
    pub received: usize,
    /// INSERT entries.
    pub inserts: usize,
    /// Non-INSERT entries skipped.
    pub ignored: usize,
    /// INSERT entries that could not be turned into a job.
    pub malformed: usize,
    /// Jobs accepted by the queue.
    pub enqueued: usize,
    /// Chunks submitted.
    pub chunks: usize,
    /// Entry resubmissions after partial failures.
    pub retried: usize,
    /// Entries and jobs written to the dead-letter sink.
    pub dead_lettered: usize,
}
