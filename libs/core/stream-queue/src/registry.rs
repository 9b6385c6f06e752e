//! Stream registry types and definitions.
//!
//! This module provides:
//! - `StreamDef` trait for domain-specific stream definitions
//! - `MessageKey` enum for the field names used inside stream entries

use strum::{AsRefStr, Display, EnumString};

/// Standard message keys used in stream entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MessageKey {
    /// Outbound job body (JSON serialized).
    Job,
    /// Caller-assigned job id, kept next to the body for deduplication.
    JobId,
    /// Inbound notification payload.
    Payload,
    /// Change-feed entry (JSON serialized).
    Entry,
    /// Dead-letter record (JSON serialized).
    Data,
}

/// Stream definition trait.
///
/// Each domain implements this trait to define their stream configuration.
///
/// # Example
///
/// ```rust,ignore
/// use stream_queue::StreamDef;
///
/// pub struct WelcomeEmailStream;
///
/// impl StreamDef for WelcomeEmailStream {
///     const STREAM_NAME: &'static str = "email:welcome";
///     const CONSUMER_GROUP: &'static str = "email_senders";
///     const DLQ_STREAM: &'static str = "onboarding:dlq";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream name.
    const STREAM_NAME: &'static str;

    /// The consumer group name for this stream.
    const CONSUMER_GROUP: &'static str;

    /// The dead letter stream for entries that could not be handled.
    const DLQ_STREAM: &'static str;

    /// Maximum stream length before auto-trim (MAXLEN ~).
    const MAX_LENGTH: i64 = 100_000;

    /// Maximum entries accepted by one batch-submit call.
    const MAX_BATCH_ENTRIES: usize = 10;

    /// Get the stream name.
    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    /// Get the consumer group name.
    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }

    /// Get the DLQ stream name.
    fn dlq_stream() -> &'static str {
        Self::DLQ_STREAM
    }
}
