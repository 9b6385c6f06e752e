//! Stream error types and error categorization
//!
//! Errors are categorized to determine retry behavior:
//! - **Transient**: Temporary failures, retry with exponential backoff
//! - **Permanent**: Unrecoverable errors, dead-letter immediately
//! - **RateLimited**: Provider throttling, longer backoff before retry

use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure - retry with exponential backoff
    Transient,
    /// Unrecoverable error - dead-letter immediately
    Permanent,
    /// Rate limit hit - longer backoff
    RateLimited,
}

impl ErrorCategory {
    /// Whether an entry failing with this category is worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }

    /// Base delay multiplier relative to the caller's configured backoff
    fn backoff_factor(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 1,
            ErrorCategory::Permanent => 0,
            ErrorCategory::RateLimited => 5,
        }
    }

    /// Exponential backoff for the given attempt, capped at `max_ms`.
    ///
    /// `attempt` is zero-based: the delay before the first retry uses `attempt = 0`.
    pub fn backoff_delay_ms(&self, base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
        let base = base_ms.saturating_mul(self.backoff_factor());
        base.saturating_mul(2u64.saturating_pow(attempt)).min(max_ms)
    }
}

/// Stream and queue errors
#[derive(Error, Debug)]
pub enum StreamError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// More entries than the queue accepts in one call
    #[error("Batch of {size} entries exceeds the queue limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Two entries in the same call share an id
    #[error("Duplicate entry id in batch: {0}")]
    DuplicateEntryId(String),

    /// Empty batch submitted
    #[error("Batch contains no entries")]
    EmptyBatch,

    /// Stream entry is missing an expected field
    #[error("Stream entry {stream_id} is missing field '{field}'")]
    MissingField { stream_id: String, field: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Redis(_) => ErrorCategory::Transient,
            StreamError::Serialization(_) => ErrorCategory::Permanent,
            StreamError::BatchTooLarge { .. } => ErrorCategory::Permanent,
            StreamError::DuplicateEntryId(_) => ErrorCategory::Permanent,
            StreamError::EmptyBatch => ErrorCategory::Permanent,
            StreamError::MissingField { .. } => ErrorCategory::Permanent,
            StreamError::Config(_) => ErrorCategory::Permanent,
            StreamError::Internal(_) => ErrorCategory::Transient,
        }
    }

    /// Check if this error should trigger a retry
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// BLOCK timeout on XREADGROUP (no messages arrived); not a failure
    pub fn is_block_timeout(&self) -> bool {
        matches!(self, StreamError::Redis(e) if e.is_timeout())
    }

    /// Consumer group missing (stream was deleted under us)
    pub fn is_nogroup_error(&self) -> bool {
        matches!(self, StreamError::Redis(e) if e.to_string().contains("NOGROUP"))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}
