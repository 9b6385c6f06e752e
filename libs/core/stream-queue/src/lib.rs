//! Stream Queue
//!
//! Redis Streams plumbing shared by the onboarding components.
//!
//! ## Features
//!
//! - **Batch queue**: `BatchQueue` trait with per-entry outcomes, implemented
//!   by `StreamProducer` (Redis) and `InMemoryQueue`
//! - **Dead Letter Queue**: `DeadLetterSink` trait, implemented by
//!   `DlqManager` (Redis) and `InMemoryDeadLetters`
//! - **Consumer groups**: `StreamConsumer` reads and acknowledges batches
//! - **Prometheus metrics**: batch and dead-letter counters
//!
//! ## Example
//!
//! ```ignore
//! use stream_queue::{BatchEntry, BatchQueue, StreamProducer, StreamDef};
//!
//! struct WelcomeEmailStream;
//! impl StreamDef for WelcomeEmailStream {
//!     const STREAM_NAME: &'static str = "email:welcome";
//!     const CONSUMER_GROUP: &'static str = "email_senders";
//!     const DLQ_STREAM: &'static str = "onboarding:dlq";
//! }
//!
//! let producer = StreamProducer::from_stream_def::<WelcomeEmailStream>(redis);
//! let outcomes = producer.submit_batch(&entries).await?;
//! ```

mod batch;
mod config;
mod consumer;
mod dlq;
mod error;
mod event;
mod memory;
pub mod metrics;
mod producer;
mod registry;

pub use batch::{validate_batch, BatchEntry, BatchQueue, EntryFailure, EntryOutcome};
pub use config::ConsumerConfig;
pub use consumer::StreamConsumer;
pub use dlq::{DeadLetter, DeadLetterSink, DlqManager, DlqStats};
pub use error::{ErrorCategory, StreamError};
pub use event::StreamEvent;
pub use memory::{InMemoryDeadLetters, InMemoryQueue};
pub use metrics::{init_metrics, QueueMetrics};
pub use producer::StreamProducer;
pub use registry::{MessageKey, StreamDef};
