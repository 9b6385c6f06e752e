//! Onboarding Domain
//!
//! Two independent consumers connected only through the user store's change
//! feed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Notification bus │  ← users:notifications
//! └────────┬─────────┘
//!          │
//! ┌────────▼──────────┐
//! │ IngestionConsumer │  ← validate, write-once put
//! └────────┬──────────┘
//!          │
//! ┌────────▼────────┐
//! │    UserStore    │  ← emits INSERT entries on users:changes
//! └────────┬────────┘
//!          │
//! ┌────────▼───────┐
//! │ FanOutConsumer │  ← filter INSERT, render, chunk, submit
//! └────────┬───────┘
//!          │
//! ┌────────▼────────┐
//! │   BatchQueue    │  ← email:welcome, consumed by the email sender
//! └─────────────────┘
//! ```
//!
//! Failures either consumer gives up on are written to a
//! [`DeadLetterSink`](stream_queue::DeadLetterSink). Whether the trigger then
//! sees `Ok` or `Err` is decided per error kind by [`PolicyConfig`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_onboarding::{FanOutConfig, FanOutConsumer};
//! use stream_queue::{DlqManager, StreamProducer};
//!
//! let queue = Arc::new(StreamProducer::from_stream_def::<WelcomeEmailStream>(redis.clone()));
//! let dlq = Arc::new(DlqManager::new(redis, ONBOARDING_DLQ));
//! let fan_out = FanOutConsumer::new(queue, dlq, FanOutConfig::from_env()?)?;
//!
//! let summary = fan_out.fan_out(&entries).await?;
//! ```

pub mod config;
pub mod error;
pub mod fanout;
pub mod ids;
pub mod ingest;
pub mod models;
pub mod policy;
pub mod store;
pub mod streams;
pub mod templates;

// Re-export commonly used types
pub use config::{FanOutConfig, IngestionConfig, WelcomeTemplateConfig};
pub use error::{FanOutError, IngestError, StoreError, TemplateError};
pub use fanout::FanOutConsumer;
pub use ids::JobIdAllocator;
pub use ingest::IngestionConsumer;
pub use models::{
    Ack, ChangeEntry, EmailJob, FanOutSummary, NewUserPayload, NotificationEvent, OperationType, UserRecord,
};
pub use policy::{ErrorKind, ErrorPolicy, PolicyConfig};
pub use store::{InMemoryUserStore, PutOutcome, RedisUserStore, UserStore};
pub use streams::{UserChangeStream, UserNotificationStream, WelcomeEmailStream, ONBOARDING_DLQ};
pub use templates::WelcomeTemplate;
