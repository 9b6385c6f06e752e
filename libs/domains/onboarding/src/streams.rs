//! Stream definitions for the onboarding domain.

use stream_queue::StreamDef;

/// Dead letters from both consumers share one stream.
pub const ONBOARDING_DLQ: &str = "onboarding:dlq";

/// Inbound "new user" notifications (field `payload`).
pub struct UserNotificationStream;

impl StreamDef for UserNotificationStream {
    const STREAM_NAME: &'static str = "users:notifications";
    const CONSUMER_GROUP: &'static str = "user_ingestion";
    const DLQ_STREAM: &'static str = ONBOARDING_DLQ;
}

/// Store change feed (field `entry`).
pub struct UserChangeStream;

impl StreamDef for UserChangeStream {
    const STREAM_NAME: &'static str = "users:changes";
    const CONSUMER_GROUP: &'static str = "welcome_fan_out";
    const DLQ_STREAM: &'static str = ONBOARDING_DLQ;
}

/// Outbound welcome-email jobs (fields `job_id` and `job`).
pub struct WelcomeEmailStream;

impl StreamDef for WelcomeEmailStream {
    const STREAM_NAME: &'static str = "email:welcome";
    const CONSUMER_GROUP: &'static str = "email_senders";
    const DLQ_STREAM: &'static str = ONBOARDING_DLQ;

    /// Provider limit per batch-submit call.
    const MAX_BATCH_ENTRIES: usize = 10;
}
