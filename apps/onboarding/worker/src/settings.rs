//! Worker settings, loaded once at startup.

use core_config::redis::RedisConfig;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use domain_onboarding::{FanOutConfig, IngestionConfig, UserChangeStream, UserNotificationStream, WelcomeEmailStream};
use std::net::SocketAddr;
use stream_queue::StreamDef;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub redis: RedisConfig,
    /// Prometheus scrape port.
    pub metrics_port: u16,
    /// Consumer name within each consumer group.
    pub consumer_id: String,
    /// Entries read per `XREADGROUP`.
    pub read_batch_size: usize,
    pub block_ms: u64,
    /// Delay before entries left pending are read again.
    pub redeliver_after_ms: u64,
    pub notifications_stream: String,
    pub changes_stream: String,
    pub welcome_queue: String,
    pub dlq_stream: String,
    pub ingestion: IngestionConfig,
    pub fan_out: FanOutConfig,
}

impl WorkerSettings {
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.metrics_port))
    }
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let read_batch_size = env_parse("WORKER_READ_BATCH", 100usize)?;
        if read_batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_READ_BATCH".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            redis: RedisConfig::from_env()?,
            metrics_port: env_parse("METRICS_PORT", 9090u16)?,
            consumer_id: env_or_default("WORKER_ID", &format!("worker-{}", uuid::Uuid::new_v4().simple())),
            read_batch_size,
            block_ms: env_parse("WORKER_BLOCK_MS", 1_000u64)?,
            redeliver_after_ms: env_parse("WORKER_REDELIVER_AFTER_MS", 5_000u64)?,
            notifications_stream: env_or_default("USER_NOTIFICATIONS_STREAM", UserNotificationStream::STREAM_NAME),
            changes_stream: env_or_default("USER_CHANGES_STREAM", UserChangeStream::STREAM_NAME),
            welcome_queue: env_or_default("WELCOME_QUEUE", WelcomeEmailStream::STREAM_NAME),
            dlq_stream: env_or_default("DLQ_STREAM", WelcomeEmailStream::DLQ_STREAM),
            ingestion: IngestionConfig::from_env()?,
            fan_out: FanOutConfig::from_env()?,
        })
    }
}
