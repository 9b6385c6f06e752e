//! Onboarding Worker
//!
//! Runs both onboarding stages against Redis streams.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (users:notifications)
//!   ↓ (Consumer Group: user_ingestion)
//! IngestionConsumer
//!   ↓ (write-once put + INSERT change entry)
//! Redis Stream (users:changes)
//!   ↓ (Consumer Group: welcome_fan_out)
//! FanOutConsumer
//!   ↓ (chunked batch submit with per-entry retry)
//! Redis Stream (email:welcome)
//! ```
//!
//! Failures that a policy marks fail-open land in the dead letter stream
//! (`onboarding:dlq`). Everything else stays pending and is redelivered.

pub mod connection;
pub mod settings;
mod triggers;

use core_config::{Environment, FromEnv};
use domain_onboarding::{FanOutConsumer, IngestionConsumer, RedisUserStore};
use eyre::{Result, WrapErr};
use settings::WorkerSettings;
use std::sync::Arc;
use std::time::Duration;
use stream_queue::{ConsumerConfig, DlqManager, StreamConsumer, StreamProducer};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Run the onboarding worker
///
/// This is the main entry point for the worker. It:
/// 1. Sets up error reports and structured logging
/// 2. Loads settings and installs the Prometheus exporter
/// 3. Connects to Redis
/// 4. Runs the ingestion and fan-out triggers until shutdown
///
/// # Errors
///
/// Returns an error if settings are invalid, Redis is unreachable, or a
/// trigger cannot create its consumer group.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    info!(version = env!("CARGO_PKG_VERSION"), ?environment, "Starting onboarding worker");

    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker settings")?;
    stream_queue::init_metrics(settings.metrics_addr()).wrap_err("Failed to install metrics exporter")?;

    info!("Connecting to Redis...");
    let redis = connection::connect_with_retry(&settings.redis.url, CONNECT_ATTEMPTS, CONNECT_INITIAL_DELAY)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let dead_letters = Arc::new(DlqManager::new(redis.clone(), settings.dlq_stream.clone()));
    let store = Arc::new(RedisUserStore::new(
        redis.clone(),
        settings.ingestion.users_table.clone(),
        settings.changes_stream.clone(),
    ));
    let queue = Arc::new(
        StreamProducer::new(redis.clone(), settings.welcome_queue.clone())
            .with_max_batch_size(settings.fan_out.max_batch_size),
    );

    let ingestion = Arc::new(IngestionConsumer::new(store, dead_letters.clone(), settings.ingestion.clone()));
    let fan_out = Arc::new(
        FanOutConsumer::new(queue, dead_letters.clone(), settings.fan_out.clone())
            .wrap_err("Failed to compile welcome templates")?,
    );

    info!(
        consumer_id = %settings.consumer_id,
        notifications = %settings.notifications_stream,
        changes = %settings.changes_stream,
        welcome_queue = %settings.welcome_queue,
        chunk_size = fan_out.chunk_size(),
        "Worker configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let redeliver_after = Duration::from_millis(settings.redeliver_after_ms);

    let ingestion_task = tokio::spawn(triggers::run_ingestion(
        StreamConsumer::new(redis.clone(), consumer_config(&settings, &settings.notifications_stream, "user_ingestion")),
        ingestion,
        redeliver_after,
        shutdown_rx.clone(),
    ));
    let fan_out_task = tokio::spawn(triggers::run_fan_out(
        StreamConsumer::new(redis, consumer_config(&settings, &settings.changes_stream, "welcome_fan_out")),
        fan_out,
        dead_letters,
        redeliver_after,
        shutdown_rx,
    ));

    let (ingestion_result, fan_out_result) = tokio::join!(ingestion_task, fan_out_task);
    ingestion_result
        .wrap_err("Ingestion trigger panicked")?
        .wrap_err("Ingestion trigger failed")?;
    fan_out_result
        .wrap_err("Fan-out trigger panicked")?
        .wrap_err("Fan-out trigger failed")?;

    info!("Onboarding worker stopped");
    Ok(())
}

fn consumer_config(settings: &WorkerSettings, stream: &str, group: &str) -> ConsumerConfig {
    ConsumerConfig::new(stream, group)
        .with_consumer_id(settings.consumer_id.clone())
        .with_batch_size(settings.read_batch_size)
        .with_blocking(Some(settings.block_ms))
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install signal handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
