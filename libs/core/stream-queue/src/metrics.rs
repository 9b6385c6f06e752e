//! Prometheus metrics for queues and dead-letter sinks
//!
//! Provides observability into batch submissions and dead-lettering.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

use crate::error::StreamError;

static PROMETHEUS_INSTALLED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime. Subsequent calls are no-ops.
pub fn init_metrics(addr: SocketAddr) -> Result<(), StreamError> {
    PROMETHEUS_INSTALLED
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| StreamError::Config(format!("Prometheus exporter: {}", e)))?;
            info!(%addr, "Prometheus metrics initialized");
            Ok(addr)
        })
        .map(|_| ())
}

/// Queue metrics helper
#[derive(Clone, Debug)]
pub struct QueueMetrics {
    /// Queue name for labeling
    queue: String,
}

impl QueueMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    /// Record the outcome of one batch-submit call
    pub fn batch_submitted(&self, accepted: usize, failed: usize, duration: Duration) {
        counter!("stream_queue_batches_total", "queue" => self.queue.clone()).increment(1);

        counter!(
            "stream_queue_entries_total",
            "queue" => self.queue.clone(),
            "status" => "accepted"
        )
        .increment(accepted as u64);

        counter!(
            "stream_queue_entries_total",
            "queue" => self.queue.clone(),
            "status" => "failed"
        )
        .increment(failed as u64);

        histogram!("stream_queue_batch_duration_seconds", "queue" => self.queue.clone())
            .record(duration.as_secs_f64());
    }

    /// Record an entry moved to the dead-letter stream
    pub fn dead_lettered(&self, source: &str) {
        counter!(
            "stream_queue_dead_letters_total",
            "queue" => self.queue.clone(),
            "source" => source.to_string()
        )
        .increment(1);
    }
}
