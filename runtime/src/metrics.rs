//! Prometheus metrics for the product event pipeline.
//!
//! This module provides metric collection for:
//! - Queue consumption and ack/nack outcomes
//! - Audit record writes, key conflicts and expiry
//! - Event publishing
//!
//! # Example
//!
//! ```rust,no_run
//! use product_audit_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use product_audit_core::event::EventType;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the
    /// listener is not started and a warning is logged.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                let addr = self.addr;
                tokio::spawn(async move {
                    if let Err(_e) = exporter.await {
                        tracing::error!(%addr, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Consumer Metrics
    describe_counter!(
        "audit_messages_received_total",
        "Total number of messages received from audit queues"
    );
    describe_counter!(
        "audit_messages_acked_total",
        "Total number of messages acknowledged"
    );
    describe_counter!(
        "audit_messages_nacked_total",
        "Total number of messages released for redelivery, by failure reason"
    );
    describe_histogram!(
        "audit_dispatch_duration_seconds",
        "Time taken to parse and dispatch one message"
    );

    // Audit Store Metrics
    describe_counter!(
        "audit_records_written_total",
        "Total number of audit records written, by event type"
    );
    describe_counter!(
        "audit_key_conflicts_total",
        "Total number of audit writes that collided with an existing sort key"
    );
    describe_counter!(
        "audit_records_purged_total",
        "Total number of expired audit records removed by the sweeper"
    );

    // Publisher Metrics
    describe_counter!(
        "events_published_total",
        "Total number of events published, by event type"
    );
    describe_counter!(
        "events_publish_failed_total",
        "Total number of failed publish attempts"
    );
}

/// Queue consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a received batch.
    pub fn record_received(queue: &str, count: usize) {
        counter!("audit_messages_received_total", "queue" => queue.to_string())
            .increment(count as u64);
    }

    /// Record an acknowledged message.
    pub fn record_ack(queue: &str, duration: Duration) {
        counter!("audit_messages_acked_total", "queue" => queue.to_string()).increment(1);
        histogram!("audit_dispatch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a released message.
    pub fn record_nack(queue: &str, reason: &'static str, duration: Duration) {
        counter!(
            "audit_messages_nacked_total",
            "queue" => queue.to_string(),
            "reason" => reason
        )
        .increment(1);
        histogram!("audit_dispatch_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Audit store metrics recorder.
pub struct AuditMetrics;

impl AuditMetrics {
    /// Record a written audit record.
    pub fn record_written(event_type: EventType) {
        counter!("audit_records_written_total", "event_type" => event_type.as_str()).increment(1);
    }

    /// Record a sort key collision.
    pub fn record_key_conflict() {
        counter!("audit_key_conflicts_total").increment(1);
    }

    /// Record records removed by expiry.
    pub fn record_purged(count: u64) {
        counter!("audit_records_purged_total").increment(count);
    }
}

/// Publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record a published event.
    pub fn record_publish(event_type: EventType) {
        counter!("events_published_total", "event_type" => event_type.as_str()).increment(1);
    }

    /// Record a failed publish.
    pub fn record_publish_error(event_type: EventType) {
        counter!("events_publish_failed_total", "event_type" => event_type.as_str()).increment(1);
    }
}
