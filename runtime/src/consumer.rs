//! Long-polling consumer loop for one queue.
//!
//! ```text
//! loop {
//!     receive(max_messages, wait_time)      // long poll
//!     for each delivery, concurrently:
//!         dispatcher.process(delivery)      // parse → handle
//!         ack | nack                        // settle
//! }
//! ```
//!
//! A shutdown signal stops polling; a batch already received is processed
//! and settled before [`QueueConsumer::run`] returns.

use crate::dispatcher::Dispatcher;
use crate::metrics::ConsumerMetrics;
use crate::shutdown::Shutdown;
use futures::future::join_all;
use product_audit_core::dispatch::Disposition;
use product_audit_core::transport::{Delivery, MessageQueue, TransportError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Polling parameters of a [`QueueConsumer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Upper bound on messages per receive
    pub max_messages: usize,
    /// Long-poll wait per receive
    pub wait_time: Duration,
    /// Pause after a failed receive
    pub receive_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(10),
            receive_backoff: Duration::from_secs(1),
        }
    }
}

impl ConsumerConfig {
    /// Set the batch size; zero is raised to one.
    #[must_use]
    pub const fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = if max_messages == 0 { 1 } else { max_messages };
        self
    }

    /// Set the long-poll wait.
    #[must_use]
    pub const fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// Set the pause after a failed receive.
    #[must_use]
    pub const fn with_receive_backoff(mut self, backoff: Duration) -> Self {
        self.receive_backoff = backoff;
        self
    }
}

/// Consumes one queue until shutdown.
#[derive(Clone)]
pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    dispatcher: Dispatcher,
    config: ConsumerConfig,
}

impl QueueConsumer {
    /// Consumer feeding `queue` into `dispatcher`.
    #[must_use]
    pub fn new(queue: Arc<dyn MessageQueue>, dispatcher: Dispatcher, config: ConsumerConfig) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    /// Name of the consumed queue.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Poll until `shutdown` fires.
    ///
    /// Receive errors are logged and retried after
    /// [`ConsumerConfig::receive_backoff`]; they never end the loop.
    pub async fn run(&self, mut shutdown: Shutdown) {
        tracing::info!(
            queue = %self.queue.name(),
            max_messages = self.config.max_messages,
            wait_time = ?self.config.wait_time,
            "Consumer started"
        );

        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.recv() => break,
                received = self.queue.receive(self.config.max_messages, self.config.wait_time) => received,
            };

            match received {
                Ok(batch) => {
                    self.process_batch(batch).await;
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.queue.name(),
                        error = %e,
                        backoff = ?self.config.receive_backoff,
                        "Receive failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        () = tokio::time::sleep(self.config.receive_backoff) => {},
                    }
                }
            }
        }

        tracing::info!(queue = %self.queue.name(), "Consumer stopped");
    }

    /// Receive and process a single batch.
    ///
    /// Returns the number of deliveries processed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the receive fails. Settle failures are
    /// logged, not returned.
    pub async fn poll_once(&self) -> Result<usize, TransportError> {
        let batch = self
            .queue
            .receive(self.config.max_messages, self.config.wait_time)
            .await?;
        let count = batch.len();
        self.process_batch(batch).await;
        Ok(count)
    }

    async fn process_batch(&self, batch: Vec<Delivery>) {
        if batch.is_empty() {
            return;
        }
        ConsumerMetrics::record_received(self.queue.name(), batch.len());
        tracing::debug!(queue = %self.queue.name(), count = batch.len(), "Received batch");

        join_all(batch.iter().map(|delivery| self.process_one(delivery))).await;
    }

    async fn process_one(&self, delivery: &Delivery) {
        let started = Instant::now();
        let result = self.dispatcher.dispatch(delivery).await;
        let disposition = self.dispatcher.classify(delivery, &result);
        let queue = self.queue.name();

        let settled = match disposition {
            Disposition::Ack => {
                ConsumerMetrics::record_ack(queue, started.elapsed());
                self.queue.ack(&delivery.receipt).await
            }
            Disposition::Nack => {
                let reason = result.as_ref().err().map_or("unknown", |e| e.reason());
                ConsumerMetrics::record_nack(queue, reason, started.elapsed());
                self.queue.nack(&delivery.receipt).await
            }
        };

        if let Err(e) = settled {
            tracing::error!(
                queue = %queue,
                message_id = %delivery.message_id,
                disposition = ?disposition,
                error = %e,
                "Failed to settle message"
            );
        }
    }
}
