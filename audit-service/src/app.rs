//! Application wiring.
//!
//! [`AuditPipeline`] builds the two queue consumers and the expiry sweeper
//! over any store and transport. [`run`] connects them to `PostgreSQL` and
//! Redpanda and drives them until shutdown.

use crate::config::Config;
use product_audit_core::audit::{AuditStore, StoreError};
use product_audit_core::environment::{Clock, SystemClock};
use product_audit_core::routing::FilterPolicy;
use product_audit_core::transport::{MessageQueue, TransportError};
use product_audit_postgres::{DEFAULT_TABLE, PostgresAuditStore};
use product_audit_redpanda::RedpandaQueue;
use product_audit_runtime::metrics::{MetricsError, MetricsServer};
use product_audit_runtime::{
    AuditRecorder, ConsumerConfig, Dispatcher, ExpirySweeper, ProductEventsHandler,
    ProductFailureEventsHandler, QueueConsumer, ShutdownCoordinator,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Application errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// The audit store could not be reached or prepared
    #[error("Audit store error: {0}")]
    Store(#[from] StoreError),

    /// A queue could not be created
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The metrics exporter could not start
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Tasks that did not stop within the shutdown timeout
    #[error("Shutdown incomplete: {}", .0.join("; "))]
    Shutdown(Vec<String>),
}

/// Audit consumers and sweeper over one store.
#[derive(Clone)]
pub struct AuditPipeline {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    recorder: AuditRecorder,
}

impl AuditPipeline {
    /// Pipeline writing to `store` with timestamps from `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        let recorder = AuditRecorder::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            recorder,
        }
    }

    /// Consumer writing product audit records from `queue`.
    #[must_use]
    pub fn product_events_consumer(&self, queue: Arc<dyn MessageQueue>, config: ConsumerConfig) -> QueueConsumer {
        let handler = Arc::new(ProductEventsHandler::new(self.recorder.clone()));
        let dispatcher = Dispatcher::new(queue.name(), handler);
        QueueConsumer::new(queue, dispatcher, config)
    }

    /// Consumer writing failure audit records from `queue`.
    #[must_use]
    pub fn failure_events_consumer(&self, queue: Arc<dyn MessageQueue>, config: ConsumerConfig) -> QueueConsumer {
        let handler = Arc::new(ProductFailureEventsHandler::new(self.recorder.clone()));
        let dispatcher = Dispatcher::new(queue.name(), handler);
        QueueConsumer::new(queue, dispatcher, config)
    }

    /// Sweeper purging expired records every `interval`.
    #[must_use]
    pub fn sweeper(&self, interval: Duration) -> ExpirySweeper {
        ExpirySweeper::new(self.store.clone(), self.clock.clone(), interval)
    }

    /// Spawn both consumers and the sweeper on `coordinator`.
    pub fn spawn(
        &self,
        coordinator: &mut ShutdownCoordinator,
        product_events: Arc<dyn MessageQueue>,
        failure_events: Arc<dyn MessageQueue>,
        consumer_config: &ConsumerConfig,
        sweep_interval: Duration,
    ) {
        let consumers = [
            self.product_events_consumer(product_events, consumer_config.clone()),
            self.failure_events_consumer(failure_events, consumer_config.clone()),
        ];
        for consumer in consumers {
            let shutdown = coordinator.subscribe();
            let name = format!("consumer:{}", consumer.queue_name());
            coordinator.spawn(name, async move { consumer.run(shutdown).await });
        }

        let sweeper = self.sweeper(sweep_interval);
        let shutdown = coordinator.subscribe();
        coordinator.spawn("expiry-sweeper", async move { sweeper.run(shutdown).await });
    }
}

/// Connect the audit store.
///
/// The default table is created by the embedded migrations; any other table
/// name gets the same schema through [`PostgresAuditStore::ensure_schema`].
///
/// # Errors
///
/// Returns [`StoreError`] if the database is unreachable, the table name is
/// invalid or the schema cannot be created.
pub async fn connect_store(config: &Config) -> Result<PostgresAuditStore, StoreError> {
    let database = &config.database;
    let store = PostgresAuditStore::connect(&database.url, database.max_connections)
        .await?
        .with_table(database.table.clone())?;

    if store.table() == DEFAULT_TABLE {
        store.migrate().await?;
    } else {
        store.ensure_schema().await?;
    }
    tracing::info!(table = store.table(), "Audit store ready");
    Ok(store)
}

/// Build the Redpanda queue named `queue` with `filter`.
///
/// # Errors
///
/// Returns [`TransportError`] if the consumer cannot be created.
pub fn connect_queue(config: &Config, queue: &str, filter: FilterPolicy) -> Result<RedpandaQueue, TransportError> {
    RedpandaQueue::builder()
        .brokers(&config.transport.brokers)
        .topic(&config.transport.topic)
        .queue(queue)
        .filter(filter)
        .redrive(config.redrive_policy())
        .build()
}

/// Run the service until `shutdown_signal` completes.
///
/// # Errors
///
/// Returns [`AppError`] if startup fails or tasks do not stop within the
/// shutdown timeout.
pub async fn run(config: Config, shutdown_signal: impl Future<Output = ()>) -> Result<(), AppError> {
    let mut metrics = MetricsServer::new(config.service.metrics_addr);
    metrics.start()?;

    let store = connect_store(&config).await?;
    let product_events = connect_queue(
        &config,
        &config.transport.product_events_queue,
        FilterPolicy::product_events(),
    )?;
    let failure_events = connect_queue(
        &config,
        &config.transport.failure_events_queue,
        FilterPolicy::failure_events(),
    )?;

    let pipeline = AuditPipeline::new(Arc::new(store), Arc::new(SystemClock));
    let mut coordinator = ShutdownCoordinator::new(config.shutdown_timeout());
    pipeline.spawn(
        &mut coordinator,
        Arc::new(product_events),
        Arc::new(failure_events),
        &config.consumer_config(),
        config.sweep_interval(),
    );

    tracing::info!(
        topic = %config.transport.topic,
        product_events_queue = %config.transport.product_events_queue,
        failure_events_queue = %config.transport.failure_events_queue,
        dead_letter_queue = %config.transport.dead_letter_queue,
        tasks = coordinator.task_count(),
        "Audit service running"
    );

    shutdown_signal.await;
    coordinator.shutdown().await.map_err(AppError::Shutdown)?;
    tracing::info!("Audit service stopped");
    Ok(())
}
