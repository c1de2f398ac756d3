//! # Product Audit Runtime
//!
//! The moving parts of the product event pipeline.
//!
//! ## Core Components
//!
//! - **Publisher**: encodes product and failure events and publishes them to the topic
//! - **Consumer**: long-polls one queue and settles every delivery with ack or nack
//! - **Dispatcher**: parses a delivery and hands it to the queue's handler
//! - **Handlers**: turn events into audit records
//! - **Sweeper**: purges expired audit records from stores without native TTL
//!
//! ## Example
//!
//! ```ignore
//! use product_audit_runtime::{
//!     AuditRecorder, ConsumerConfig, Dispatcher, ProductEventsHandler, QueueConsumer,
//!     ShutdownCoordinator,
//! };
//!
//! let recorder = AuditRecorder::new(store, clock);
//! let dispatcher = Dispatcher::new("product-events", Arc::new(ProductEventsHandler::new(recorder)));
//! let consumer = QueueConsumer::new(queue, dispatcher, ConsumerConfig::default());
//!
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
//! let shutdown = coordinator.subscribe();
//! coordinator.spawn("product-events", async move { consumer.run(shutdown).await });
//! ```

/// Long-polling queue consumer
pub mod consumer;

/// Per-message parse and dispatch
pub mod dispatcher;

/// Audit record handlers
pub mod handlers;

/// Prometheus metrics for observability
pub mod metrics;

/// Product event publisher
pub mod publisher;

/// Graceful shutdown coordination
pub mod shutdown;

/// Expired record sweeper
pub mod sweeper;

pub use consumer::{ConsumerConfig, QueueConsumer};
pub use dispatcher::{Dispatcher, HandlerFuture, InboundEvent, MessageHandler};
pub use handlers::{AuditRecorder, ProductEventsHandler, ProductFailureEventsHandler};
pub use publisher::{EventPublisher, PublishError};
pub use shutdown::{Shutdown, ShutdownCoordinator, wait_for_signal};
pub use sweeper::ExpirySweeper;
