//! # Product Audit Products
//!
//! The producing side of the audit pipeline: product mutations that publish
//! `PRODUCT_CREATED`, `PRODUCT_UPDATED` and `PRODUCT_DELETED` events, and a
//! `PRODUCT_FAILURE` event whenever an operation fails.
//!
//! # Example
//!
//! ```
//! use product_audit_core::context::{RequestContext, TraceId};
//! use product_audit_products::{InMemoryProductRepository, ProductDraft, ProductService};
//! use product_audit_runtime::EventPublisher;
//! use product_audit_testing::InMemoryBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let service = ProductService::new(
//!     InMemoryProductRepository::new(),
//!     EventPublisher::new(bus.topic.clone()),
//! );
//!
//! let ctx = RequestContext::new(Some("req-1".into()), TraceId::new("1-00000000-abc"));
//! let draft = ProductDraft {
//!     name: "Widget".into(),
//!     code: "ABC12".into(),
//!     price: 99.9,
//!     model: "W1".into(),
//!     url: "https://example.com/widget".into(),
//! };
//! let product = service.create(draft, &ctx).await?;
//! assert_eq!(bus.product_events.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod product;
pub mod repository;
pub mod service;

pub use error::ProductError;
pub use product::{Product, ProductDraft};
pub use repository::{InMemoryProductRepository, ProductRepository};
pub use service::{ProductService, PublishPolicy};
