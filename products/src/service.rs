//! Product mutations that announce themselves on the event topic.
//!
//! Every successful mutation publishes the matching product event. Every
//! failed operation publishes a `PRODUCT_FAILURE` event describing the error
//! before the error is returned to the caller.

use crate::error::ProductError;
use crate::product::{Product, ProductDraft};
use crate::repository::ProductRepository;
use product_audit_core::context::RequestContext;
use product_audit_core::event::EventType;
use product_audit_runtime::EventPublisher;

/// What to do when a mutation succeeded but its event could not be published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublishPolicy {
    /// Fail the operation with [`ProductError::Publish`]. The mutation stays applied.
    #[default]
    Required,
    /// Log a warning and return the mutation result. The audit trail misses the event.
    BestEffort,
}

/// Product operations over a repository and an event publisher.
pub struct ProductService<R> {
    repository: R,
    publisher: EventPublisher,
    policy: PublishPolicy,
}

impl<R: ProductRepository> ProductService<R> {
    /// Service with [`PublishPolicy::Required`].
    #[must_use]
    pub fn new(repository: R, publisher: EventPublisher) -> Self {
        Self {
            repository,
            publisher,
            policy: PublishPolicy::default(),
        }
    }

    /// Use `policy` for publish failures after a mutation.
    #[must_use]
    pub const fn with_publish_policy(mut self, policy: PublishPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying repository.
    pub const fn repository(&self) -> &R {
        &self.repository
    }

    /// Create a product with a fresh id and publish `PRODUCT_CREATED`.
    ///
    /// # Errors
    ///
    /// - [`ProductError::Invalid`] if the draft is malformed
    /// - [`ProductError::DuplicateCode`] if the code is taken
    /// - [`ProductError::Repository`] if storage fails
    /// - [`ProductError::Publish`] under [`PublishPolicy::Required`] if the event is lost
    pub async fn create(&self, draft: ProductDraft, ctx: &RequestContext) -> Result<Product, ProductError> {
        let result = self.try_create(draft, ctx).await;
        self.reported(result, ctx).await
    }

    /// Replace product `id` and publish `PRODUCT_UPDATED`.
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), plus [`ProductError::NotFound`].
    pub async fn update(
        &self,
        id: &str,
        draft: ProductDraft,
        ctx: &RequestContext,
    ) -> Result<Product, ProductError> {
        let result = self.try_update(id, draft, ctx).await;
        self.reported(result, ctx).await
    }

    /// Delete product `id` and publish `PRODUCT_DELETED` with its last state.
    ///
    /// # Errors
    ///
    /// - [`ProductError::NotFound`] if no product has this id
    /// - [`ProductError::Repository`] if storage fails
    /// - [`ProductError::Publish`] under [`PublishPolicy::Required`] if the event is lost
    pub async fn delete(&self, id: &str, ctx: &RequestContext) -> Result<Product, ProductError> {
        let result = self.try_delete(id, ctx).await;
        self.reported(result, ctx).await
    }

    /// Look up product `id`. Publishes nothing on success.
    ///
    /// # Errors
    ///
    /// - [`ProductError::NotFound`] if no product has this id
    /// - [`ProductError::Repository`] if storage fails
    pub async fn find(&self, id: &str, ctx: &RequestContext) -> Result<Product, ProductError> {
        let result = self.repository.find(id).await;
        self.reported(result, ctx).await
    }

    async fn try_create(&self, draft: ProductDraft, ctx: &RequestContext) -> Result<Product, ProductError> {
        if let Some(reason) = draft.problem() {
            return Err(ProductError::Invalid {
                id: None,
                reason: reason.to_string(),
            });
        }

        let product = draft.with_id(uuid::Uuid::new_v4().to_string());
        let product = self.repository.insert(&product).await?;
        self.announce(&product, EventType::ProductCreated, ctx).await?;
        Ok(product)
    }

    async fn try_update(
        &self,
        id: &str,
        draft: ProductDraft,
        ctx: &RequestContext,
    ) -> Result<Product, ProductError> {
        if let Some(reason) = draft.problem() {
            return Err(ProductError::Invalid {
                id: Some(id.to_string()),
                reason: reason.to_string(),
            });
        }

        let product = self.repository.replace(&draft.with_id(id)).await?;
        self.announce(&product, EventType::ProductUpdated, ctx).await?;
        Ok(product)
    }

    async fn try_delete(&self, id: &str, ctx: &RequestContext) -> Result<Product, ProductError> {
        let product = self.repository.remove(id).await?;
        self.announce(&product, EventType::ProductDeleted, ctx).await?;
        Ok(product)
    }

    async fn announce(
        &self,
        product: &Product,
        event_type: EventType,
        ctx: &RequestContext,
    ) -> Result<(), ProductError> {
        match self
            .publisher
            .publish_product_event(&product.event(), event_type, ctx)
            .await
        {
            Ok(message_id) => {
                tracing::info!(
                    event_type = %event_type,
                    product_id = %product.id,
                    message_id = %message_id,
                    request_id = ctx.correlation_id().unwrap_or_default(),
                    trace_id = %ctx.trace_id,
                    "Product event sent"
                );
                Ok(())
            }
            Err(source) => match self.policy {
                PublishPolicy::Required => Err(ProductError::Publish {
                    id: product.id.clone(),
                    source,
                }),
                PublishPolicy::BestEffort => {
                    tracing::warn!(
                        event_type = %event_type,
                        product_id = %product.id,
                        request_id = ctx.correlation_id().unwrap_or_default(),
                        error = %source,
                        "Product event not sent; continuing"
                    );
                    Ok(())
                }
            },
        }
    }

    /// Publish a failure event for `result` if it is an error, then pass it through.
    async fn reported<T>(&self, result: Result<T, ProductError>, ctx: &RequestContext) -> Result<T, ProductError> {
        if let Err(error) = &result {
            self.report_failure(error, ctx).await;
        }
        result
    }

    async fn report_failure(&self, error: &ProductError, ctx: &RequestContext) {
        let request_id = ctx.correlation_id().unwrap_or_default();

        // The topic just failed; a failure event would most likely be lost too.
        if matches!(error, ProductError::Publish { .. }) {
            tracing::error!(
                product_id = error.product_id().unwrap_or_default(),
                request_id,
                trace_id = %ctx.trace_id,
                status = error.status(),
                error = %error,
                "Product operation failed"
            );
            return;
        }

        match self.publisher.publish_failure(&error.failure_event(), ctx).await {
            Ok(message_id) => tracing::error!(
                product_id = error.product_id().unwrap_or_default(),
                message_id = %message_id,
                request_id,
                trace_id = %ctx.trace_id,
                status = error.status(),
                error = %error,
                "Product operation failed"
            ),
            Err(publish_error) => tracing::error!(
                product_id = error.product_id().unwrap_or_default(),
                request_id,
                trace_id = %ctx.trace_id,
                status = error.status(),
                error = %error,
                publish_error = %publish_error,
                "Product operation failed and its failure event was not sent"
            ),
        }
    }
}
