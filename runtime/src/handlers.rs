//! Handlers that turn consumed events into audit records.
//!
//! - [`ProductEventsHandler`]: `PRODUCT_CREATED`, `PRODUCT_UPDATED`, `PRODUCT_DELETED`
//! - [`ProductFailureEventsHandler`]: `PRODUCT_FAILURE`
//!
//! Both write through a shared [`AuditRecorder`], which stamps the record
//! with the current time and moves it to the next millisecond when the sort
//! key is already taken.

use crate::dispatcher::{HandlerFuture, InboundEvent, MessageHandler};
use crate::metrics::AuditMetrics;
use product_audit_core::audit::{AuditRecord, AuditStore, Provenance, StoreError};
use product_audit_core::dispatch::DispatchError;
use product_audit_core::environment::Clock;
use product_audit_core::event::{EventType, ProductEvent, ProductFailureEvent};
use std::sync::Arc;

/// Rekey attempts after a sort key collision before giving up.
pub const MAX_KEY_CONFLICT_RETRIES: u32 = 5;

/// Writes audit records stamped with the clock's current time.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditRecorder {
    /// Recorder writing to `store` with timestamps from `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Build a record at the current time and persist it.
    ///
    /// On [`StoreError::KeyConflict`] the record is rekeyed one millisecond
    /// later, up to [`MAX_KEY_CONFLICT_RETRIES`] times. Returns the record
    /// as written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails or the conflict persists.
    pub async fn record(
        &self,
        build: impl FnOnce(i64) -> AuditRecord + Send,
    ) -> Result<AuditRecord, StoreError> {
        let mut record = build(self.clock.now_millis());
        let mut retries = 0;

        loop {
            match self.store.put(&record).await {
                Ok(()) => return Ok(record),
                Err(e) if e.is_key_conflict() && retries < MAX_KEY_CONFLICT_RETRIES => {
                    AuditMetrics::record_key_conflict();
                    retries += 1;
                    tracing::debug!(pk = %record.pk, sk = %record.sk, retries, "Sort key taken, rekeying");
                    let next = record.created_at + 1;
                    record = record.rekeyed(next);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn provenance(event: &InboundEvent) -> Provenance {
    Provenance::new(
        event.message_id.as_str(),
        event.correlation_id.as_str(),
        event.trace_id.as_str(),
    )
}

/// Audits created, updated and deleted products.
#[derive(Clone)]
pub struct ProductEventsHandler {
    recorder: AuditRecorder,
}

impl ProductEventsHandler {
    /// Handler writing through `recorder`.
    #[must_use]
    pub const fn new(recorder: AuditRecorder) -> Self {
        Self { recorder }
    }

    async fn audit(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        let payload: ProductEvent = event
            .payload()
            .map_err(|e| DispatchError::Structural(e.to_string()))?;

        let provenance = provenance(event);
        let event_type = event.event_type;
        let record = self
            .recorder
            .record(|now| AuditRecord::product(event_type, &payload, provenance, now))
            .await?;

        AuditMetrics::record_written(event_type);
        tracing::info!(
            event_type = %event_type,
            message_id = %event.message_id,
            request_id = %event.correlation_id,
            trace_id = %event.trace_id,
            product_id = %payload.id,
            sk = %record.sk,
            "Product event audited"
        );
        Ok(())
    }
}

impl MessageHandler for ProductEventsHandler {
    fn accepts(&self, event_type: EventType) -> bool {
        event_type.is_product_event()
    }

    fn handle<'a>(&'a self, event: &'a InboundEvent) -> HandlerFuture<'a> {
        Box::pin(self.audit(event))
    }
}

/// Audits failed product operations.
#[derive(Clone)]
pub struct ProductFailureEventsHandler {
    recorder: AuditRecorder,
}

impl ProductFailureEventsHandler {
    /// Handler writing through `recorder`.
    #[must_use]
    pub const fn new(recorder: AuditRecorder) -> Self {
        Self { recorder }
    }

    async fn audit(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        let payload: ProductFailureEvent = event
            .payload()
            .map_err(|e| DispatchError::Structural(e.to_string()))?;

        let provenance = provenance(event);
        let record = self
            .recorder
            .record(|now| AuditRecord::failure(&payload, provenance, now))
            .await?;

        AuditMetrics::record_written(EventType::ProductFailure);
        tracing::info!(
            event_type = %EventType::ProductFailure,
            message_id = %event.message_id,
            request_id = %event.correlation_id,
            trace_id = %event.trace_id,
            product_id = payload.id.as_deref().unwrap_or_default(),
            status = payload.status,
            sk = %record.sk,
            "Failure event audited"
        );
        Ok(())
    }
}

impl MessageHandler for ProductFailureEventsHandler {
    fn accepts(&self, event_type: EventType) -> bool {
        event_type == EventType::ProductFailure
    }

    fn handle<'a>(&'a self, event: &'a InboundEvent) -> HandlerFuture<'a> {
        Box::pin(self.audit(event))
    }
}
