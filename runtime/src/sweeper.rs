//! Periodic removal of expired audit records.
//!
//! Stores without native TTL expiry rely on this task to delete records
//! whose `ttl` has passed.

use crate::metrics::AuditMetrics;
use crate::shutdown::Shutdown;
use product_audit_core::audit::{AuditStore, StoreError};
use product_audit_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Default pause between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Calls [`AuditStore::purge_expired`] on a fixed interval.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Sweeper for `store`, running every `interval`.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
        }
    }

    /// Purge once at the clock's current time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let now = self.clock.now().timestamp();
        let purged = self.store.purge_expired(now).await?;
        if purged > 0 {
            AuditMetrics::record_purged(purged);
            tracing::info!(purged, now, "Purged expired audit records");
        }
        Ok(purged)
    }

    /// Sweep every interval until `shutdown` fires.
    ///
    /// The first sweep runs immediately. Failures are logged and retried at
    /// the next tick.
    pub async fn run(&self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "Expiry sweeper started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!(error = %e, "Expiry sweep failed");
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use product_audit_core::audit::{AuditRecord, Provenance};
    use product_audit_core::event::ProductFailureEvent;
    use product_audit_testing::{InMemoryAuditStore, ManualClock, test_clock};

    fn record_at(created_at_ms: i64) -> AuditRecord {
        let event = ProductFailureEvent {
            id: None,
            status: 500,
            error: "boom".to_string(),
        };
        AuditRecord::failure(&event, Provenance::new("m", "r", "t"), created_at_ms)
    }

    #[tokio::test]
    async fn sweep_removes_records_once_ttl_passes() {
        let store = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let start = clock.now_millis();
        store.insert(record_at(start));
        store.insert(record_at(start + 60_000));

        let sweeper = ExpirySweeper::new(store.clone(), clock.clone(), DEFAULT_SWEEP_INTERVAL);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(300));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(store.len(), 1);

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_until_shutdown() {
        let store = Arc::new(InMemoryAuditStore::new());
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        store.insert(record_at(clock.now_millis() - 400_000));

        let sweeper = ExpirySweeper::new(store.clone(), clock, Duration::from_secs(1));
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let shutdown = coordinator.subscribe();
        coordinator.spawn("sweeper", async move { sweeper.run(shutdown).await });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.is_empty());

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let store = Arc::new(InMemoryAuditStore::new());
        store.set_unavailable(true);
        let sweeper = ExpirySweeper::new(store, Arc::new(test_clock()), DEFAULT_SWEEP_INTERVAL);

        assert!(sweeper.sweep_once().await.is_err());
    }
}
