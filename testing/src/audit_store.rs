//! In-memory [`AuditStore`] with failure injection.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use product_audit_core::audit::{AuditQuery, AuditRecord, AuditStore, SortOrder, StoreError, StoreFuture};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// In-memory audit store keyed by `(pk, sk)`.
///
/// Writes never overwrite: an existing key yields [`StoreError::KeyConflict`].
///
/// # Failure injection
///
/// - [`fail_next_puts`](Self::fail_next_puts): the next `n` writes fail with
///   [`StoreError::Unavailable`]
/// - [`set_unavailable`](Self::set_unavailable): every operation fails until reset
///
/// # Example
///
/// ```
/// use product_audit_testing::InMemoryAuditStore;
///
/// let store = InMemoryAuditStore::new();
/// store.fail_next_puts(2);
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: Mutex<BTreeMap<(String, String), AuditRecord>>,
    failing_puts: AtomicU32,
    unavailable: AtomicBool,
    put_attempts: AtomicU64,
}

impl InMemoryAuditStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Fail every operation while `unavailable` is set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `put` calls, successful or not.
    #[must_use]
    pub fn put_attempts(&self) -> u64 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    /// All stored records, ordered by `(pk, sk)`.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a record directly, bypassing conflict checks and failure injection.
    pub fn insert(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap()
            .insert((record.pk.clone(), record.sk.clone()), record);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn put<'a>(&'a self, record: &'a AuditRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.put_attempts.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            if self.take_injected_failure() {
                return Err(StoreError::Unavailable("injected write failure".to_string()));
            }

            let key = (record.pk.clone(), record.sk.clone());
            let mut records = self.records.lock().unwrap();
            if records.contains_key(&key) {
                return Err(StoreError::KeyConflict {
                    pk: key.0,
                    sk: key.1,
                });
            }
            records.insert(key, record.clone());
            Ok(())
        })
    }

    fn query<'a>(&'a self, query: &'a AuditQuery) -> StoreFuture<'a, Vec<AuditRecord>> {
        Box::pin(async move {
            self.check_available()?;

            let mut matching: Vec<AuditRecord> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|record| query.matches(record))
                .cloned()
                .collect();

            matching.sort_by_key(|record| record.created_at);
            if query.order == SortOrder::Descending {
                matching.reverse();
            }
            matching.truncate(query.limit);
            Ok(matching)
        })
    }

    fn purge_expired(&self, now_epoch_secs: i64) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;

            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, record| !record.is_expired(now_epoch_secs));
            Ok((before - records.len()) as u64)
        })
    }
}
