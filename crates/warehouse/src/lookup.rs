//! Cached warehouse lookups shared by all workers.

use crate::store::WarehouseStore;
use dashmap::DashMap;
use rodwatch_core::{ReferenceStatus, StoredObject, WarehouseKey, WarehouseRecord};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Counters describing lookup traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LookupStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub found: u64,
    pub absent: u64,
    pub unavailable: u64,
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    found: AtomicU64,
    absent: AtomicU64,
    unavailable: AtomicU64,
}

/// Resolves an object's expected reference state.
///
/// Successful answers (including "no record") are cached per key for the
/// lifetime of the lookup. Failures are not cached so a later object with the
/// same key retries the query.
#[derive(Clone)]
pub struct WarehouseLookup {
    store: Option<Arc<dyn WarehouseStore>>,
    cache: Arc<DashMap<WarehouseKey, Option<WarehouseRecord>>>,
    counters: Arc<Counters>,
}

impl WarehouseLookup {
    pub fn new(store: Option<Arc<dyn WarehouseStore>>) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// A lookup with no warehouse behind it.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Look up the reference for an object.
    pub async fn lookup(
        &self,
        object: &StoredObject,
    ) -> (ReferenceStatus, Option<WarehouseRecord>) {
        let Some(store) = self.store.as_ref() else {
            return (ReferenceStatus::NoKey, None);
        };
        let Some(key) = WarehouseKey::for_object(object) else {
            debug!(path = %object.path, "no warehouse key in metadata");
            return (ReferenceStatus::NoKey, None);
        };

        if let Some(cached) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return self.classify(cached.value().clone());
        }

        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        match store.find_by_identifier(&key).await {
            Ok(record) => {
                self.cache.insert(key, record.clone());
                self.classify(record)
            }
            Err(e) => {
                self.counters.unavailable.fetch_add(1, Ordering::Relaxed);
                warn!(
                    path = %object.path,
                    key = %key,
                    backend = store.backend_name(),
                    error = %e,
                    "warehouse lookup failed"
                );
                (ReferenceStatus::Unavailable, None)
            }
        }
    }

    fn classify(
        &self,
        record: Option<WarehouseRecord>,
    ) -> (ReferenceStatus, Option<WarehouseRecord>) {
        match record {
            Some(record) => {
                self.counters.found.fetch_add(1, Ordering::Relaxed);
                (ReferenceStatus::Found, Some(record))
            }
            None => {
                self.counters.absent.fetch_add(1, Ordering::Relaxed);
                (ReferenceStatus::Absent, None)
            }
        }
    }

    pub fn stats(&self) -> LookupStats {
        LookupStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            found: self.counters.found.load(Ordering::Relaxed),
            absent: self.counters.absent.load(Ordering::Relaxed),
            unavailable: self.counters.unavailable.load(Ordering::Relaxed),
        }
    }
}
