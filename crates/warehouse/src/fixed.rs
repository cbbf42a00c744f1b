//! In-process warehouse holding a fixed set of records.

use crate::error::{WarehouseError, WarehouseResult};
use crate::store::WarehouseStore;
use async_trait::async_trait;
use rodwatch_core::{WarehouseKey, WarehouseRecord};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Warehouse backed by a map. Used by tests and offline runs.
#[derive(Default)]
pub struct FixedWarehouse {
    records: Mutex<HashMap<WarehouseKey, WarehouseRecord>>,
    failing: AtomicBool,
    queries: AtomicU64,
}

impl FixedWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = WarehouseRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: WarehouseRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.key.clone(), record);
        }
    }

    /// Make every subsequent query fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of queries served or refused.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseStore for FixedWarehouse {
    async fn find_by_identifier(
        &self,
        key: &WarehouseKey,
    ) -> WarehouseResult<Option<WarehouseRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(WarehouseError::Unavailable("injected failure".to_string()));
        }
        let records = self
            .records
            .lock()
            .map_err(|_| WarehouseError::Unavailable("record map poisoned".to_string()))?;
        Ok(records.get(key).cloned())
    }

    async fn health_check(&self) -> WarehouseResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WarehouseError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "fixed"
    }
}
