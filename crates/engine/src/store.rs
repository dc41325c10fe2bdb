//! Operation Record Store.
//!
//! Records live in a map behind a single `RwLock`. Readers receive cloned
//! snapshots taken under the read lock, so `status`, `progress` and
//! `results` are always observed together. Writers mutate through
//! [`OperationStore::update`], which holds the write lock for the whole
//! closure.

use std::collections::HashMap;

use bulkops_core::error::CoreError;
use bulkops_core::query::{compute_statistics, OperationFilter, OperationStatistics};
use bulkops_core::record::OperationRecord;
use bulkops_core::status::OperationStatus;
use bulkops_core::types::OperationId;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct OperationStore {
    records: RwLock<HashMap<OperationId, OperationRecord>>,
}

impl OperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created record.
    ///
    /// Fails with `Internal` if the id is already present.
    pub async fn insert(&self, record: OperationRecord) -> Result<(), CoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(CoreError::Internal(format!(
                "operation {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: OperationId) -> Result<OperationRecord, CoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::operation_not_found(id))
    }

    /// Current status of one record.
    pub async fn status(&self, id: OperationId) -> Result<OperationStatus, CoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .map(|r| r.status)
            .ok_or_else(|| CoreError::operation_not_found(id))
    }

    /// Apply `f` to one record under the write lock.
    ///
    /// Any error returned by `f` is passed through; the closure is
    /// responsible for leaving the record consistent when it fails.
    pub async fn update<T>(
        &self,
        id: OperationId,
        f: impl FnOnce(&mut OperationRecord) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| CoreError::operation_not_found(id))?;
        f(record)
    }

    /// Filtered, ordered, paged snapshots.
    pub async fn list(&self, filter: &OperationFilter) -> Vec<OperationRecord> {
        let snapshot: Vec<OperationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        filter.apply(snapshot)
    }

    pub async fn statistics(&self, recent: usize) -> OperationStatistics {
        let records = self.records.read().await;
        let snapshot: Vec<OperationRecord> = records.values().cloned().collect();
        drop(records);
        compute_statistics(&snapshot, recent)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
