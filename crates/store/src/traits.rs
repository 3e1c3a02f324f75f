//! The record store interface the hub persists task state through.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskhub_core::{RecordFilter, RecordPatch, TaskId, TaskRecord};

use crate::error::StoreError;

/// Persists one [`TaskRecord`] per task.
///
/// Implementations decide their own storage engine and commit discipline,
/// but `add_record` followed by `update_record` for the same task id must
/// be observed in that order by every caller.
#[async_trait]
pub trait TaskRecordStore: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn add_record(&self, record: TaskRecord) -> Result<(), StoreError>;

    async fn get_record(&self, task_id: &TaskId) -> Result<TaskRecord, StoreError>;

    /// Apply a partial update to an existing record.
    async fn update_record(&self, task_id: &TaskId, patch: RecordPatch) -> Result<(), StoreError>;

    async fn drop_record(&self, task_id: &TaskId) -> Result<(), StoreError>;

    /// All records matching `filter`, keyed by task id.
    async fn find_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<TaskId, TaskRecord>, StoreError>;

    /// Drop every record matching `filter`, returning how many were removed.
    async fn drop_matching_records(&self, filter: &RecordFilter) -> Result<usize, StoreError>;

    /// Every task id in the store, in key order.
    async fn task_ids(&self) -> Result<Vec<TaskId>, StoreError>;

    /// Human-readable backend name for logs (e.g. "memory").
    fn backend_name(&self) -> &str;
}

#[async_trait]
impl<T: TaskRecordStore + ?Sized> TaskRecordStore for Arc<T> {
    async fn add_record(&self, record: TaskRecord) -> Result<(), StoreError> {
        (**self).add_record(record).await
    }

    async fn get_record(&self, task_id: &TaskId) -> Result<TaskRecord, StoreError> {
        (**self).get_record(task_id).await
    }

    async fn update_record(&self, task_id: &TaskId, patch: RecordPatch) -> Result<(), StoreError> {
        (**self).update_record(task_id, patch).await
    }

    async fn drop_record(&self, task_id: &TaskId) -> Result<(), StoreError> {
        (**self).drop_record(task_id).await
    }

    async fn find_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<TaskId, TaskRecord>, StoreError> {
        (**self).find_records(filter).await
    }

    async fn drop_matching_records(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        (**self).drop_matching_records(filter).await
    }

    async fn task_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        (**self).task_ids().await
    }

    fn backend_name(&self) -> &str {
        (**self).backend_name()
    }
}
