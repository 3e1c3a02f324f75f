use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use taskhub_core::{RecordFilter, RecordPatch, TaskId, TaskRecord};

use crate::error::StoreError;
use crate::traits::TaskRecordStore;

/// In-process record store.
///
/// All operations go through a single `RwLock`, so every write for a task
/// id is ordered after the ones issued before it.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<TaskId, TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRecordStore for MemoryStore {
    async fn add_record(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.task_id) {
            return Err(StoreError::Duplicate(record.task_id));
        }
        debug!(task_id = %record.task_id, "record added");
        records.insert(record.task_id.clone(), record);
        Ok(())
    }

    async fn get_record(&self, task_id: &TaskId) -> Result<TaskRecord, StoreError> {
        self.records
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))
    }

    async fn update_record(&self, task_id: &TaskId, patch: RecordPatch) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
        patch.apply(record);
        Ok(())
    }

    async fn drop_record(&self, task_id: &TaskId) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))
    }

    async fn find_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<BTreeMap<TaskId, TaskRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, r)| filter.matches(r))
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect())
    }

    async fn drop_matching_records(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !filter.matches(r));
        let dropped = before - records.len();
        debug!(dropped, "records dropped by filter");
        Ok(dropped)
    }

    async fn task_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhub_core::{TaskStatus, TaskSubmission};

    fn record() -> TaskRecord {
        TaskRecord::from_submission(&TaskSubmission::new(serde_json::json!({"x": 1})), "client")
    }

    #[tokio::test]
    async fn add_then_update_is_visible() {
        let store = MemoryStore::new();
        let r = record();
        let id = r.task_id.clone();
        store.add_record(r).await.unwrap();
        store
            .update_record(&id, RecordPatch::destination(4))
            .await
            .unwrap();

        let got = store.get_record(&id).await.unwrap();
        assert_eq!(got.engine_id, Some(4));
        assert_eq!(got.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let store = MemoryStore::new();
        let r = record();
        store.add_record(r.clone()).await.unwrap();
        assert_eq!(
            store.add_record(r.clone()).await,
            Err(StoreError::Duplicate(r.task_id))
        );
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        let id = TaskId::from("nope");
        assert!(matches!(store.get_record(&id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update_record(&id, RecordPatch::default()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.drop_record(&id).await, Err(StoreError::NotFound(_))));
    }
}
