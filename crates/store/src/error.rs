use taskhub_core::{HubError, TaskId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no record for task {0}")]
    NotFound(TaskId),

    #[error("record already exists for task {0}")]
    Duplicate(TaskId),

    #[error("{0}")]
    Other(String),
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => HubError::UnknownTask(id),
            StoreError::Duplicate(id) => HubError::DuplicateTask(id),
            StoreError::Other(msg) => HubError::Store(msg),
        }
    }
}
