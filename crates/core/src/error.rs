use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{EngineId, Identity, TaskId};

/// Request-level errors raised by the hub, registry, and scheduler.
///
/// All of these are recovered locally and reported back to the caller;
/// only [`HubError::Invariant`] signals a bug in the hub's own bookkeeping.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HubError {
    #[error("identity already in use: {0}")]
    DuplicateIdentity(Identity),

    #[error("unknown engine: {0}")]
    UnknownEngine(EngineId),

    #[error("no such engine: {0}")]
    NoSuchEngine(EngineId),

    #[error("no engines registered")]
    NoEnginesRegistered,

    #[error("no such task: {0}")]
    UnknownTask(TaskId),

    #[error("task is still pending: {0}")]
    TaskPending(TaskId),

    #[error("task id already submitted: {0}")]
    DuplicateTask(TaskId),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl HubError {
    /// Short machine-readable name used in error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateIdentity(_) => "DuplicateIdentity",
            Self::UnknownEngine(_) => "UnknownEngine",
            Self::NoSuchEngine(_) => "NoSuchEngine",
            Self::NoEnginesRegistered => "NoEnginesRegistered",
            Self::UnknownTask(_) => "UnknownTask",
            Self::TaskPending(_) => "TaskPending",
            Self::DuplicateTask(_) => "DuplicateTask",
            Self::InvalidTarget(_) => "InvalidTarget",
            Self::Store(_) => "Store",
            Self::Invariant(_) => "Invariant",
        }
    }
}

/// Why the hub failed a task on its own, without an engine result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FailureReason {
    #[error("dependency can never be satisfied")]
    ImpossibleDependency,

    #[error("dependency references itself or an unknown task")]
    InvalidDependency,

    #[error("task timed out waiting on its dependencies")]
    DependencyTimeout,

    #[error("engine {0} died before returning a result")]
    EngineError(EngineId),
}

impl FailureReason {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ImpossibleDependency => "ImpossibleDependency",
            Self::InvalidDependency => "InvalidDependency",
            Self::DependencyTimeout => "DependencyTimeout",
            Self::EngineError(_) => "EngineError",
        }
    }

    /// Result content synthesized for a task failed by the hub.
    pub fn to_content(&self, task_id: &TaskId) -> serde_json::Value {
        serde_json::json!({
            "ename": self.name(),
            "evalue": self.to_string(),
            "task_id": task_id,
        })
    }
}
