pub mod config;
pub mod dependency;
pub mod error;
pub mod filter;
pub mod ids;
pub mod record;

pub use dependency::{DepMode, Dependency};
pub use error::{FailureReason, HubError};
pub use filter::{Condition, FieldValue, RecordField, RecordFilter};
pub use ids::{EngineId, Identity, TaskId};
pub use record::{
    QueueKind, RecordPatch, ReplyStatus, TaskHeader, TaskRecord, TaskResult, TaskStatus,
    TaskSubmission,
};
