//! Task submissions, results, and the persisted per-task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::ids::{EngineId, TaskId};

/// Which hub queue a task travels through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// Direct submission to one explicit engine, bypassing load balancing.
    Mux,
    /// Load-balanced submission routed by the scheduler.
    #[default]
    Task,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mux => "mux",
            Self::Task => "task",
        }
    }
}

/// Submission metadata carried with every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHeader {
    #[serde(default = "Utc::now")]
    pub submitted: DateTime<Utc>,
    /// Completion constraint: run only after these tasks resolve.
    #[serde(default)]
    pub after: Dependency,
    /// Locality constraint: run where these tasks ran.
    #[serde(default)]
    pub follow: Dependency,
    /// Seconds a task may stay queued waiting on dependencies.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Restrict candidate engines to these ids (empty = any engine).
    #[serde(default)]
    pub targets: Vec<EngineId>,
    /// How many times the task may be re-routed after its engine dies.
    #[serde(default)]
    pub retries: u32,
}

impl Default for TaskHeader {
    fn default() -> Self {
        Self {
            submitted: Utc::now(),
            after: Dependency::met(),
            follow: Dependency::met(),
            timeout: None,
            targets: Vec::new(),
            retries: 0,
        }
    }
}

/// One unit of work as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: TaskId,
    #[serde(default)]
    pub header: TaskHeader,
    /// Opaque payload interpreted by the engine.
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
    #[serde(default)]
    pub queue: QueueKind,
}

impl TaskSubmission {
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            task_id: TaskId::random(),
            header: TaskHeader::default(),
            content,
            buffers: Vec::new(),
            queue: QueueKind::Task,
        }
    }

    pub fn with_header(mut self, header: TaskHeader) -> Self {
        self.header = header;
        self
    }
}

/// Outcome an engine reports for a task it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Error,
    /// The engine refused the task because a dependency is unmet on it.
    UnmetDependency,
}

/// Result of a finished (or failed) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ReplyStatus,
    #[serde(default)]
    pub engine_id: Option<EngineId>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    pub completed: DateTime<Utc>,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

/// Lifecycle status of a persisted task record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ok,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// The persisted record of one task, owned by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub client_id: String,
    pub header: TaskHeader,
    pub content: serde_json::Value,
    #[serde(default)]
    pub buffers: Vec<Vec<u8>>,
    pub queue_kind: QueueKind,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub engine_id: Option<EngineId>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resubmitted_from: Option<TaskId>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl TaskRecord {
    /// A fresh pending record for a submission.
    pub fn from_submission(submission: &TaskSubmission, client_id: impl Into<String>) -> Self {
        Self {
            task_id: submission.task_id.clone(),
            client_id: client_id.into(),
            header: submission.header.clone(),
            content: submission.content.clone(),
            buffers: submission.buffers.clone(),
            queue_kind: submission.queue,
            status: TaskStatus::Pending,
            submitted_at: submission.header.submitted,
            engine_id: None,
            started_at: None,
            completed_at: None,
            resubmitted_from: None,
            result: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Rebuild a submission from the stored header and payload.
    pub fn to_submission(&self) -> TaskSubmission {
        TaskSubmission {
            task_id: self.task_id.clone(),
            header: self.header.clone(),
            content: self.content.clone(),
            buffers: self.buffers.clone(),
            queue: self.queue_kind,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Partial update applied to a stored record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub engine_id: Option<EngineId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
    pub result: Option<TaskResult>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl RecordPatch {
    /// Record the engine a task was dispatched to.
    pub fn destination(engine_id: EngineId) -> Self {
        Self {
            engine_id: Some(engine_id),
            ..Self::default()
        }
    }

    /// Record a finished result, deriving status and timestamps from it.
    pub fn finished(result: TaskResult) -> Self {
        let status = if result.is_success() {
            TaskStatus::Ok
        } else {
            TaskStatus::Error
        };
        Self {
            engine_id: result.engine_id,
            started_at: result.started,
            completed_at: Some(result.completed),
            status: Some(status),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Append text captured from one of a task's output streams.
    pub fn output(stream: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        match stream {
            "stderr" => Self {
                stderr: Some(text),
                ..Self::default()
            },
            _ => Self {
                stdout: Some(text),
                ..Self::default()
            },
        }
    }

    pub fn apply(self, record: &mut TaskRecord) {
        if let Some(engine_id) = self.engine_id {
            record.engine_id = Some(engine_id);
        }
        if let Some(started) = self.started_at {
            record.started_at = Some(started);
        }
        if let Some(completed) = self.completed_at {
            record.completed_at = Some(completed);
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(result) = self.result {
            record.result = Some(result);
        }
        if let Some(text) = self.stdout {
            record.stdout.push_str(&text);
        }
        if let Some(text) = self.stderr {
            record.stderr.push_str(&text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_patch_sets_status_and_timestamps() {
        let submission = TaskSubmission::new(serde_json::json!({"op": "noop"}));
        let mut record = TaskRecord::from_submission(&submission, "client-1");
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(!record.is_finished());

        let now = Utc::now();
        RecordPatch::finished(TaskResult {
            status: ReplyStatus::Error,
            engine_id: Some(3),
            started: Some(now),
            completed: now,
            content: serde_json::json!({"ename": "ValueError"}),
            buffers: vec![],
        })
        .apply(&mut record);

        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.engine_id, Some(3));
        assert_eq!(record.completed_at, Some(now));
        assert!(record.is_finished());
    }

    #[test]
    fn output_patches_append() {
        let submission = TaskSubmission::new(serde_json::Value::Null);
        let mut record = TaskRecord::from_submission(&submission, "c");
        RecordPatch::output("stdout", "hello ").apply(&mut record);
        RecordPatch::output("stdout", "world").apply(&mut record);
        RecordPatch::output("stderr", "oops").apply(&mut record);
        assert_eq!(record.stdout, "hello world");
        assert_eq!(record.stderr, "oops");
    }

    #[test]
    fn header_defaults_from_empty_json() {
        let header: TaskHeader = serde_json::from_str("{}").unwrap();
        assert!(header.after.is_empty());
        assert!(header.follow.is_empty());
        assert_eq!(header.retries, 0);
        assert!(header.targets.is_empty());
    }
}
