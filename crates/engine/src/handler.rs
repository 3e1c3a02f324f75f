//! What an engine does with the tasks it is handed.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use taskhub_core::{TaskId, TaskSubmission};
use taskhub_wire::HubRequest;

/// Why a task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The task ran and failed. Reported as an error result.
    Error { ename: String, evalue: String },
    /// This engine cannot run the task: a dependency is unmet here. The
    /// hub routes it elsewhere.
    UnmetDependency,
}

impl TaskFailure {
    pub fn error(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self::Error {
            ename: ename.into(),
            evalue: evalue.into(),
        }
    }
}

/// Executes task payloads on an engine.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one task. Text written to `output` is mirrored into the task's
    /// record while the task runs.
    async fn execute(
        &self,
        task: &TaskSubmission,
        output: &OutputSink,
    ) -> Result<serde_json::Value, TaskFailure>;
}

/// Streams a running task's output back to the hub.
#[derive(Debug, Clone)]
pub struct OutputSink {
    task_id: TaskId,
    tx: mpsc::Sender<HubRequest>,
}

impl OutputSink {
    pub fn new(task_id: TaskId, tx: mpsc::Sender<HubRequest>) -> Self {
        Self { task_id, tx }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn stdout(&self, text: impl Into<String>) {
        self.write("stdout", text.into()).await;
    }

    pub async fn stderr(&self, text: impl Into<String>) {
        self.write("stderr", text.into()).await;
    }

    async fn write(&self, stream: &str, text: String) {
        let frame = HubRequest::Output {
            task_id: self.task_id.clone(),
            stream: stream.to_string(),
            text,
        };
        if self.tx.send(frame).await.is_err() {
            debug!(task_id = %self.task_id, stream, "engine stopped, dropping output");
        }
    }
}

/// Echoes each task's content back as its result.
///
/// Content fields it understands:
/// - `"print"`: text written to stdout first
/// - `"sleep_ms"`: delay before answering
/// - `"fail"`: fail the task with this message
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn execute(
        &self,
        task: &TaskSubmission,
        output: &OutputSink,
    ) -> Result<serde_json::Value, TaskFailure> {
        let content = &task.content;
        if let Some(text) = content.get("print").and_then(|v| v.as_str()) {
            output.stdout(text).await;
        }
        if let Some(ms) = content.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        }
        if let Some(reason) = content.get("fail").and_then(|v| v.as_str()) {
            output.stderr(reason).await;
            return Err(TaskFailure::error("TaskFailed", reason));
        }
        Ok(content.clone())
    }
}
