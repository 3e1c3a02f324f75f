//! Typed request/reply access to a hub.
//!
//! [`HubClient`] wraps the correlation-id DEALER client: each method sends
//! one [`HubRequest`], waits for the reply addressed to it, and unpacks the
//! expected [`HubReply`] variant. Error replies surface as
//! [`EngineError::Refused`].

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, instrument};

use taskhub_core::{EngineId, Identity, TaskId, TaskRecord, TaskSubmission};
use taskhub_wire::{
    EngineQueue, HubReply, HubRequest, Message, RequestSender, Session, Transport,
    ZmqRequestClient,
};

use crate::error::EngineError;

/// Result of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub engine_id: EngineId,
    pub heartbeat_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub engines: BTreeMap<EngineId, EngineQueue>,
    /// Tasks accepted but not yet assigned to an engine.
    pub unassigned: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskResults {
    pub completed: BTreeMap<TaskId, TaskRecord>,
    pub pending: Vec<TaskId>,
}

pub struct HubClient {
    inner: ZmqRequestClient,
    timeout: Duration,
}

impl HubClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the hub's ROUTER endpoint.
    ///
    /// The returned receiver carries unsolicited messages, which for an
    /// engine are the tasks the hub hands it.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(
        transport: &Transport,
        session: Session,
    ) -> Result<(Self, mpsc::Receiver<Message>), EngineError> {
        let (inner, inbox) = ZmqRequestClient::connect(transport, session).await?;
        Ok((
            Self {
                inner,
                timeout: Self::DEFAULT_TIMEOUT,
            },
            inbox,
        ))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and return the hub's reply. Error replies become
    /// [`EngineError::Refused`].
    pub async fn request(&self, request: HubRequest) -> Result<HubReply, EngineError> {
        let kind = request.kind();
        let message = request.to_message()?;
        let reply = self.inner.request(message, self.timeout).await?;
        match HubReply::from_message(&reply)? {
            HubReply::Error {
                kind: error_kind,
                message,
            } => Err(EngineError::Refused {
                request: kind,
                kind: error_kind,
                message,
            }),
            reply => {
                debug!(request = kind, reply = reply.kind(), "reply received");
                Ok(reply)
            }
        }
    }

    /// Send a message the hub does not answer (pongs, output, results).
    pub async fn send(&self, request: &HubRequest) -> Result<(), EngineError> {
        self.inner.send(&request.to_message()?).await?;
        Ok(())
    }

    pub async fn register(
        &self,
        queue_identity: impl Into<Identity>,
        heart_identity: impl Into<Identity>,
    ) -> Result<Registration, EngineError> {
        let request = HubRequest::Register {
            queue_identity: queue_identity.into(),
            heart_identity: heart_identity.into(),
        };
        match self.request(request).await? {
            HubReply::Registered {
                engine_id,
                heartbeat_period_ms,
            } => Ok(Registration {
                engine_id,
                heartbeat_period: Duration::from_millis(heartbeat_period_ms),
            }),
            other => Err(unexpected("register", &other)),
        }
    }

    pub async fn unregister(&self, engine_id: EngineId) -> Result<(), EngineError> {
        match self.request(HubRequest::Unregister { engine_id }).await? {
            HubReply::Unregistered { .. } => Ok(()),
            other => Err(unexpected("unregister", &other)),
        }
    }

    /// Registered engines and their queue identities.
    pub async fn connection(&self) -> Result<BTreeMap<EngineId, Identity>, EngineError> {
        match self.request(HubRequest::ConnectionRequest).await? {
            HubReply::Connection { engines } => Ok(engines),
            other => Err(unexpected("connection_request", &other)),
        }
    }

    pub async fn submit(&self, submission: TaskSubmission) -> Result<TaskId, EngineError> {
        match self.request(HubRequest::Submit(submission)).await? {
            HubReply::Submitted { task_id } => Ok(task_id),
            other => Err(unexpected("submit", &other)),
        }
    }

    /// `targets = None` asks about every registered engine.
    pub async fn queue_status(
        &self,
        targets: Option<Vec<EngineId>>,
        verbose: bool,
    ) -> Result<QueueStatus, EngineError> {
        match self
            .request(HubRequest::QueueStatus { targets, verbose })
            .await?
        {
            HubReply::QueueStatus {
                engines,
                unassigned,
            } => Ok(QueueStatus {
                engines,
                unassigned,
            }),
            other => Err(unexpected("queue_status", &other)),
        }
    }

    pub async fn loads(
        &self,
        targets: Option<Vec<EngineId>>,
    ) -> Result<BTreeMap<EngineId, usize>, EngineError> {
        match self.request(HubRequest::LoadRequest { targets }).await? {
            HubReply::Loads { loads } => Ok(loads),
            other => Err(unexpected("load_request", &other)),
        }
    }

    /// Drop finished records by task id and by engine. Returns how many.
    pub async fn purge(
        &self,
        task_ids: Vec<TaskId>,
        engine_ids: Vec<EngineId>,
    ) -> Result<usize, EngineError> {
        self.purge_request(HubRequest::PurgeRequest {
            task_ids,
            engine_ids,
            all: false,
        })
        .await
    }

    /// Drop every finished record.
    pub async fn purge_all(&self) -> Result<usize, EngineError> {
        self.purge_request(HubRequest::PurgeRequest {
            task_ids: Vec::new(),
            engine_ids: Vec::new(),
            all: true,
        })
        .await
    }

    async fn purge_request(&self, request: HubRequest) -> Result<usize, EngineError> {
        match self.request(request).await? {
            HubReply::Purged { dropped } => Ok(dropped),
            other => Err(unexpected("purge_request", &other)),
        }
    }

    pub async fn results(&self, task_ids: Vec<TaskId>) -> Result<TaskResults, EngineError> {
        match self.request(HubRequest::ResultRequest { task_ids }).await? {
            HubReply::Results { completed, pending } => Ok(TaskResults { completed, pending }),
            other => Err(unexpected("result_request", &other)),
        }
    }

    /// Resubmit finished tasks. Maps each original id to its fresh one.
    pub async fn resubmit(
        &self,
        task_ids: Vec<TaskId>,
    ) -> Result<BTreeMap<TaskId, TaskId>, EngineError> {
        match self.request(HubRequest::ResubmitRequest { task_ids }).await? {
            HubReply::Resubmitted { mapping } => Ok(mapping),
            other => Err(unexpected("resubmit_request", &other)),
        }
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        match self.request(HubRequest::ShutdownRequest).await? {
            HubReply::ShuttingDown => Ok(()),
            other => Err(unexpected("shutdown_request", &other)),
        }
    }
}

fn unexpected(request: &'static str, reply: &HubReply) -> EngineError {
    EngineError::UnexpectedReply {
        request,
        reply: reply.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_reply_names_both_sides() {
        let err = unexpected("submit", &HubReply::ShuttingDown);
        assert_eq!(
            err.to_string(),
            format!("unexpected reply to submit: {}", HubReply::ShuttingDown.kind())
        );
        assert_eq!(err.refusal_kind(), None);
    }

    #[test]
    fn refusal_kind_is_exposed() {
        let err = EngineError::Refused {
            request: "purge_request",
            kind: "TaskPending".into(),
            message: "task is still pending: t1".into(),
        };
        assert_eq!(err.refusal_kind(), Some("TaskPending"));
    }
}
