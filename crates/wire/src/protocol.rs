//! The closed set of messages exchanged with the hub.
//!
//! Every frame arriving at the hub is decoded once into a [`HubRequest`];
//! the hub answers with [`HubReply`] and broadcasts [`Broadcast`]s on its
//! PUB socket. The message topic is the variant's kind string, so PUB/SUB
//! prefix filtering and log lines can rely on it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use taskhub_core::{EngineId, Identity, TaskId, TaskRecord, TaskResult, TaskSubmission};
use uuid::Uuid;

use crate::error::WireError;
use crate::message::Message;

/// Topic constants for PUB/SUB routing.
///
/// Topics follow the pattern `taskhub.<channel>.<event>`.
pub mod topics {
    /// Heartbeat pings broadcast to every engine heart.
    pub const PING: &str = "taskhub.heartbeat.ping";

    /// Prefix for registration / unregistration / shutdown notices.
    pub const NOTIFY: &str = "taskhub.notify";

    pub const ENGINE_REGISTERED: &str = "taskhub.notify.registration";

    pub const ENGINE_UNREGISTERED: &str = "taskhub.notify.unregistration";

    pub const SHUTDOWN: &str = "taskhub.notify.shutdown";
}

/// Every message the hub accepts on its ROUTER socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubRequest {
    // ── engine registration ──
    Register {
        queue_identity: Identity,
        heart_identity: Identity,
    },
    Unregister {
        engine_id: EngineId,
    },
    ConnectionRequest,
    Pong {
        heart_identity: Identity,
        generation: u64,
    },

    // ── engine task traffic ──
    TaskReply {
        task_id: TaskId,
        result: TaskResult,
    },
    Output {
        task_id: TaskId,
        stream: String,
        text: String,
    },

    // ── client requests ──
    Submit(TaskSubmission),
    QueueStatus {
        targets: Option<Vec<EngineId>>,
        verbose: bool,
    },
    LoadRequest {
        targets: Option<Vec<EngineId>>,
    },
    PurgeRequest {
        task_ids: Vec<TaskId>,
        engine_ids: Vec<EngineId>,
        all: bool,
    },
    ResultRequest {
        task_ids: Vec<TaskId>,
    },
    ResubmitRequest {
        task_ids: Vec<TaskId>,
    },
    ShutdownRequest,
}

impl HubRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister { .. } => "unregister",
            Self::ConnectionRequest => "connection_request",
            Self::Pong { .. } => "pong",
            Self::TaskReply { .. } => "task_reply",
            Self::Output { .. } => "output",
            Self::Submit(_) => "submit",
            Self::QueueStatus { .. } => "queue_status",
            Self::LoadRequest { .. } => "load_request",
            Self::PurgeRequest { .. } => "purge_request",
            Self::ResultRequest { .. } => "result_request",
            Self::ResubmitRequest { .. } => "resubmit_request",
            Self::ShutdownRequest => "shutdown_request",
        }
    }

    pub fn to_message(&self) -> Result<Message, WireError> {
        Ok(Message::new(self.kind(), self)?)
    }

    /// Decode a request, rejecting envelopes whose topic disagrees with the payload.
    pub fn from_message(message: &Message) -> Result<Self, WireError> {
        let request: Self = message.decode()?;
        if request.kind() != message.topic {
            return Err(WireError::Malformed(format!(
                "topic '{}' does not match payload kind '{}'",
                message.topic,
                request.kind()
            )));
        }
        Ok(request)
    }
}

/// Per-queue size in a queue-status reply: counts, or ids when verbose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntry {
    Count(usize),
    Ids(Vec<TaskId>),
}

impl QueueEntry {
    pub fn from_ids(ids: Vec<TaskId>, verbose: bool) -> Self {
        if verbose {
            Self::Ids(ids)
        } else {
            Self::Count(ids.len())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Count(n) => *n,
            Self::Ids(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Queue state of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineQueue {
    /// Direct (mux) tasks outstanding.
    pub queue: QueueEntry,
    /// Scheduled tasks outstanding.
    pub tasks: QueueEntry,
    /// Tasks this engine finished.
    pub completed: QueueEntry,
}

/// Everything the hub sends back over its ROUTER socket.
///
/// `Execute` is the one unsolicited variant: it hands a task to an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubReply {
    Registered {
        engine_id: EngineId,
        heartbeat_period_ms: u64,
    },
    Unregistered {
        engine_id: EngineId,
    },
    Connection {
        engines: BTreeMap<EngineId, Identity>,
    },
    Submitted {
        task_id: TaskId,
    },
    QueueStatus {
        engines: BTreeMap<EngineId, EngineQueue>,
        unassigned: usize,
    },
    Loads {
        loads: BTreeMap<EngineId, usize>,
    },
    Purged {
        dropped: usize,
    },
    Results {
        completed: BTreeMap<TaskId, TaskRecord>,
        pending: Vec<TaskId>,
    },
    Resubmitted {
        mapping: BTreeMap<TaskId, TaskId>,
    },
    ShuttingDown,
    Execute(TaskSubmission),
    Error {
        kind: String,
        message: String,
    },
}

impl HubReply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registered { .. } => "registration_reply",
            Self::Unregistered { .. } => "unregistration_reply",
            Self::Connection { .. } => "connection_reply",
            Self::Submitted { .. } => "submit_reply",
            Self::QueueStatus { .. } => "queue_reply",
            Self::Loads { .. } => "load_reply",
            Self::Purged { .. } => "purge_reply",
            Self::Results { .. } => "result_reply",
            Self::Resubmitted { .. } => "resubmit_reply",
            Self::ShuttingDown => "shutdown_reply",
            Self::Execute(_) => "execute",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(err: &taskhub_core::HubError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    /// Encode as a reply to `parent`, or as an unsolicited message.
    pub fn to_message(&self, parent: Option<Uuid>) -> Result<Message, WireError> {
        let mut msg = Message::new(self.kind(), self)?;
        msg.parent = parent;
        Ok(msg)
    }

    pub fn from_message(message: &Message) -> Result<Self, WireError> {
        Ok(message.decode()?)
    }
}

/// Notices the hub publishes on its PUB socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Broadcast {
    Ping {
        generation: u64,
    },
    EngineRegistered {
        engine_id: EngineId,
        queue_identity: Identity,
    },
    EngineUnregistered {
        engine_id: EngineId,
    },
    Shutdown,
}

impl Broadcast {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Ping { .. } => topics::PING,
            Self::EngineRegistered { .. } => topics::ENGINE_REGISTERED,
            Self::EngineUnregistered { .. } => topics::ENGINE_UNREGISTERED,
            Self::Shutdown => topics::SHUTDOWN,
        }
    }

    pub fn to_message(&self) -> Result<Message, WireError> {
        Ok(Message::new(self.topic(), self)?)
    }

    pub fn from_message(message: &Message) -> Result<Self, WireError> {
        Ok(message.decode()?)
    }
}
