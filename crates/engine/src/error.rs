use taskhub_wire::WireError;
use thiserror::Error;

/// Errors raised on the engine and client side of a hub connection.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// The hub answered with an error reply.
    #[error("hub refused {request}: {kind}: {message}")]
    Refused {
        request: &'static str,
        kind: String,
        message: String,
    },

    #[error("unexpected reply to {request}: {reply}")]
    UnexpectedReply {
        request: &'static str,
        reply: &'static str,
    },

    #[error("connection to hub closed")]
    Disconnected,
}

impl EngineError {
    /// The hub's error kind, if the hub refused the request.
    pub fn refusal_kind(&self) -> Option<&str> {
        match self {
            Self::Refused { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
