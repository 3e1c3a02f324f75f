use thiserror::Error;

/// Errors that can occur in the taskhub wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message is not signed")]
    Unsigned,

    #[error("invalid message signature")]
    BadSignature,

    #[error("duplicate message signature")]
    ReplayedSignature,

    #[error("unexpected message kind: {0}")]
    UnexpectedKind(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
