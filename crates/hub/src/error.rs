use thiserror::Error;

use taskhub_core::HubError;
use taskhub_wire::WireError;

/// Errors raised while loading or validating a [`HubConfig`](crate::HubConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop the hub server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Wire(#[from] WireError),

    /// Only internal invariant violations escape the request handlers.
    #[error("hub bookkeeping failed: {0}")]
    Hub(#[from] HubError),
}
