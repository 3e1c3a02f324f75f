use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Directory holding IPC socket files.
const IPC_DIR: &str = "/tmp/taskhub";

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets.
    Ipc(String),

    /// TCP transport for engines on other hosts.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create an IPC transport with the given socket name.
    ///
    /// The name is used as a path component under `/tmp/taskhub/`.
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    /// Create a TCP transport with the given host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_DIR}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// Prepare an IPC endpoint for binding: create the socket directory and
    /// remove a stale socket file left over from a previous run.
    ///
    /// This is a no-op for TCP transports.
    pub fn prepare_bind(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl FromStr for Transport {
    type Err = WireError;

    /// Parse `ipc:///tmp/taskhub/name.sock`, `ipc://name` or `tcp://host:port`.
    fn from_str(endpoint: &str) -> Result<Self, Self::Err> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            let name = Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| WireError::Transport(format!("invalid ipc endpoint '{endpoint}'")))?;
            Ok(Transport::ipc(name))
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| WireError::Transport(format!("missing port in '{endpoint}'")))?;
            let port = port
                .parse()
                .map_err(|_| WireError::Transport(format!("invalid port in '{endpoint}'")))?;
            Ok(Transport::tcp(host, port))
        } else {
            Err(WireError::Transport(format!(
                "unsupported endpoint '{endpoint}', expected ipc:// or tcp://"
            )))
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("hub");
        assert_eq!(t.endpoint(), "ipc:///tmp/taskhub/hub.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 5555);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn parse_endpoints() {
        assert_eq!(
            "ipc:///tmp/taskhub/hub-router.sock".parse::<Transport>().unwrap(),
            Transport::ipc("hub-router")
        );
        assert_eq!(
            "tcp://10.0.0.1:7000".parse::<Transport>().unwrap(),
            Transport::tcp("10.0.0.1", 7000)
        );
        assert!("tcp://nohost".parse::<Transport>().is_err());
        assert!("udp://x:1".parse::<Transport>().is_err());
    }

    #[test]
    fn display_matches_endpoint() {
        let t = Transport::tcp("localhost", 9090);
        assert_eq!(t.to_string(), t.endpoint());
    }
}
