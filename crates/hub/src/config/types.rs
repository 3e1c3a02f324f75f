use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration of one hub process.
///
/// Parsed from `taskhub.toml`; every section is optional and falls back to
/// the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub endpoints: EndpointConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub registration: RegistrationConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Where the hub binds its sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// ROUTER socket for engine and client requests.
    #[serde(default = "default_router")]
    pub router: String,

    /// PUB socket for heartbeat pings and notices.
    #[serde(default = "default_publisher")]
    pub publisher: String,
}

fn default_router() -> String {
    "tcp://127.0.0.1:5570".into()
}

fn default_publisher() -> String {
    "tcp://127.0.0.1:5571".into()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            router: default_router(),
            publisher: default_publisher(),
        }
    }
}

/// Message signing. Without a key, messages travel unsigned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Consecutive unanswered pings before a heart is declared dead.
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,
}

fn default_period_ms() -> u64 {
    3000
}

fn default_max_missed() -> u32 {
    3
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            max_missed: default_max_missed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// One of `lru`, `plainrandom`, `twobin`, `weighted`, `leastload`.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Max outstanding tasks per engine (0 = unlimited).
    #[serde(default)]
    pub hwm: usize,

    /// How often queued tasks are checked against their timeouts.
    #[serde(default = "default_audit_interval_ms")]
    pub audit_interval_ms: u64,

    /// How long tasks stranded on a dead engine wait for a late result.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_scheme() -> String {
    "leastload".into()
}

fn default_audit_interval_ms() -> u64 {
    2000
}

fn default_grace_period_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            hwm: 0,
            audit_interval_ms: default_audit_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// How long a registration may wait for its first heartbeat.
    /// Unset: twice the heartbeat period, at least five seconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Delay between acknowledging a shutdown request and exiting.
    #[serde(default = "default_shutdown_delay_ms")]
    pub delay_ms: u64,
}

fn default_shutdown_delay_ms() -> u64 {
    1000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_shutdown_delay_ms(),
        }
    }
}
