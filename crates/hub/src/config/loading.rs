use std::path::Path;
use std::time::Duration;

use taskhub_core::config::{env_opt, env_parse};
use taskhub_wire::{Session, Transport};

use super::types::HubConfig;
use crate::error::ConfigError;
use crate::hub::HubOptions;
use crate::registry::Registry;
use crate::scheduler::Scheme;

impl HubConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn router_transport(&self) -> Result<Transport, ConfigError> {
        parse_transport("endpoints.router", &self.endpoints.router)
    }

    pub fn publisher_transport(&self) -> Result<Transport, ConfigError> {
        parse_transport("endpoints.publisher", &self.endpoints.publisher)
    }

    pub fn session(&self) -> Session {
        Session::from_key(self.session.key.as_deref())
    }

    pub fn audit_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.audit_interval_ms)
    }

    /// Resolve the typed settings the hub state machines run on.
    pub fn hub_options(&self) -> Result<HubOptions, ConfigError> {
        let scheme = self.scheme()?;
        let heartbeat_period = Duration::from_millis(self.heartbeat.period_ms);
        let registration_timeout = self
            .registration
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| Registry::timeout_for_period(heartbeat_period));
        Ok(HubOptions {
            scheme,
            hwm: self.scheduler.hwm,
            heartbeat_period,
            max_missed: self.heartbeat.max_missed,
            registration_timeout,
            grace_period: Duration::from_millis(self.scheduler.grace_period_ms),
            shutdown_delay: Duration::from_millis(self.shutdown.delay_ms),
            seed: None,
        })
    }

    pub(crate) fn scheme(&self) -> Result<Scheme, ConfigError> {
        self.scheduler.scheme.parse().map_err(ConfigError::Invalid)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `TASKHUB_SECTION_KEY` overrides `section.key`:
    /// - `TASKHUB_ENDPOINTS_ROUTER` → `endpoints.router`
    /// - `TASKHUB_ENDPOINTS_PUBLISHER` → `endpoints.publisher`
    /// - `TASKHUB_SESSION_KEY` → `session.key`
    /// - `TASKHUB_HEARTBEAT_PERIOD_MS` → `heartbeat.period_ms`
    /// - `TASKHUB_HEARTBEAT_MAX_MISSED` → `heartbeat.max_missed`
    /// - `TASKHUB_SCHEDULER_SCHEME` → `scheduler.scheme`
    /// - `TASKHUB_SCHEDULER_HWM` → `scheduler.hwm`
    /// - `TASKHUB_SCHEDULER_GRACE_PERIOD_MS` → `scheduler.grace_period_ms`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("TASKHUB_ENDPOINTS_ROUTER") {
            self.endpoints.router = v;
        }
        if let Some(v) = env_opt("TASKHUB_ENDPOINTS_PUBLISHER") {
            self.endpoints.publisher = v;
        }
        if let Some(v) = env_opt("TASKHUB_SESSION_KEY") {
            self.session.key = Some(v);
        }
        if let Some(v) = env_parse("TASKHUB_HEARTBEAT_PERIOD_MS") {
            self.heartbeat.period_ms = v;
        }
        if let Some(v) = env_parse("TASKHUB_HEARTBEAT_MAX_MISSED") {
            self.heartbeat.max_missed = v;
        }
        if let Some(v) = env_opt("TASKHUB_SCHEDULER_SCHEME") {
            self.scheduler.scheme = v;
        }
        if let Some(v) = env_parse("TASKHUB_SCHEDULER_HWM") {
            self.scheduler.hwm = v;
        }
        if let Some(v) = env_parse("TASKHUB_SCHEDULER_GRACE_PERIOD_MS") {
            self.scheduler.grace_period_ms = v;
        }
    }
}

fn parse_transport(field: &str, endpoint: &str) -> Result<Transport, ConfigError> {
    endpoint
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("{field}: {e}")))
}
