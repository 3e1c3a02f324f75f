use super::types::HubConfig;
use crate::error::ConfigError;

impl HubConfig {
    /// Validate the config: endpoints, scheme name, heartbeat settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router_transport()?;
        self.publisher_transport()?;
        self.validate_distinct_endpoints()?;
        self.scheme()?;
        self.validate_intervals()?;
        Ok(())
    }

    fn validate_distinct_endpoints(&self) -> Result<(), ConfigError> {
        if self.endpoints.router == self.endpoints.publisher {
            return Err(ConfigError::Invalid(format!(
                "router and publisher share endpoint '{}'",
                self.endpoints.router
            )));
        }
        Ok(())
    }

    fn validate_intervals(&self) -> Result<(), ConfigError> {
        if self.heartbeat.period_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.period_ms must be positive".into(),
            ));
        }
        if self.heartbeat.max_missed == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.max_missed must be at least 1".into(),
            ));
        }
        if self.scheduler.audit_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.audit_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
