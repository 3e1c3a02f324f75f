//! Hub configuration: TOML file, `.env`, and `TASKHUB_*` overrides.

mod loading;
mod types;
mod validation;


pub use types::{
    EndpointConfig, HeartbeatConfig, HubConfig, RegistrationConfig, SchedulerConfig,
    SessionConfig, ShutdownConfig,
};
