pub mod config;
pub mod error;
pub mod heart;
pub mod hub;
pub mod registry;
pub mod scheduler;
pub mod server;

pub use config::HubConfig;
pub use error::{ConfigError, ServerError};
pub use heart::{Beat, HeartEvent, HeartMonitor, HeartState};
pub use hub::{Hub, HubOptions, Outbound};
pub use registry::{EngineConnector, EngineState, Registry};
pub use scheduler::{EventKind, Scheme, SchedulerEvent, TaskScheduler, TaskState};
pub use server::HubServer;
