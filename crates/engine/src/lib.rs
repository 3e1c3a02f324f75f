pub mod client;
pub mod error;
pub mod handler;
pub mod runner;

pub use client::{HubClient, QueueStatus, Registration, TaskResults};
pub use error::EngineError;
pub use handler::{EchoHandler, OutputSink, TaskFailure, TaskHandler};
pub use runner::{EngineBuilder, EngineConfig, EngineExit, EngineRunner, EngineSummary};
