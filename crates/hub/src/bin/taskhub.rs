//! taskhub: the task hub with its engine registry, heartbeats and scheduler.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (tcp://127.0.0.1:5570 router, :5571 publisher)
//! taskhub
//!
//! # From a config file, overriding the scheme
//! taskhub --config config/taskhub.toml --scheme weighted
//!
//! # Via environment variables
//! TASKHUB_SCHEDULER_SCHEME=lru TASKHUB_SESSION_KEY=secret taskhub
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;

use taskhub_hub::{HubConfig, HubServer};
use taskhub_store::MemoryStore;

/// Task hub for a pool of compute engines.
#[derive(Parser, Debug)]
#[command(name = "taskhub", version, about)]
struct Cli {
    /// Path to a TOML config file. Without one, defaults and env apply.
    #[arg(long, env = "TASKHUB_CONFIG")]
    config: Option<PathBuf>,

    /// ROUTER endpoint engines and clients connect to.
    #[arg(long)]
    router: Option<String>,

    /// PUB endpoint for heartbeats and notices.
    #[arg(long)]
    publisher: Option<String>,

    /// Load-balancing scheme: lru, plainrandom, twobin, weighted, leastload.
    #[arg(long)]
    scheme: Option<String>,

    /// Max outstanding tasks per engine (0 = unlimited).
    #[arg(long)]
    hwm: Option<usize>,

    /// Heartbeat period in milliseconds.
    #[arg(long)]
    heartbeat_ms: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => HubConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HubConfig::from_env()?,
        };
        if let Some(router) = self.router {
            config.endpoints.router = router;
        }
        if let Some(publisher) = self.publisher {
            config.endpoints.publisher = publisher;
        }
        if let Some(scheme) = self.scheme {
            config.scheduler.scheme = scheme;
        }
        if let Some(hwm) = self.hwm {
            config.scheduler.hwm = hwm;
        }
        if let Some(period) = self.heartbeat_ms {
            config.heartbeat.period_ms = period;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskhub_core::config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting taskhub");
    let config = cli.into_config()?;

    let store = Arc::new(MemoryStore::new());
    let server = HubServer::bind(&config, store).await?;

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.notify_one();
    });

    server.run(shutdown).await?;
    tracing::info!("taskhub exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for ctrl-c");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
