//! taskhub-engine: a demo engine that echoes task content back.
//!
//! # Usage
//!
//! ```bash
//! # Against a local hub on the default ports
//! taskhub-engine
//!
//! # Remote hub with signed messages
//! TASKHUB_SESSION_KEY=secret taskhub-engine \
//!     --router tcp://10.0.0.5:5570 --publisher tcp://10.0.0.5:5571
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use taskhub_engine::{EchoHandler, EngineBuilder, EngineRunner};
use taskhub_wire::{Session, Transport};

/// Demo compute engine for a taskhub hub.
#[derive(Parser, Debug)]
#[command(name = "taskhub-engine", version, about)]
struct Cli {
    /// Hub ROUTER endpoint.
    #[arg(long, env = "TASKHUB_ENDPOINTS_ROUTER", default_value = "tcp://127.0.0.1:5570")]
    router: String,

    /// Hub PUB endpoint.
    #[arg(long, env = "TASKHUB_ENDPOINTS_PUBLISHER", default_value = "tcp://127.0.0.1:5571")]
    publisher: String,

    /// Prefix for this engine's identities.
    #[arg(long, default_value = "engine")]
    name: String,

    /// HMAC key shared with the hub. Unset means unsigned messages.
    #[arg(long, env = "TASKHUB_SESSION_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
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
    let router: Transport = cli
        .router
        .parse()
        .with_context(|| format!("parsing router endpoint '{}'", cli.router))?;
    let publisher: Transport = cli
        .publisher
        .parse()
        .with_context(|| format!("parsing publisher endpoint '{}'", cli.publisher))?;

    let config = EngineBuilder::new(&cli.name)
        .router(router)
        .publisher(publisher)
        .session(Session::from_key(cli.key.as_deref()))
        .request_timeout(Duration::from_millis(cli.timeout_ms))
        .build();

    let summary = EngineRunner::run(Arc::new(EchoHandler), config, None).await?;
    tracing::info!(
        engine_id = summary.engine_id,
        exit = ?summary.exit,
        executed = summary.executed,
        "taskhub-engine exited cleanly"
    );
    Ok(())
}
