//! Engine lifecycle: register, keep the heart beating, run tasks, leave.
//!
//! [`EngineBuilder`] collects the connection settings and
//! [`EngineRunner::run`] drives one engine until a shutdown signal, a
//! programmatic notify, or a hub shutdown broadcast.
//!
//! The runner owns both sockets. Task executions run as separate tokio
//! tasks and hand their output and results back through a channel, so all
//! traffic to the hub leaves from the one loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskhub_core::{EngineId, ReplyStatus, TaskResult, TaskSubmission};
use taskhub_wire::{
    topics, Broadcast, EventSubscriber, HubReply, HubRequest, Session, Transport, ZmqSubscriber,
};

use crate::client::HubClient;
use crate::error::EngineError;
use crate::handler::{OutputSink, TaskFailure, TaskHandler};

// ── EngineBuilder ────────────────────────────────────────────────────

/// Fluent builder for an [`EngineConfig`].
///
/// # Example
/// ```ignore
/// let config = EngineBuilder::new("worker")
///     .router(Transport::tcp("10.0.0.5", 5570))
///     .publisher(Transport::tcp("10.0.0.5", 5571))
///     .build();
/// EngineRunner::run(Arc::new(EchoHandler), config, None).await?;
/// ```
pub struct EngineBuilder {
    name: String,
    router: Transport,
    publisher: Transport,
    session: Session,
    request_timeout: Duration,
    shutdown_timeout: Duration,
}

impl EngineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            router: Transport::tcp("127.0.0.1", 5570),
            publisher: Transport::tcp("127.0.0.1", 5571),
            session: Session::unsigned(),
            request_timeout: HubClient::DEFAULT_TIMEOUT,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// The hub's ROUTER endpoint (default: tcp://127.0.0.1:5570).
    pub fn router(mut self, transport: Transport) -> Self {
        self.router = transport;
        self
    }

    /// The hub's PUB endpoint (default: tcp://127.0.0.1:5571).
    pub fn publisher(mut self, transport: Transport) -> Self {
        self.publisher = transport;
        self
    }

    pub fn session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    /// How long to wait for the hub to answer a request (default: 5s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How long running tasks may take to finish on shutdown (default: 5s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> EngineConfig {
        EngineConfig {
            name: self.name,
            router: self.router,
            publisher: self.publisher,
            session: self.session,
            request_timeout: self.request_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Configuration produced by [`EngineBuilder`], consumed by [`EngineRunner`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix of the engine's queue and heart identities.
    pub name: String,
    pub router: Transport,
    pub publisher: Transport,
    pub session: Session,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
}

// ── EngineRunner ─────────────────────────────────────────────────────

/// Why an engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineExit {
    /// OS signal or programmatic notify.
    Signal,
    /// The hub broadcast a shutdown notice.
    HubShutdown,
    /// The connection to the hub closed.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSummary {
    pub engine_id: EngineId,
    pub exit: EngineExit,
    /// Tasks this engine was handed.
    pub executed: usize,
}

pub struct EngineRunner;

impl EngineRunner {
    /// Run one engine to completion.
    ///
    /// Returns once a shutdown was requested and in-flight tasks finished
    /// (or the shutdown timeout passed). The engine unregisters itself
    /// unless the hub is the one going away.
    pub async fn run(
        handler: Arc<dyn TaskHandler>,
        config: EngineConfig,
        shutdown_notify: Option<Arc<Notify>>,
    ) -> Result<EngineSummary, EngineError> {
        let (client, mut inbox) = HubClient::connect(&config.router, config.session.clone()).await?;
        let client = client.with_timeout(config.request_timeout);
        let subscriber = ZmqSubscriber::connect(&config.publisher, config.session.clone()).await?;
        subscriber.subscribe(topics::PING).await?;
        subscriber.subscribe(topics::NOTIFY).await?;

        let suffix = Uuid::new_v4().simple().to_string();
        let queue_identity = format!("{}-{suffix}", config.name);
        let heart_identity = format!("{}-heart-{suffix}", config.name);
        let registration = client
            .register(queue_identity.clone(), heart_identity.clone())
            .await?;
        let engine_id = registration.engine_id;
        info!(
            engine_id,
            queue = %queue_identity,
            heartbeat = ?registration.heartbeat_period,
            "engine registered, waiting for heartbeat confirmation"
        );

        let (out_tx, mut out_rx) = mpsc::channel::<HubRequest>(256);
        let mut running: JoinSet<()> = JoinSet::new();
        let mut executed = 0;

        let stop = Self::wait_for_shutdown(shutdown_notify);
        tokio::pin!(stop);

        let exit = loop {
            tokio::select! {
                _ = &mut stop => break EngineExit::Signal,
                received = subscriber.recv() => {
                    match received.and_then(|m| Broadcast::from_message(&m)) {
                        Ok(Broadcast::Ping { generation }) => {
                            let pong = HubRequest::Pong {
                                heart_identity: heart_identity.clone(),
                                generation,
                            };
                            if let Err(e) = client.send(&pong).await {
                                warn!(engine_id, error = %e, "failed to answer ping");
                            }
                        }
                        Ok(Broadcast::Shutdown) => break EngineExit::HubShutdown,
                        Ok(notice) => debug!(engine_id, topic = notice.topic(), "hub notice"),
                        Err(e) => warn!(engine_id, error = %e, "dropping undecodable broadcast"),
                    }
                }
                message = inbox.recv() => {
                    let Some(message) = message else {
                        break EngineExit::Disconnected;
                    };
                    match HubReply::from_message(&message) {
                        Ok(HubReply::Execute(submission)) => {
                            debug!(engine_id, task_id = %submission.task_id, "task received");
                            executed += 1;
                            running.spawn(execute(
                                handler.clone(),
                                engine_id,
                                submission,
                                out_tx.clone(),
                            ));
                        }
                        Ok(other) => debug!(engine_id, kind = other.kind(), "ignoring unsolicited reply"),
                        Err(e) => warn!(engine_id, error = %e, "dropping undecodable message"),
                    }
                }
                Some(request) = out_rx.recv() => forward(&client, &request).await,
                Some(joined) = running.join_next() => {
                    if let Err(e) = joined {
                        warn!(engine_id, error = %e, "task execution aborted");
                    }
                }
            }
        };

        info!(engine_id, ?exit, in_flight = running.len(), "engine stopping");
        let drained =
            tokio::time::timeout(config.shutdown_timeout, drain(&client, &mut running, &mut out_rx))
                .await;
        if drained.is_err() {
            warn!(engine_id, abandoned = running.len(), "shutdown timed out, aborting running tasks");
            running.abort_all();
        }

        if exit == EngineExit::Signal {
            match client.unregister(engine_id).await {
                Ok(()) => info!(engine_id, "engine unregistered"),
                Err(e) => warn!(engine_id, error = %e, "unregistration failed"),
            }
        }

        info!(engine_id, executed, "engine shutdown complete");
        Ok(EngineSummary {
            engine_id,
            exit,
            executed,
        })
    }

    /// Wait for either an OS shutdown signal or a programmatic notification.
    async fn wait_for_shutdown(external: Option<Arc<Notify>>) {
        match external {
            Some(notify) => {
                tokio::select! {
                    _ = Self::os_signal() => {}
                    _ = notify.notified() => {}
                }
            }
            None => Self::os_signal().await,
        }
    }

    /// SIGINT or SIGTERM on Unix, Ctrl+C elsewhere.
    async fn os_signal() {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, waiting for ctrl-c");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    }
}

/// Run one task through the handler and queue its result.
///
/// The handler runs in its own tokio task so a panic becomes an error
/// result instead of a task the hub waits on forever.
async fn execute(
    handler: Arc<dyn TaskHandler>,
    engine_id: EngineId,
    submission: TaskSubmission,
    tx: mpsc::Sender<HubRequest>,
) {
    let task_id = submission.task_id.clone();
    let output = OutputSink::new(task_id.clone(), tx.clone());
    let started = Utc::now();

    let run = tokio::spawn(async move { handler.execute(&submission, &output).await });
    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(e) => Err(TaskFailure::error("TaskPanicked", e.to_string())),
    };

    let (status, content) = match outcome {
        Ok(value) => (ReplyStatus::Ok, value),
        Err(TaskFailure::Error { ename, evalue }) => (
            ReplyStatus::Error,
            serde_json::json!({
                "ename": ename,
                "evalue": evalue,
                "task_id": task_id,
            }),
        ),
        Err(TaskFailure::UnmetDependency) => (ReplyStatus::UnmetDependency, serde_json::Value::Null),
    };
    debug!(engine_id, task_id = %task_id, ?status, "task finished");

    let result = TaskResult {
        status,
        engine_id: Some(engine_id),
        started: Some(started),
        completed: Utc::now(),
        content,
        buffers: Vec::new(),
    };
    if tx.send(HubRequest::TaskReply { task_id, result }).await.is_err() {
        warn!(engine_id, "engine loop gone, result lost");
    }
}

async fn forward(client: &HubClient, request: &HubRequest) {
    if let Err(e) = client.send(request).await {
        warn!(kind = request.kind(), error = %e, "failed to send to hub");
    }
}

/// Let running tasks finish while still forwarding what they send.
async fn drain(
    client: &HubClient,
    running: &mut JoinSet<()>,
    out_rx: &mut mpsc::Receiver<HubRequest>,
) {
    loop {
        tokio::select! {
            Some(request) = out_rx.recv() => forward(client, &request).await,
            joined = running.join_next() => match joined {
                Some(Err(e)) => warn!(error = %e, "task execution aborted"),
                Some(Ok(())) => {}
                None => break,
            },
        }
    }
    while let Ok(request) = out_rx.try_recv() {
        forward(client, &request).await;
    }
}
