//! The hub process: sockets plus one event loop around [`Hub`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use taskhub_store::TaskRecordStore;
use taskhub_wire::{EventPublisher, HubRequest, Transport, ZmqPublisher, ZmqRouter};

use crate::config::HubConfig;
use crate::error::ServerError;
use crate::hub::{Hub, Outbound};

/// How often registration timeouts and grace periods are swept.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

pub struct HubServer {
    hub: Hub,
    router: ZmqRouter,
    publisher: ZmqPublisher,
    audit_interval: Duration,
    router_transport: Transport,
    publisher_transport: Transport,
}

impl HubServer {
    /// Bind the ROUTER and PUB sockets described by `config`.
    #[instrument(skip_all, fields(router = %config.endpoints.router))]
    pub async fn bind(
        config: &HubConfig,
        store: Arc<dyn TaskRecordStore>,
    ) -> Result<Self, ServerError> {
        let options = config.hub_options()?;
        let session = config.session();
        let router_transport = config.router_transport()?;
        let publisher_transport = config.publisher_transport()?;

        let router = ZmqRouter::bind(&router_transport, session.clone()).await?;
        let publisher = ZmqPublisher::bind(&publisher_transport, session.clone()).await?;
        info!(
            router = %router_transport,
            publisher = %publisher_transport,
            signed = session.is_signed(),
            "hub sockets bound"
        );

        Ok(Self {
            hub: Hub::new(options, store),
            router,
            publisher,
            audit_interval: config.audit_interval(),
            router_transport,
            publisher_transport,
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn router_transport(&self) -> &Transport {
        &self.router_transport
    }

    pub fn publisher_transport(&self) -> &Transport {
        &self.publisher_transport
    }

    /// Run until `shutdown` is notified or a shutdown request's grace delay
    /// has elapsed.
    pub async fn run(mut self, shutdown: Arc<Notify>) -> Result<(), ServerError> {
        let mut heartbeat = tokio::time::interval(self.hub.options().heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut audit = tokio::time::interval(self.audit_interval);
        audit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("hub running");
        loop {
            let deadline = self.hub.shutdown_deadline();
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = sleep_until(deadline) => {
                    info!("shutdown delay elapsed");
                    break;
                }
                received = self.router.recv() => match received {
                    Ok((peer, message)) => match HubRequest::from_message(&message) {
                        Ok(request) => {
                            self.hub
                                .handle(&peer, message.msg_id(), request, Instant::now())
                                .await?;
                        }
                        Err(e) => {
                            warn!(peer = %peer, topic = %message.topic, error = %e, "dropping undecodable request");
                        }
                    },
                    Err(e) => warn!(error = %e, "dropping malformed frames"),
                },
                _ = heartbeat.tick() => self.hub.beat(Instant::now()).await?,
                _ = audit.tick() => self.hub.audit(Instant::now()).await?,
                _ = sweep.tick() => self.hub.tick(Instant::now()).await?,
            }
            self.flush().await;
        }

        self.flush().await;
        info!("hub stopped");
        Ok(())
    }

    /// Send everything the hub queued. Send failures are logged per message.
    async fn flush(&mut self) {
        for outbound in self.hub.drain_outbox() {
            match outbound {
                Outbound::Reply {
                    peer,
                    reply,
                    parent,
                } => {
                    let message = match reply.to_message(parent) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(peer = %peer, kind = reply.kind(), error = %e, "failed to encode reply");
                            continue;
                        }
                    };
                    if let Err(e) = self.router.send(&peer, &message).await {
                        warn!(peer = %peer, kind = reply.kind(), error = %e, "failed to send reply");
                    }
                }
                Outbound::Broadcast(broadcast) => {
                    let result = match broadcast.to_message() {
                        Ok(message) => self.publisher.publish(message).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(()) => debug!(topic = broadcast.topic(), "broadcast sent"),
                        Err(e) => warn!(topic = broadcast.topic(), error = %e, "failed to broadcast"),
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
