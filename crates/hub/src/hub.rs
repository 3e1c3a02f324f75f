//! The hub façade: requests in, replies and broadcasts out.
//!
//! [`Hub`] owns the registry, heart monitor, and scheduler and mirrors every
//! task into the record store. It does no I/O on sockets itself: handlers
//! queue [`Outbound`] messages that the server loop drains and sends. Only
//! [`HubError::Invariant`] escapes a handler; every other error becomes an
//! error reply to the requesting peer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskhub_core::{
    Condition, EngineId, FailureReason, FieldValue, HubError, QueueKind, RecordField,
    RecordFilter, RecordPatch, ReplyStatus, TaskId, TaskRecord, TaskResult, TaskSubmission,
};
use taskhub_store::TaskRecordStore;
use taskhub_wire::{Broadcast, EngineQueue, HubReply, HubRequest, PeerId, QueueEntry};

use crate::heart::{HeartEvent, HeartMonitor};
use crate::registry::{EngineState, Registry};
use crate::scheduler::{EventKind, Scheme, SchedulerEvent, TaskScheduler};

/// Typed settings for one hub.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub scheme: Scheme,
    /// Max outstanding scheduled tasks per engine, 0 = unlimited.
    pub hwm: usize,
    pub heartbeat_period: Duration,
    pub max_missed: u32,
    pub registration_timeout: Duration,
    pub grace_period: Duration,
    pub shutdown_delay: Duration,
    /// Fixed seed for the random schemes.
    pub seed: Option<u64>,
}

impl Default for HubOptions {
    fn default() -> Self {
        let heartbeat_period = Duration::from_millis(3000);
        Self {
            scheme: Scheme::default(),
            hwm: 0,
            heartbeat_period,
            max_missed: 3,
            registration_timeout: Registry::timeout_for_period(heartbeat_period),
            grace_period: Duration::from_secs(5),
            shutdown_delay: Duration::from_secs(1),
            seed: None,
        }
    }
}

/// A message the hub wants sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// To one peer on the ROUTER socket. `parent` is `None` for unsolicited
    /// messages such as task execution.
    Reply {
        peer: PeerId,
        reply: HubReply,
        parent: Option<Uuid>,
    },
    /// To every subscriber on the PUB socket.
    Broadcast(Broadcast),
}

/// Direct tasks left on a removed engine.
#[derive(Debug)]
struct StrandedTasks {
    deadline: Instant,
    engine_id: EngineId,
    tasks: Vec<TaskId>,
}

pub struct Hub {
    options: HubOptions,
    registry: Registry,
    heart: HeartMonitor,
    scheduler: TaskScheduler,
    store: Arc<dyn TaskRecordStore>,
    /// Engine id → the socket peer its traffic comes from.
    peers: HashMap<EngineId, PeerId>,
    /// Reverse of `peers`, kept after removal so late results still resolve.
    peer_engines: HashMap<PeerId, EngineId>,
    /// Direct (mux) tasks outstanding per registered engine.
    mux_pending: HashMap<EngineId, Vec<TaskId>>,
    /// Tasks each registered engine finished, in completion order.
    completed: HashMap<EngineId, Vec<TaskId>>,
    stranded: Vec<StrandedTasks>,
    outbox: Vec<Outbound>,
    shutdown_at: Option<Instant>,
}

impl Hub {
    pub fn new(options: HubOptions, store: Arc<dyn TaskRecordStore>) -> Self {
        let mut scheduler = TaskScheduler::new(options.scheme, options.hwm, options.grace_period);
        if let Some(seed) = options.seed {
            scheduler = scheduler.with_seed(seed);
        }
        info!(
            scheme = %options.scheme,
            hwm = options.hwm,
            heartbeat_ms = options.heartbeat_period.as_millis() as u64,
            store = store.backend_name(),
            "hub initialized"
        );
        Self {
            registry: Registry::new(options.registration_timeout),
            heart: HeartMonitor::new(options.heartbeat_period, options.max_missed),
            scheduler,
            store,
            peers: HashMap::new(),
            peer_engines: HashMap::new(),
            mux_pending: HashMap::new(),
            completed: HashMap::new(),
            stranded: Vec::new(),
            outbox: Vec::new(),
            shutdown_at: None,
            options,
        }
    }

    // ── entry points ─────────────────────────────────────────────────

    /// Handle one decoded request from `peer`. `msg_id` becomes the parent
    /// of the reply.
    pub async fn handle(
        &mut self,
        peer: &PeerId,
        msg_id: Uuid,
        request: HubRequest,
        now: Instant,
    ) -> Result<(), HubError> {
        let kind = request.kind();
        debug!(peer = %peer, kind, "handling request");

        let outcome = match request {
            HubRequest::Register {
                queue_identity,
                heart_identity,
            } => self
                .register(peer, &queue_identity, &heart_identity, now)
                .map(Some),
            HubRequest::Unregister { engine_id } => self.unregister(engine_id, now).map(Some),
            HubRequest::ConnectionRequest => Ok(Some(HubReply::Connection {
                engines: self.registry.engines(),
            })),
            HubRequest::Pong {
                heart_identity,
                generation,
            } => {
                self.heart.handle_pong(&heart_identity, generation);
                Ok(None)
            }
            HubRequest::TaskReply { task_id, result } => {
                self.task_reply(peer, task_id, result).await.map(|()| None)
            }
            HubRequest::Output {
                task_id,
                stream,
                text,
            } => {
                self.mirror(&task_id, RecordPatch::output(&stream, text)).await;
                Ok(None)
            }
            HubRequest::Submit(submission) => self
                .submit(peer, submission, None, now)
                .await
                .map(|task_id| Some(HubReply::Submitted { task_id })),
            HubRequest::QueueStatus { targets, verbose } => {
                self.queue_status(targets.as_deref(), verbose).map(Some)
            }
            HubRequest::LoadRequest { targets } => self.loads(targets.as_deref()).map(Some),
            HubRequest::PurgeRequest {
                task_ids,
                engine_ids,
                all,
            } => self.purge(&task_ids, &engine_ids, all).await.map(Some),
            HubRequest::ResultRequest { task_ids } => self.results(&task_ids).await.map(Some),
            HubRequest::ResubmitRequest { task_ids } => {
                self.resubmit(peer, &task_ids, now).await.map(Some)
            }
            HubRequest::ShutdownRequest => Ok(Some(self.shutdown(now))),
        };

        match outcome {
            Ok(Some(reply)) => self.reply(peer, reply, Some(msg_id)),
            Ok(None) => {}
            Err(HubError::Invariant(msg)) => return Err(HubError::Invariant(msg)),
            Err(err) => {
                warn!(peer = %peer, kind, error = %err, "request failed");
                self.reply(peer, HubReply::error(&err), Some(msg_id));
            }
        }
        self.flush_scheduler().await
    }

    /// One heartbeat period elapsed: settle hearts, then ping everyone.
    pub async fn beat(&mut self, now: Instant) -> Result<(), HubError> {
        let beat = self.heart.beat();
        for event in beat.events {
            match event {
                HeartEvent::NewHeart(heart) => self.confirm(&heart)?,
                HeartEvent::HeartFailure(heart) => match self.registry.by_heart(&heart) {
                    Some(engine_id) if self.registry.is_registered(engine_id) => {
                        warn!(engine_id, heart = %heart, "engine heart failed, removing engine");
                        self.remove_engine(engine_id, now)?;
                    }
                    _ => {
                        debug!(heart = %heart, "failed heart belongs to no registered engine");
                        self.heart.forget(&heart);
                    }
                },
            }
        }
        self.outbox.push(Outbound::Broadcast(Broadcast::Ping {
            generation: beat.generation,
        }));
        self.flush_scheduler().await
    }

    /// Sweep deadlines: registration timeouts and grace periods.
    pub async fn tick(&mut self, now: Instant) -> Result<(), HubError> {
        for connector in self.registry.expire(now) {
            self.heart.forget(&connector.heart_identity);
            if let Some(peer) = self.peers.remove(&connector.engine_id) {
                self.peer_engines.remove(&peer);
            }
        }
        self.scheduler.expire_grace(now);
        self.expire_stranded(now).await;
        self.flush_scheduler().await
    }

    /// Fail queued tasks whose dependency timeout has passed.
    pub async fn audit(&mut self, now: Instant) -> Result<(), HubError> {
        let expired = self.scheduler.audit_timeouts(now);
        if expired > 0 {
            info!(expired, "queued tasks timed out");
        }
        self.flush_scheduler().await
    }

    /// Take every message queued for sending.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Set once a shutdown request was accepted.
    pub fn shutdown_deadline(&self) -> Option<Instant> {
        self.shutdown_at
    }

    /// Receive scheduler events of the given kinds as they are produced.
    pub fn subscribe(
        &mut self,
        kinds: impl IntoIterator<Item = EventKind>,
    ) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        self.scheduler.subscribe(kinds)
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn heart(&self) -> &HeartMonitor {
        &self.heart
    }

    pub fn store(&self) -> &Arc<dyn TaskRecordStore> {
        &self.store
    }

    pub fn engine_state(&self, engine_id: EngineId) -> Option<EngineState> {
        self.registry.state(engine_id)
    }

    // ── registration ─────────────────────────────────────────────────

    fn register(
        &mut self,
        peer: &PeerId,
        queue_identity: &str,
        heart_identity: &str,
        now: Instant,
    ) -> Result<HubReply, HubError> {
        let engine_id = self.registry.register(queue_identity, heart_identity, now)?;
        // The next pong from this heart must surface as a new heart.
        self.heart.forget(heart_identity);
        self.peers.insert(engine_id, peer.clone());
        self.peer_engines.insert(peer.clone(), engine_id);
        Ok(HubReply::Registered {
            engine_id,
            heartbeat_period_ms: u64::try_from(self.options.heartbeat_period.as_millis())
                .unwrap_or(u64::MAX),
        })
    }

    fn confirm(&mut self, heart: &str) -> Result<(), HubError> {
        let Some(connector) = self.registry.confirm(heart) else {
            debug!(heart, "heart has no pending registration");
            return Ok(());
        };
        let engine_id = connector.engine_id;
        self.scheduler.add_engine(engine_id)?;
        self.mux_pending.insert(engine_id, Vec::new());
        self.completed.insert(engine_id, Vec::new());
        self.outbox.push(Outbound::Broadcast(Broadcast::EngineRegistered {
            engine_id,
            queue_identity: connector.queue_identity,
        }));
        Ok(())
    }

    fn unregister(&mut self, engine_id: EngineId, now: Instant) -> Result<HubReply, HubError> {
        self.remove_engine(engine_id, now)?;
        Ok(HubReply::Unregistered { engine_id })
    }

    fn remove_engine(&mut self, engine_id: EngineId, now: Instant) -> Result<(), HubError> {
        let connector = self.registry.unregister(engine_id)?;
        self.heart.forget(&connector.heart_identity);
        self.scheduler.on_engine_removed(engine_id, now)?;
        self.peers.remove(&engine_id);
        self.completed.remove(&engine_id);

        let mux = self.mux_pending.remove(&engine_id).unwrap_or_default();
        if !mux.is_empty() {
            info!(engine_id, stranded = mux.len(), "direct tasks stranded on removed engine");
            self.stranded.push(StrandedTasks {
                deadline: now + self.options.grace_period,
                engine_id,
                tasks: mux,
            });
        }
        self.outbox
            .push(Outbound::Broadcast(Broadcast::EngineUnregistered { engine_id }));
        Ok(())
    }

    // ── task traffic ─────────────────────────────────────────────────

    async fn submit(
        &mut self,
        peer: &PeerId,
        submission: TaskSubmission,
        resubmitted_from: Option<TaskId>,
        now: Instant,
    ) -> Result<TaskId, HubError> {
        let task_id = submission.task_id.clone();
        if self.scheduler.context().all_ids.contains(&task_id) {
            return Err(HubError::DuplicateTask(task_id));
        }
        let direct_target = match submission.queue {
            QueueKind::Mux => Some(self.mux_target(&submission)?),
            QueueKind::Task => None,
        };

        let mut record = TaskRecord::from_submission(&submission, peer.to_string());
        record.resubmitted_from = resubmitted_from;
        self.store.add_record(record).await?;

        match direct_target {
            Some(engine_id) => self.send_direct(engine_id, submission).await?,
            None => self.scheduler.submit(submission, now)?,
        }
        info!(task_id = %task_id, client = %peer, "task submitted");
        Ok(task_id)
    }

    /// The single engine a direct submission is addressed to.
    fn mux_target(&self, submission: &TaskSubmission) -> Result<EngineId, HubError> {
        match submission.header.targets.as_slice() {
            [engine_id] => {
                self.validate_targets(Some(&[*engine_id]))?;
                Ok(*engine_id)
            }
            other => Err(HubError::InvalidTarget(format!(
                "direct submission needs exactly one target engine, got {}",
                other.len()
            ))),
        }
    }

    async fn send_direct(
        &mut self,
        engine_id: EngineId,
        submission: TaskSubmission,
    ) -> Result<(), HubError> {
        let peer = self.peer(engine_id)?;
        self.mux_pending
            .entry(engine_id)
            .or_default()
            .push(submission.task_id.clone());
        self.mirror(&submission.task_id, RecordPatch::destination(engine_id))
            .await;
        self.outbox.push(Outbound::Reply {
            peer,
            reply: HubReply::Execute(submission),
            parent: None,
        });
        Ok(())
    }

    async fn task_reply(
        &mut self,
        peer: &PeerId,
        task_id: TaskId,
        mut result: TaskResult,
    ) -> Result<(), HubError> {
        // Only the peer an engine registered from may report for it.
        let Some(engine_id) = self.peer_engines.get(peer).copied() else {
            warn!(peer = %peer, task_id = %task_id, "result from unknown peer");
            return Ok(());
        };
        result.engine_id = Some(engine_id);

        if result.status == ReplyStatus::UnmetDependency {
            if self.take_direct(&task_id, engine_id) {
                warn!(task_id = %task_id, engine_id, "direct task refused by its only engine");
                self.record_failure(&task_id, FailureReason::ImpossibleDependency)
                    .await;
                return Ok(());
            }
            return match self.scheduler.on_unmet(&task_id, engine_id) {
                Err(HubError::Invariant(msg)) => Err(HubError::Invariant(msg)),
                Err(err) => {
                    warn!(task_id = %task_id, engine_id, error = %err, "dropping unmet-dependency reply");
                    Ok(())
                }
                Ok(()) => Ok(()),
            };
        }

        if !self.take_direct(&task_id, engine_id) {
            match self
                .scheduler
                .on_result(&task_id, engine_id, result.is_success())
            {
                Ok(()) => {}
                Err(HubError::Invariant(msg)) => return Err(HubError::Invariant(msg)),
                Err(err) => {
                    warn!(task_id = %task_id, engine_id, error = %err, "dropping result");
                    return Ok(());
                }
            }
        }

        debug!(task_id = %task_id, engine_id, status = ?result.status, "result recorded");
        if let Some(done) = self.completed.get_mut(&engine_id) {
            done.push(task_id.clone());
        }
        self.mirror(&task_id, RecordPatch::finished(result)).await;
        Ok(())
    }

    /// Remove a direct task from its engine, or from the stranded set if
    /// its engine is gone. False if it is not a direct task of `engine_id`.
    fn take_direct(&mut self, task_id: &TaskId, engine_id: EngineId) -> bool {
        if let Some(tasks) = self.mux_pending.get_mut(&engine_id) {
            if let Some(pos) = tasks.iter().position(|id| id == task_id) {
                tasks.remove(pos);
                return true;
            }
        }
        let Some(stranded) = self
            .stranded
            .iter_mut()
            .find(|s| s.engine_id == engine_id && s.tasks.contains(task_id))
        else {
            return false;
        };
        stranded.tasks.retain(|id| id != task_id);
        self.stranded.retain(|s| !s.tasks.is_empty());
        info!(task_id = %task_id, engine_id, "late result from removed engine");
        true
    }

    async fn expire_stranded(&mut self, now: Instant) {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.stranded)
            .into_iter()
            .partition(|s| s.deadline <= now);
        self.stranded = kept;
        for stranded in expired {
            for task_id in &stranded.tasks {
                warn!(task_id = %task_id, engine_id = stranded.engine_id, "engine died before returning a result");
                self.record_failure(task_id, FailureReason::EngineError(stranded.engine_id))
                    .await;
            }
        }
    }

    /// Whether the task was accepted and has not resolved yet.
    fn is_pending(&self, task_id: &TaskId) -> bool {
        self.scheduler.is_pending(task_id)
            || self.mux_pending.values().any(|tasks| tasks.contains(task_id))
            || self.stranded.iter().any(|s| s.tasks.contains(task_id))
    }

    // ── client queries ───────────────────────────────────────────────

    /// `None` means every registered engine.
    fn validate_targets(&self, targets: Option<&[EngineId]>) -> Result<Vec<EngineId>, HubError> {
        if self.registry.is_empty() {
            return Err(HubError::NoEnginesRegistered);
        }
        let Some(targets) = targets else {
            return Ok(self.registry.ids());
        };
        if targets.is_empty() {
            return Err(HubError::NoEnginesRegistered);
        }
        if let Some(unknown) = targets.iter().find(|id| !self.registry.is_registered(**id)) {
            return Err(HubError::NoSuchEngine(*unknown));
        }
        Ok(targets.to_vec())
    }

    fn queue_status(
        &self,
        targets: Option<&[EngineId]>,
        verbose: bool,
    ) -> Result<HubReply, HubError> {
        let engines = self
            .validate_targets(targets)?
            .into_iter()
            .map(|engine_id| {
                let queue = EngineQueue {
                    queue: QueueEntry::from_ids(self.direct_on(engine_id), verbose),
                    tasks: QueueEntry::from_ids(self.scheduler.pending_on(engine_id), verbose),
                    completed: QueueEntry::from_ids(
                        self.completed.get(&engine_id).cloned().unwrap_or_default(),
                        verbose,
                    ),
                };
                (engine_id, queue)
            })
            .collect();
        Ok(HubReply::QueueStatus {
            engines,
            unassigned: self.scheduler.queued(),
        })
    }

    fn loads(&self, targets: Option<&[EngineId]>) -> Result<HubReply, HubError> {
        let loads = self
            .validate_targets(targets)?
            .into_iter()
            .map(|engine_id| {
                let scheduled = self.scheduler.load(engine_id).unwrap_or(0);
                (engine_id, scheduled + self.direct_on(engine_id).len())
            })
            .collect();
        Ok(HubReply::Loads { loads })
    }

    fn direct_on(&self, engine_id: EngineId) -> Vec<TaskId> {
        self.mux_pending.get(&engine_id).cloned().unwrap_or_default()
    }

    async fn purge(
        &mut self,
        task_ids: &[TaskId],
        engine_ids: &[EngineId],
        all: bool,
    ) -> Result<HubReply, HubError> {
        if all {
            let dropped = self
                .store
                .drop_matching_records(&RecordFilter::finished())
                .await?;
            for done in self.completed.values_mut() {
                done.clear();
            }
            info!(dropped, "purged every finished record");
            return Ok(HubReply::Purged { dropped });
        }

        for task_id in task_ids {
            if self.is_pending(task_id) {
                return Err(HubError::TaskPending(task_id.clone()));
            }
            self.store.get_record(task_id).await?;
        }
        let engines = if engine_ids.is_empty() {
            Vec::new()
        } else {
            self.validate_targets(Some(engine_ids))?
        };

        let mut dropped = 0;
        for task_id in task_ids {
            self.store.drop_record(task_id).await?;
            dropped += 1;
        }
        if !engines.is_empty() {
            let filter = RecordFilter::finished().with(
                RecordField::EngineId,
                Condition::In(engines.iter().map(|id| FieldValue::from(*id)).collect()),
            );
            dropped += self.store.drop_matching_records(&filter).await?;
            for engine_id in &engines {
                if let Some(done) = self.completed.get_mut(engine_id) {
                    done.clear();
                }
            }
        }
        for done in self.completed.values_mut() {
            done.retain(|id| !task_ids.contains(id));
        }
        info!(dropped, "purged records");
        Ok(HubReply::Purged { dropped })
    }

    async fn results(&self, task_ids: &[TaskId]) -> Result<HubReply, HubError> {
        let mut completed = BTreeMap::new();
        let mut pending = Vec::new();
        for task_id in task_ids {
            if self.is_pending(task_id) {
                pending.push(task_id.clone());
                continue;
            }
            let record = self.store.get_record(task_id).await?;
            if record.is_finished() {
                completed.insert(task_id.clone(), record);
            } else {
                pending.push(task_id.clone());
            }
        }
        Ok(HubReply::Results { completed, pending })
    }

    /// Submit copies of finished tasks under fresh ids.
    async fn resubmit(
        &mut self,
        peer: &PeerId,
        task_ids: &[TaskId],
        now: Instant,
    ) -> Result<HubReply, HubError> {
        let mut records = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            if self.is_pending(task_id) {
                return Err(HubError::TaskPending(task_id.clone()));
            }
            records.push(self.store.get_record(task_id).await?);
        }

        let mut mapping = BTreeMap::new();
        for record in records {
            let mut submission = record.to_submission();
            submission.task_id = TaskId::random();
            submission.header.submitted = Utc::now();
            let fresh = self
                .submit(peer, submission, Some(record.task_id.clone()), now)
                .await?;
            debug!(from = %record.task_id, to = %fresh, "task resubmitted");
            mapping.insert(record.task_id, fresh);
        }
        Ok(HubReply::Resubmitted { mapping })
    }

    fn shutdown(&mut self, now: Instant) -> HubReply {
        let delay = self.options.shutdown_delay;
        info!(delay_ms = delay.as_millis() as u64, "shutdown requested");
        self.outbox.push(Outbound::Broadcast(Broadcast::Shutdown));
        self.shutdown_at.get_or_insert(now + delay);
        HubReply::ShuttingDown
    }

    // ── plumbing ─────────────────────────────────────────────────────

    fn reply(&mut self, peer: &PeerId, reply: HubReply, parent: Option<Uuid>) {
        self.outbox.push(Outbound::Reply {
            peer: peer.clone(),
            reply,
            parent,
        });
    }

    fn peer(&self, engine_id: EngineId) -> Result<PeerId, HubError> {
        self.peers
            .get(&engine_id)
            .cloned()
            .ok_or_else(|| HubError::Invariant(format!("engine {engine_id} has no known peer")))
    }

    /// Act on everything the scheduler decided since the last flush.
    async fn flush_scheduler(&mut self) -> Result<(), HubError> {
        for event in self.scheduler.drain_events() {
            match event {
                SchedulerEvent::Dispatched {
                    task_id,
                    engine_id,
                    submission,
                } => {
                    let peer = self.peer(engine_id)?;
                    self.mirror(&task_id, RecordPatch::destination(engine_id))
                        .await;
                    self.outbox.push(Outbound::Reply {
                        peer,
                        reply: HubReply::Execute(submission),
                        parent: None,
                    });
                }
                SchedulerEvent::Failed { task_id, reason } => {
                    self.record_failure(&task_id, reason).await;
                }
                SchedulerEvent::Finished { .. } => {}
            }
        }
        Ok(())
    }

    /// Store a synthesized error result for a task the hub failed itself.
    async fn record_failure(&self, task_id: &TaskId, reason: FailureReason) {
        let engine_id = match reason {
            FailureReason::EngineError(engine_id) => Some(engine_id),
            _ => None,
        };
        let result = TaskResult {
            status: ReplyStatus::Error,
            engine_id,
            started: None,
            completed: Utc::now(),
            content: reason.to_content(task_id),
            buffers: Vec::new(),
        };
        self.mirror(task_id, RecordPatch::finished(result)).await;
    }

    /// Apply a patch to a task record; store failures are logged, not fatal.
    async fn mirror(&self, task_id: &TaskId, patch: RecordPatch) {
        if let Err(e) = self.store.update_record(task_id, patch).await {
            warn!(task_id = %task_id, error = %e, "failed to update task record");
        }
    }
}
