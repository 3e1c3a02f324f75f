//! Dependency-aware task routing.
//!
//! [`TaskScheduler`] is a synchronous state machine: operations mutate the
//! [`SchedulerContext`] (time-dependent ones take an explicit `now`) and
//! leave the resulting [`SchedulerEvent`]s in an outbox drained by the hub.
//!
//! Whenever a task resolves (result, failure, timeout) the queued tasks that
//! reference it are re-examined through a worklist until nothing changes,
//! so one failure can cascade through a whole chain of dependents.

pub mod context;
pub mod events;
pub mod scheme;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskhub_core::{DepMode, EngineId, FailureReason, HubError, TaskId, TaskSubmission};

pub use context::{Job, LruOrder, Orphans, SchedulerContext};
pub use events::{EventBus, EventKind, SchedulerEvent};
pub use scheme::Scheme;

/// Where a task currently is, from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted, waiting on dependencies or for a usable engine.
    Queued,
    Running(EngineId),
    /// Its engine was removed; waiting out the grace period.
    Orphaned(EngineId),
    Completed,
    Failed,
}

enum RunOutcome {
    Dispatched,
    Failed,
    Blocked(Job),
}

pub struct TaskScheduler {
    ctx: SchedulerContext,
    scheme: Scheme,
    /// Max outstanding tasks per engine, 0 = unlimited.
    hwm: usize,
    grace_period: Duration,
    rng: StdRng,
    next_seq: u64,
    /// `Some(id)`: id resolved, re-examine its dependents. `None`: re-examine everything.
    worklist: VecDeque<Option<TaskId>>,
    outbox: Vec<SchedulerEvent>,
    bus: EventBus,
}

impl TaskScheduler {
    pub fn new(scheme: Scheme, hwm: usize, grace_period: Duration) -> Self {
        Self {
            ctx: SchedulerContext::default(),
            scheme,
            hwm,
            grace_period,
            rng: StdRng::from_entropy(),
            next_seq: 0,
            worklist: VecDeque::new(),
            outbox: Vec::new(),
            bus: EventBus::default(),
        }
    }

    /// Use a fixed seed for the random schemes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    // ── engine lifecycle ─────────────────────────────────────────────

    /// Add a freshly registered engine and retry everything queued.
    pub fn add_engine(&mut self, engine_id: EngineId) -> Result<(), HubError> {
        if !self.ctx.insert_engine(engine_id) {
            return Err(HubError::Invariant(format!(
                "engine {engine_id} added to the scheduler twice"
            )));
        }
        info!(engine_id, engines = self.ctx.order.len(), "engine joined scheduling pool");
        self.worklist.push_back(None);
        self.settle();
        Ok(())
    }

    /// Drop an engine from the pool. Tasks still pending on it wait out the
    /// grace period before they are failed or retried.
    pub fn on_engine_removed(&mut self, engine_id: EngineId, now: Instant) -> Result<(), HubError> {
        let stranded = self.ctx.remove_engine(engine_id).ok_or_else(|| {
            HubError::Invariant(format!("engine {engine_id} is not in the scheduling pool"))
        })?;
        info!(
            engine_id,
            stranded = stranded.len(),
            "engine left scheduling pool"
        );
        if !stranded.is_empty() {
            self.ctx.orphans.insert(
                engine_id,
                Orphans {
                    deadline: now + self.grace_period,
                    jobs: stranded,
                },
            );
        }
        // Queued tasks may have just lost the only engine they could run on.
        self.worklist.push_back(None);
        self.settle();
        Ok(())
    }

    // ── task traffic ─────────────────────────────────────────────────

    /// Accept a task. Dispatches immediately when its dependencies allow.
    pub fn submit(&mut self, submission: TaskSubmission, now: Instant) -> Result<(), HubError> {
        let task_id = submission.task_id.clone();
        if !self.ctx.all_ids.insert(task_id.clone()) {
            return Err(HubError::DuplicateTask(task_id));
        }

        let header = &submission.header;
        let valid = header.after.is_valid_for(&task_id, &self.ctx.all_ids)
            && header.follow.is_valid_for(&task_id, &self.ctx.all_ids);
        let deadline = header
            .timeout
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(|d| now + d);
        let job = Job {
            seq: self.bump_seq(),
            targets: header.targets.iter().copied().collect(),
            blacklist: HashSet::new(),
            deadline,
            retries_left: header.retries,
            submission,
        };
        debug!(task_id = %task_id, "task submitted");

        if !valid {
            self.mark_failed(task_id, FailureReason::InvalidDependency);
        } else if let Some(reason) = self.impossibility(&job) {
            self.mark_failed(task_id, reason);
        } else if job.after().check(&self.ctx.all_completed, &self.ctx.all_failed) {
            if let RunOutcome::Blocked(job) = self.maybe_run(job) {
                self.ctx.save_unmet(job);
            }
        } else {
            self.ctx.save_unmet(job);
        }

        self.settle();
        Ok(())
    }

    /// Record an engine's result for a task and release its dependents.
    ///
    /// Late results from a removed engine are accepted while the task is
    /// still inside its grace period.
    pub fn on_result(
        &mut self,
        task_id: &TaskId,
        engine_id: EngineId,
        success: bool,
    ) -> Result<(), HubError> {
        if self.take_pending(task_id, engine_id).is_some() {
            let sets = if success {
                &mut self.ctx.completed
            } else {
                &mut self.ctx.failed
            };
            if let Some(set) = sets.get_mut(&engine_id) {
                set.insert(task_id.clone());
            }
        } else if self.take_orphan(task_id, engine_id).is_some() {
            info!(task_id = %task_id, engine_id, "late result from removed engine");
        } else {
            return Err(HubError::UnknownTask(task_id.clone()));
        }

        if success {
            self.ctx.all_completed.insert(task_id.clone());
        } else {
            self.ctx.all_failed.insert(task_id.clone());
        }
        debug!(task_id = %task_id, engine_id, success, "task finished");
        self.outbox.push(SchedulerEvent::Finished {
            task_id: task_id.clone(),
            engine_id,
            success,
        });
        self.worklist.push_back(Some(task_id.clone()));
        self.settle();
        Ok(())
    }

    /// An engine refused a task because a dependency is unmet on it. The
    /// engine is blacklisted for that task and the task is routed again.
    pub fn on_unmet(&mut self, task_id: &TaskId, engine_id: EngineId) -> Result<(), HubError> {
        let mut job = self
            .take_pending(task_id, engine_id)
            .ok_or_else(|| HubError::UnknownTask(task_id.clone()))?;
        self.ctx.destinations.remove(task_id);
        job.blacklist.insert(engine_id);

        if self.ctx.order.iter().all(|eid| job.blacklist.contains(&eid)) {
            info!(task_id = %task_id, "every engine rejected task");
            self.mark_failed(task_id.clone(), FailureReason::ImpossibleDependency);
        } else if let RunOutcome::Blocked(job) = self.maybe_run(job) {
            self.ctx.save_unmet(job);
        }
        self.settle();
        Ok(())
    }

    /// Fail every queued task whose deadline has passed. Returns how many.
    pub fn audit_timeouts(&mut self, now: Instant) -> usize {
        let expired: Vec<TaskId> = self
            .ctx
            .depending
            .iter()
            .filter(|(_, job)| job.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();
        let expired = self.ctx.queued_in_order(expired);
        for task_id in &expired {
            info!(task_id = %task_id, "task timed out waiting on dependencies");
            self.fail_queued(task_id, FailureReason::DependencyTimeout);
        }
        self.settle();
        expired.len()
    }

    /// Resolve tasks stranded on removed engines whose grace period is over.
    ///
    /// Tasks with retries left are routed again, away from the dead engine;
    /// the rest fail with `EngineError`. Returns how many tasks were handled.
    pub fn expire_grace(&mut self, now: Instant) -> usize {
        let mut expired: Vec<EngineId> = self
            .ctx
            .orphans
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(eid, _)| *eid)
            .collect();
        expired.sort_unstable();

        let mut handled = 0;
        for engine_id in expired {
            let Some(orphans) = self.ctx.orphans.remove(&engine_id) else {
                continue;
            };
            let mut jobs: Vec<Job> = orphans.jobs.into_values().collect();
            jobs.sort_unstable_by_key(|job| job.seq);
            handled += jobs.len();

            for mut job in jobs {
                let task_id = job.task_id().clone();
                self.ctx.destinations.remove(&task_id);
                if job.retries_left == 0 {
                    warn!(task_id = %task_id, engine_id, "engine died before returning a result");
                    self.mark_failed(task_id, FailureReason::EngineError(engine_id));
                    continue;
                }

                job.retries_left -= 1;
                job.blacklist.insert(engine_id);
                info!(
                    task_id = %task_id,
                    engine_id,
                    retries_left = job.retries_left,
                    "retrying task stranded on dead engine"
                );
                if let Some(reason) = self.impossibility(&job) {
                    self.mark_failed(task_id, reason);
                } else if let RunOutcome::Blocked(job) = self.maybe_run(job) {
                    self.ctx.save_unmet(job);
                }
            }
        }
        self.settle();
        handled
    }

    // ── events ───────────────────────────────────────────────────────

    /// Receive every future event of the given kinds.
    pub fn subscribe(
        &mut self,
        kinds: impl IntoIterator<Item = EventKind>,
    ) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        self.bus.subscribe(kinds)
    }

    /// Take the events produced since the last drain, fanning them out to
    /// subscribers on the way.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        let events = std::mem::take(&mut self.outbox);
        for event in &events {
            self.bus.publish(event);
        }
        events
    }

    // ── introspection ────────────────────────────────────────────────

    /// Registered engines, least recently serviced first.
    pub fn engines(&self) -> Vec<EngineId> {
        self.ctx.order.iter().collect()
    }

    pub fn load(&self, engine_id: EngineId) -> Option<usize> {
        self.ctx.loads.get(&engine_id).copied()
    }

    pub fn loads(&self) -> BTreeMap<EngineId, usize> {
        self.ctx.loads.iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Tasks dispatched to an engine and not yet finished, in submission order.
    pub fn pending_on(&self, engine_id: EngineId) -> Vec<TaskId> {
        let mut jobs: Vec<&Job> = self
            .ctx
            .pending
            .get(&engine_id)
            .map(|p| p.values().collect())
            .unwrap_or_default();
        jobs.sort_unstable_by_key(|job| job.seq);
        jobs.into_iter().map(|job| job.task_id().clone()).collect()
    }

    pub fn completed_on(&self, engine_id: EngineId) -> Vec<TaskId> {
        Self::sorted(self.ctx.completed.get(&engine_id))
    }

    pub fn failed_on(&self, engine_id: EngineId) -> Vec<TaskId> {
        Self::sorted(self.ctx.failed.get(&engine_id))
    }

    /// Number of accepted tasks not yet dispatched.
    pub fn queued(&self) -> usize {
        self.ctx.depending.len()
    }

    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.ctx.queued_in_order(self.ctx.depending.keys().cloned())
    }

    /// Whether the task is accepted but not yet resolved.
    pub fn is_pending(&self, task_id: &TaskId) -> bool {
        matches!(
            self.status(task_id),
            Some(TaskState::Queued | TaskState::Running(_) | TaskState::Orphaned(_))
        )
    }

    pub fn status(&self, task_id: &TaskId) -> Option<TaskState> {
        if self.ctx.all_completed.contains(task_id) {
            return Some(TaskState::Completed);
        }
        if self.ctx.all_failed.contains(task_id) {
            return Some(TaskState::Failed);
        }
        if self.ctx.depending.contains_key(task_id) {
            return Some(TaskState::Queued);
        }
        if let Some(eid) = self.ctx.pending_engine(task_id) {
            return Some(TaskState::Running(eid));
        }
        self.ctx
            .orphans
            .iter()
            .find(|(_, o)| o.jobs.contains_key(task_id))
            .map(|(eid, _)| TaskState::Orphaned(*eid))
    }

    // ── internals ────────────────────────────────────────────────────

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn sorted(set: Option<&HashSet<TaskId>>) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
        ids.sort();
        ids
    }

    /// Remove a task from an engine's pending map, releasing its load slot.
    /// Schedules a full queue pass if the engine drops back under the hwm.
    fn take_pending(&mut self, task_id: &TaskId, engine_id: EngineId) -> Option<Job> {
        let job = self.ctx.pending.get_mut(&engine_id)?.remove(task_id)?;
        if let Some(load) = self.ctx.loads.get_mut(&engine_id) {
            let was_full = self.hwm > 0 && *load >= self.hwm;
            *load = load.saturating_sub(1);
            if was_full {
                self.worklist.push_back(None);
            }
        }
        Some(job)
    }

    fn take_orphan(&mut self, task_id: &TaskId, engine_id: EngineId) -> Option<Job> {
        let orphans = self.ctx.orphans.get_mut(&engine_id)?;
        let job = orphans.jobs.remove(task_id)?;
        if orphans.jobs.is_empty() {
            self.ctx.orphans.remove(&engine_id);
        }
        Some(job)
    }

    /// Engines this job may be dispatched to right now, in LRU order.
    fn candidates(&self, job: &Job) -> Vec<EngineId> {
        let follow = job.follow();
        self.ctx
            .order
            .iter()
            .filter(|eid| !job.blacklist.contains(eid))
            .filter(|eid| job.targets.is_empty() || job.targets.contains(eid))
            .filter(|eid| {
                self.hwm == 0 || self.ctx.loads.get(eid).copied().unwrap_or(0) < self.hwm
            })
            .filter(|eid| {
                follow.is_empty()
                    || match (self.ctx.completed.get(eid), self.ctx.failed.get(eid)) {
                        (Some(completed), Some(failed)) => follow.check(completed, failed),
                        _ => false,
                    }
            })
            .collect()
    }

    /// Why the job can never run, if that is already known.
    fn impossibility(&self, job: &Job) -> Option<FailureReason> {
        let failed = &self.ctx.all_failed;
        if job.after().unreachable(failed)
            || job.follow().unreachable(failed)
            || self.follow_impossible(job)
        {
            Some(FailureReason::ImpossibleDependency)
        } else {
            None
        }
    }

    /// Locality check: a `follow all` whose resolved ids ran on more than
    /// one engine, or on an engine that is gone, can never be satisfied;
    /// a `follow any` fails once every id resolved and none of their
    /// engines is left.
    fn follow_impossible(&self, job: &Job) -> bool {
        let follow = job.follow();
        if follow.is_empty() {
            return false;
        }
        let done: Vec<&TaskId> = follow
            .relevant_done(&self.ctx.all_completed, &self.ctx.all_failed)
            .collect();
        let dests: HashSet<EngineId> = done
            .iter()
            .filter_map(|id| self.ctx.destinations.get(*id).copied())
            .collect();

        match follow.mode() {
            DepMode::All => {
                let ran_nowhere = done
                    .iter()
                    .any(|id| !self.ctx.destinations.contains_key(*id));
                ran_nowhere
                    || dests.len() > 1
                    || dests.iter().any(|eid| !self.ctx.is_registered(*eid))
            }
            DepMode::Any => {
                done.len() == follow.ids().len()
                    && !dests.iter().any(|eid| self.ctx.is_registered(*eid))
            }
        }
    }

    /// `targets` minus the blacklist no longer meets any registered engine.
    fn targets_impossible(&self, job: &Job) -> bool {
        !job.targets.is_empty()
            && !job
                .targets
                .iter()
                .any(|eid| !job.blacklist.contains(eid) && self.ctx.is_registered(*eid))
    }

    fn maybe_run(&mut self, job: Job) -> RunOutcome {
        let candidates = self.candidates(&job);
        if candidates.is_empty() {
            if self.targets_impossible(&job) {
                let task_id = job.task_id().clone();
                info!(task_id = %task_id, "no target engine can run task");
                self.mark_failed(task_id, FailureReason::ImpossibleDependency);
                return RunOutcome::Failed;
            }
            return RunOutcome::Blocked(job);
        }
        self.dispatch(job, &candidates);
        RunOutcome::Dispatched
    }

    fn dispatch(&mut self, job: Job, candidates: &[EngineId]) {
        let loads: Vec<usize> = candidates
            .iter()
            .map(|eid| self.ctx.loads.get(eid).copied().unwrap_or(0))
            .collect();
        let engine_id = candidates[self.scheme.choose(&loads, &mut self.rng)];
        let task_id = job.task_id().clone();

        *self.ctx.loads.entry(engine_id).or_insert(0) += 1;
        self.ctx.order.move_to_back(engine_id);
        self.ctx.destinations.insert(task_id.clone(), engine_id);
        debug!(task_id = %task_id, engine_id, scheme = %self.scheme, "task dispatched");

        self.outbox.push(SchedulerEvent::Dispatched {
            task_id: task_id.clone(),
            engine_id,
            submission: job.submission.clone(),
        });
        self.ctx
            .pending
            .entry(engine_id)
            .or_default()
            .insert(task_id, job);
    }

    /// Resolve a task as failed by the scheduler itself.
    fn mark_failed(&mut self, task_id: TaskId, reason: FailureReason) {
        debug!(task_id = %task_id, reason = reason.name(), "task failed");
        self.ctx.all_failed.insert(task_id.clone());
        self.outbox.push(SchedulerEvent::Failed {
            task_id: task_id.clone(),
            reason,
        });
        self.worklist.push_back(Some(task_id));
    }

    fn fail_queued(&mut self, task_id: &TaskId, reason: FailureReason) {
        if self.ctx.take_queued(task_id).is_some() {
            self.mark_failed(task_id.clone(), reason);
        }
    }

    /// Re-examine queued tasks until no resolution is left to propagate.
    fn settle(&mut self) {
        while let Some(item) = self.worklist.pop_front() {
            let ids: Vec<TaskId> = match item {
                Some(resolved) => self
                    .ctx
                    .graph
                    .remove(&resolved)
                    .map(|waiters| waiters.into_iter().collect())
                    .unwrap_or_default(),
                None => self.ctx.depending.keys().cloned().collect(),
            };
            for task_id in self.ctx.queued_in_order(ids) {
                self.reexamine(&task_id);
            }
        }
    }

    fn reexamine(&mut self, task_id: &TaskId) {
        let Some(job) = self.ctx.depending.get(task_id) else {
            return;
        };
        if let Some(reason) = self.impossibility(job) {
            self.fail_queued(task_id, reason);
            return;
        }
        if !job.after().check(&self.ctx.all_completed, &self.ctx.all_failed) {
            return;
        }
        if let Some(job) = self.ctx.take_queued(task_id) {
            if let RunOutcome::Blocked(job) = self.maybe_run(job) {
                self.ctx.save_unmet(job);
            }
        }
    }
}
