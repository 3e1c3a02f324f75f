//! The scheduler's routing tables.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use taskhub_core::{Dependency, EngineId, TaskId, TaskSubmission};

/// Engines in least-recently-serviced order.
///
/// Each engine holds a slot in an ordered map keyed by a service sequence
/// number; moving an engine to the back is one removal and one insertion.
#[derive(Debug, Default)]
pub struct LruOrder {
    next_seq: u64,
    order: BTreeMap<u64, EngineId>,
    slots: HashMap<EngineId, u64>,
}

impl LruOrder {
    /// Append an engine at the back. Returns false if it was already present.
    pub fn push_back(&mut self, engine_id: EngineId) -> bool {
        if self.slots.contains_key(&engine_id) {
            return false;
        }
        let seq = self.bump();
        self.order.insert(seq, engine_id);
        self.slots.insert(engine_id, seq);
        true
    }

    pub fn move_to_back(&mut self, engine_id: EngineId) {
        if let Some(old) = self.slots.get(&engine_id).copied() {
            self.order.remove(&old);
            let seq = self.bump();
            self.order.insert(seq, engine_id);
            self.slots.insert(engine_id, seq);
        }
    }

    pub fn remove(&mut self, engine_id: EngineId) -> bool {
        match self.slots.remove(&engine_id) {
            Some(seq) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, engine_id: EngineId) -> bool {
        self.slots.contains_key(&engine_id)
    }

    /// Oldest-serviced first.
    pub fn iter(&self) -> impl Iterator<Item = EngineId> + '_ {
        self.order.values().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// A task the scheduler has accepted and not yet resolved.
#[derive(Debug, Clone)]
pub struct Job {
    pub submission: TaskSubmission,
    /// Submission order, used to keep queue re-examination deterministic.
    pub seq: u64,
    pub targets: BTreeSet<EngineId>,
    /// Engines that must not receive this task.
    pub blacklist: HashSet<EngineId>,
    pub deadline: Option<Instant>,
    pub retries_left: u32,
}

impl Job {
    pub fn task_id(&self) -> &TaskId {
        &self.submission.task_id
    }

    pub fn after(&self) -> &Dependency {
        &self.submission.header.after
    }

    pub fn follow(&self) -> &Dependency {
        &self.submission.header.follow
    }

    /// Every id this job still references through `after` or `follow`.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &TaskId> + '_ {
        self.after().ids().iter().chain(self.follow().ids().iter())
    }
}

/// Tasks stranded on a removed engine, waiting out the grace period.
#[derive(Debug)]
pub struct Orphans {
    pub deadline: Instant,
    pub jobs: HashMap<TaskId, Job>,
}

/// All routing state of one scheduler, held in one place.
///
/// Per-engine collections (`loads`, `pending`, `completed`, `failed`, and
/// the LRU order) always hold exactly the registered engines.
#[derive(Debug, Default)]
pub struct SchedulerContext {
    pub order: LruOrder,
    pub loads: HashMap<EngineId, usize>,
    pub pending: HashMap<EngineId, HashMap<TaskId, Job>>,
    pub completed: HashMap<EngineId, HashSet<TaskId>>,
    pub failed: HashMap<EngineId, HashSet<TaskId>>,

    /// Where each dispatched task ran (or is running).
    pub destinations: HashMap<TaskId, EngineId>,
    pub all_completed: HashSet<TaskId>,
    pub all_failed: HashSet<TaskId>,
    /// Every task id ever submitted.
    pub all_ids: HashSet<TaskId>,

    /// Accepted tasks not yet dispatched.
    pub depending: HashMap<TaskId, Job>,
    /// Dependency id -> queued tasks that reference it.
    pub graph: HashMap<TaskId, HashSet<TaskId>>,

    pub orphans: HashMap<EngineId, Orphans>,
    /// Engines that were registered once and have since been removed.
    pub retired: HashSet<EngineId>,
}

impl SchedulerContext {
    pub fn is_registered(&self, engine_id: EngineId) -> bool {
        self.order.contains(engine_id)
    }

    pub fn is_done(&self, task_id: &TaskId) -> bool {
        self.all_completed.contains(task_id) || self.all_failed.contains(task_id)
    }

    /// Add an engine with empty bookkeeping. Returns false if already present.
    pub fn insert_engine(&mut self, engine_id: EngineId) -> bool {
        if !self.order.push_back(engine_id) {
            return false;
        }
        self.loads.insert(engine_id, 0);
        self.pending.insert(engine_id, HashMap::new());
        self.completed.insert(engine_id, HashSet::new());
        self.failed.insert(engine_id, HashSet::new());
        self.retired.remove(&engine_id);
        true
    }

    /// Remove an engine from every per-engine collection, returning the
    /// tasks that were still pending on it.
    pub fn remove_engine(&mut self, engine_id: EngineId) -> Option<HashMap<TaskId, Job>> {
        if !self.order.remove(engine_id) {
            return None;
        }
        self.loads.remove(&engine_id);
        self.completed.remove(&engine_id);
        self.failed.remove(&engine_id);
        self.retired.insert(engine_id);
        Some(self.pending.remove(&engine_id).unwrap_or_default())
    }

    /// Queue a job and index it under every dependency id not yet done.
    pub fn save_unmet(&mut self, job: Job) {
        let task_id = job.task_id().clone();
        let waiting_on: Vec<TaskId> = job
            .dependency_ids()
            .filter(|id| !self.is_done(id))
            .cloned()
            .collect();
        for dep in waiting_on {
            self.graph.entry(dep).or_default().insert(task_id.clone());
        }
        self.depending.insert(task_id, job);
    }

    /// Take a job out of the queue and drop its graph entries.
    pub fn take_queued(&mut self, task_id: &TaskId) -> Option<Job> {
        let job = self.depending.remove(task_id)?;
        for dep in job.dependency_ids() {
            if let Some(waiters) = self.graph.get_mut(dep) {
                waiters.remove(task_id);
                if waiters.is_empty() {
                    self.graph.remove(dep);
                }
            }
        }
        Some(job)
    }

    /// Queued task ids in submission order.
    pub fn queued_in_order(&self, ids: impl IntoIterator<Item = TaskId>) -> Vec<TaskId> {
        let mut jobs: Vec<(u64, TaskId)> = ids
            .into_iter()
            .filter_map(|id| self.depending.get(&id).map(|job| (job.seq, id)))
            .collect();
        jobs.sort_unstable_by_key(|(seq, _)| *seq);
        jobs.into_iter().map(|(_, id)| id).collect()
    }

    /// Which engine holds `task_id` as pending, if any.
    pub fn pending_engine(&self, task_id: &TaskId) -> Option<EngineId> {
        self.pending
            .iter()
            .find(|(_, jobs)| jobs.contains_key(task_id))
            .map(|(eid, _)| *eid)
    }
}
