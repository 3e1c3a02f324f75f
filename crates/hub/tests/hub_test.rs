//! End-to-end scenarios against the hub façade, without sockets.
//!
//! Engines are simulated by peers that register, answer pings, and send
//! results; time is driven by explicit instants.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use taskhub_core::{
    Dependency, EngineId, QueueKind, ReplyStatus, TaskHeader, TaskId, TaskResult, TaskStatus,
    TaskSubmission,
};
use taskhub_hub::{EngineState, EventKind, HeartState, Hub, HubOptions, Outbound, SchedulerEvent};
use taskhub_store::{MemoryStore, TaskRecordStore};
use taskhub_wire::{Broadcast, HubReply, HubRequest, PeerId, QueueEntry};
use uuid::Uuid;

struct Harness {
    hub: Hub,
    start: Instant,
    /// Everything the hub queued for sending, in order.
    sent: Vec<Outbound>,
    /// Hearts that answer pings: (peer, heart identity).
    hearts: Vec<(PeerId, String)>,
}

impl Harness {
    fn new() -> Self {
        Self::with_options(HubOptions {
            seed: Some(7),
            ..HubOptions::default()
        })
    }

    fn with_options(options: HubOptions) -> Self {
        let store: Arc<dyn TaskRecordStore> = Arc::new(MemoryStore::new());
        Self {
            hub: Hub::new(options, store),
            start: Instant::now(),
            sent: Vec::new(),
            hearts: Vec::new(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }

    fn collect(&mut self) {
        let out = self.hub.drain_outbox();
        self.sent.extend(out);
    }

    /// Send a request and return the reply addressed to it, if any.
    async fn send(&mut self, peer: &PeerId, request: HubRequest, now: Instant) -> Option<HubReply> {
        let msg_id = Uuid::new_v4();
        self.hub.handle(peer, msg_id, request, now).await.unwrap();
        self.collect();
        self.sent.iter().find_map(|o| match o {
            Outbound::Reply {
                reply,
                parent: Some(parent),
                ..
            } if *parent == msg_id => Some(reply.clone()),
            _ => None,
        })
    }

    /// One heartbeat period in which every live heart answers.
    async fn heartbeat(&mut self, now: Instant) {
        let generation = self.hub.heart().generation();
        for (peer, heart) in self.hearts.clone() {
            let pong = HubRequest::Pong {
                heart_identity: heart,
                generation,
            };
            self.send(&peer, pong, now).await;
        }
        self.hub.beat(now).await.unwrap();
        self.collect();
    }

    async fn tick(&mut self, now: Instant) {
        self.hub.tick(now).await.unwrap();
        self.collect();
    }

    /// Register an engine for `peer` and confirm it with one heartbeat.
    async fn engine(&mut self, peer: &PeerId, name: &str, now: Instant) -> EngineId {
        let engine_id = self.register(peer, name, now).await;
        self.heartbeat(now).await;
        assert_eq!(self.hub.engine_state(engine_id), Some(EngineState::Registered));
        engine_id
    }

    async fn register(&mut self, peer: &PeerId, name: &str, now: Instant) -> EngineId {
        let heart = format!("{name}-heart");
        let request = HubRequest::Register {
            queue_identity: format!("{name}-queue"),
            heart_identity: heart.clone(),
        };
        match self.send(peer, request, now).await {
            Some(HubReply::Registered { engine_id, .. }) => {
                self.hearts.push((peer.clone(), heart));
                engine_id
            }
            other => panic!("registration failed: {other:?}"),
        }
    }

    /// Silence a peer's heart until the hub declares it dead.
    async fn kill(&mut self, peer: &PeerId, now: Instant) {
        self.hearts.retain(|(p, _)| p != peer);
        for _ in 0..self.hub.options().max_missed {
            self.heartbeat(now).await;
        }
    }

    async fn submit(&mut self, peer: &PeerId, submission: TaskSubmission, now: Instant) -> HubReply {
        self.send(peer, HubRequest::Submit(submission), now)
            .await
            .expect("submit reply")
    }

    async fn finish(&mut self, peer: &PeerId, task_id: &TaskId, ok: bool, now: Instant) {
        let request = HubRequest::TaskReply {
            task_id: task_id.clone(),
            result: result(ok),
        };
        assert!(self.send(peer, request, now).await.is_none());
    }

    /// Report that `peer` cannot run the task because a dependency is unmet there.
    async fn refuse(&mut self, peer: &PeerId, task_id: &TaskId, now: Instant) {
        let mut refusal = result(false);
        refusal.status = ReplyStatus::UnmetDependency;
        let request = HubRequest::TaskReply {
            task_id: task_id.clone(),
            result: refusal,
        };
        assert!(self.send(peer, request, now).await.is_none());
    }

    /// Task ids handed to `peer` for execution since the last call.
    fn executed(&mut self, peer: &PeerId) -> Vec<TaskId> {
        let mut ids = Vec::new();
        self.sent.retain(|o| match o {
            Outbound::Reply {
                peer: to,
                reply: HubReply::Execute(submission),
                ..
            } if to == peer => {
                ids.push(submission.task_id.clone());
                false
            }
            _ => true,
        });
        ids
    }

    fn broadcasts(&self) -> Vec<Broadcast> {
        self.sent
            .iter()
            .filter_map(|o| match o {
                Outbound::Broadcast(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, task_id: &TaskId) -> taskhub_core::TaskRecord {
        self.hub.store().get_record(task_id).await.unwrap()
    }
}

fn peer(n: u8) -> PeerId {
    PeerId(vec![n])
}

fn task(id: &str, header: TaskHeader) -> TaskSubmission {
    let mut submission =
        TaskSubmission::new(serde_json::json!({"task": id})).with_header(header);
    submission.task_id = TaskId::from(id);
    submission
}

fn plain(id: &str) -> TaskSubmission {
    task(id, TaskHeader::default())
}

fn on(engine_id: EngineId) -> TaskHeader {
    TaskHeader {
        targets: vec![engine_id],
        ..TaskHeader::default()
    }
}

fn result(ok: bool) -> TaskResult {
    TaskResult {
        status: if ok { ReplyStatus::Ok } else { ReplyStatus::Error },
        engine_id: None,
        started: Some(Utc::now()),
        completed: Utc::now(),
        content: serde_json::json!({"value": 42}),
        buffers: vec![],
    }
}

fn error_kind(reply: Option<HubReply>) -> String {
    match reply {
        Some(HubReply::Error { kind, .. }) => kind,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

fn ids(raw: &[&str]) -> Vec<TaskId> {
    raw.iter().map(|s| TaskId::from(*s)).collect()
}

// ── registration ─────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_confirms_registration() {
    let mut h = Harness::new();
    let e1 = peer(1);
    let t0 = h.at(0);

    let id = h.register(&e1, "e1", t0).await;
    assert_eq!(h.hub.engine_state(id), Some(EngineState::Incoming));
    assert!(h.hub.registry().engines().is_empty());

    h.heartbeat(h.at(100)).await;
    assert_eq!(h.hub.engine_state(id), Some(EngineState::Registered));
    assert!(h.broadcasts().contains(&Broadcast::EngineRegistered {
        engine_id: id,
        queue_identity: "e1-queue".into(),
    }));

    match h.send(&peer(9), HubRequest::ConnectionRequest, h.at(200)).await {
        Some(HubReply::Connection { engines }) => {
            assert_eq!(engines.get(&id).map(String::as_str), Some("e1-queue"));
        }
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn unconfirmed_registration_expires_and_can_be_retried() {
    let mut h = Harness::new();
    let e1 = peer(1);

    let first = h.register(&e1, "e1", h.at(0)).await;
    h.hearts.clear();

    // Default period 3 s: the registration may wait 6 s for a heartbeat.
    h.tick(h.at(5_999)).await;
    assert_eq!(h.hub.engine_state(first), Some(EngineState::Incoming));
    h.tick(h.at(6_000)).await;
    assert_eq!(h.hub.engine_state(first), Some(EngineState::Removed));

    let second = h.engine(&e1, "e1", h.at(6_100)).await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn duplicate_identity_is_rejected() {
    let mut h = Harness::new();
    h.register(&peer(1), "e1", h.at(0)).await;
    let reply = h
        .send(
            &peer(2),
            HubRequest::Register {
                queue_identity: "e1-queue".into(),
                heart_identity: "other-heart".into(),
            },
            h.at(0),
        )
        .await;
    assert_eq!(error_kind(reply), "DuplicateIdentity");
}

#[tokio::test]
async fn unregister_twice_is_unknown_engine() {
    let mut h = Harness::new();
    let e1 = peer(1);
    let id = h.engine(&e1, "e1", h.at(0)).await;

    let reply = h.send(&e1, HubRequest::Unregister { engine_id: id }, h.at(10)).await;
    assert_eq!(reply, Some(HubReply::Unregistered { engine_id: id }));
    assert!(h
        .broadcasts()
        .contains(&Broadcast::EngineUnregistered { engine_id: id }));

    let again = h.send(&e1, HubRequest::Unregister { engine_id: id }, h.at(20)).await;
    assert_eq!(error_kind(again), "UnknownEngine");
    assert_eq!(h.hub.engine_state(id), Some(EngineState::Removed));
}

// ── dependencies ─────────────────────────────────────────────────────

#[tokio::test]
async fn free_task_dispatches_immediately() {
    let mut h = Harness::new();
    let e1 = peer(1);
    let c = peer(9);
    h.engine(&e1, "e1", h.at(0)).await;

    let reply = h.submit(&c, plain("a"), h.at(10)).await;
    assert_eq!(reply, HubReply::Submitted { task_id: "a".into() });
    assert_eq!(h.executed(&e1), ids(&["a"]));
}

#[tokio::test]
async fn after_dependency_dispatches_on_completion() {
    let mut h = Harness::new();
    let e1 = peer(1);
    let c = peer(9);
    let eid = h.engine(&e1, "e1", h.at(0)).await;

    h.submit(&c, plain("a"), h.at(10)).await;
    let after_a = TaskHeader {
        after: Dependency::all_of(ids(&["a"])),
        ..TaskHeader::default()
    };
    h.submit(&c, task("b", after_a), h.at(20)).await;
    assert_eq!(h.executed(&e1), ids(&["a"]));
    assert_eq!(h.record(&"b".into()).await.engine_id, None);

    h.finish(&e1, &"a".into(), true, h.at(30)).await;
    assert_eq!(h.executed(&e1), ids(&["b"]));
    assert_eq!(h.record(&"b".into()).await.engine_id, Some(eid));
    assert_eq!(h.record(&"a".into()).await.status, TaskStatus::Ok);
}

#[tokio::test]
async fn follow_dependency_runs_where_its_dependency_ran() {
    let mut h = Harness::new();
    let (p1, p2, c) = (peer(1), peer(2), peer(9));
    let e1 = h.engine(&p1, "e1", h.at(0)).await;
    h.engine(&p2, "e2", h.at(0)).await;

    h.submit(&c, task("a", on(e1)), h.at(10)).await;
    h.finish(&p1, &"a".into(), true, h.at(20)).await;
    // Keep e1 busier so load balancing alone would pick e2.
    h.submit(&c, task("busy", on(e1)), h.at(30)).await;
    h.executed(&p1);

    let follow_a = TaskHeader {
        follow: Dependency::all_of(ids(&["a"])),
        ..TaskHeader::default()
    };
    h.submit(&c, task("c", follow_a), h.at(40)).await;
    assert_eq!(h.executed(&p1), ids(&["c"]));
    assert!(h.executed(&p2).is_empty());
}

#[tokio::test]
async fn follow_all_across_two_engines_is_impossible() {
    let mut h = Harness::new();
    let (p1, p2, c) = (peer(1), peer(2), peer(9));
    let e1 = h.engine(&p1, "e1", h.at(0)).await;
    let e2 = h.engine(&p2, "e2", h.at(0)).await;

    h.submit(&c, task("a", on(e1)), h.at(10)).await;
    h.submit(&c, task("b", on(e2)), h.at(10)).await;
    let follow_both = TaskHeader {
        follow: Dependency::all_of(ids(&["a", "b"])),
        ..TaskHeader::default()
    };
    h.submit(&c, task("c", follow_both), h.at(20)).await;

    h.finish(&p1, &"a".into(), true, h.at(30)).await;
    assert_eq!(h.record(&"c".into()).await.status, TaskStatus::Pending);

    h.finish(&p2, &"b".into(), true, h.at(40)).await;
    let record = h.record(&"c".into()).await;
    assert_eq!(record.status, TaskStatus::Error);
    let content = &record.result.unwrap().content;
    assert_eq!(content["ename"], "ImpossibleDependency");
}

#[tokio::test]
async fn failed_dependency_fails_dependents() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;

    h.submit(&c, plain("a"), h.at(10)).await;
    let after_a = TaskHeader {
        after: Dependency::all_of(ids(&["a"])),
        ..TaskHeader::default()
    };
    h.submit(&c, task("b", after_a), h.at(20)).await;
    h.finish(&p1, &"a".into(), false, h.at(30)).await;

    let record = h.record(&"b".into()).await;
    assert_eq!(record.status, TaskStatus::Error);
    assert_eq!(record.result.unwrap().content["ename"], "ImpossibleDependency");
    assert_eq!(h.executed(&p1), ids(&["a"]));
}

#[tokio::test]
async fn queued_task_times_out() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    h.submit(&c, plain("a"), h.at(0)).await;

    let header = TaskHeader {
        after: Dependency::all_of(ids(&["a"])),
        timeout: Some(1.0),
        ..TaskHeader::default()
    };
    h.submit(&c, task("b", header), h.at(0)).await;

    h.hub.audit(h.at(999)).await.unwrap();
    assert_eq!(h.record(&"b".into()).await.status, TaskStatus::Pending);
    h.hub.audit(h.at(1_000)).await.unwrap();
    let record = h.record(&"b".into()).await;
    assert_eq!(record.result.unwrap().content["ename"], "DependencyTimeout");
}

// ── engine failure ───────────────────────────────────────────────────

#[tokio::test]
async fn dead_engine_fails_task_once_after_grace_period() {
    let mut h = Harness::new();
    let (p1, p2, c) = (peer(1), peer(2), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    let e2 = h.engine(&p2, "e2", h.at(0)).await;
    let mut failures = h.hub.subscribe([EventKind::Failed]);

    h.submit(&c, task("d", on(e2)), h.at(100)).await;
    assert_eq!(h.executed(&p2), ids(&["d"]));

    h.kill(&p2, h.at(1_000)).await;
    assert_eq!(h.hub.engine_state(e2), Some(EngineState::Removed));

    h.tick(h.at(5_999)).await;
    assert_eq!(h.record(&"d".into()).await.status, TaskStatus::Pending);
    assert!(failures.try_recv().is_err());

    h.tick(h.at(6_000)).await;
    let record = h.record(&"d".into()).await;
    assert_eq!(record.status, TaskStatus::Error);
    assert_eq!(record.result.unwrap().content["ename"], "EngineError");
    assert!(matches!(
        failures.try_recv(),
        Ok(SchedulerEvent::Failed { ref task_id, .. }) if task_id.as_str() == "d"
    ));

    // A result arriving after the failure changes nothing.
    h.finish(&p2, &"d".into(), true, h.at(7_000)).await;
    h.tick(h.at(12_000)).await;
    assert!(failures.try_recv().is_err());
    assert_eq!(h.record(&"d".into()).await.status, TaskStatus::Error);
}

#[tokio::test]
async fn late_result_within_grace_period_is_accepted() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    h.submit(&c, plain("d"), h.at(0)).await;

    h.kill(&p1, h.at(100)).await;
    h.finish(&p1, &"d".into(), true, h.at(2_000)).await;
    h.tick(h.at(10_000)).await;
    assert_eq!(h.record(&"d".into()).await.status, TaskStatus::Ok);
}

#[tokio::test]
async fn retries_route_away_from_dead_engine() {
    let mut h = Harness::new();
    let (p1, p2, c) = (peer(1), peer(2), peer(9));
    let e1 = h.engine(&p1, "e1", h.at(0)).await;
    h.engine(&p2, "e2", h.at(0)).await;

    h.submit(&c, plain("x"), h.at(10)).await;
    let retry_once = TaskHeader {
        retries: 1,
        ..TaskHeader::default()
    };
    h.submit(&c, task("d", retry_once), h.at(20)).await;
    assert_eq!(h.executed(&p1), ids(&["x"]));
    assert_eq!(h.executed(&p2), ids(&["d"]));

    h.kill(&p2, h.at(100)).await;
    h.tick(h.at(5_100)).await;
    assert_eq!(h.executed(&p1), ids(&["d"]));
    let record = h.record(&"d".into()).await;
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.engine_id, Some(e1));
}

#[tokio::test]
async fn refused_task_moves_on_until_every_engine_refused() {
    let mut h = Harness::new();
    let (p1, p2, c) = (peer(1), peer(2), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    let e2 = h.engine(&p2, "e2", h.at(0)).await;

    h.submit(&c, plain("u"), h.at(10)).await;
    assert_eq!(h.executed(&p1), ids(&["u"]));

    h.refuse(&p1, &"u".into(), h.at(20)).await;
    assert_eq!(h.executed(&p2), ids(&["u"]));
    assert!(h.executed(&p1).is_empty());
    let record = h.record(&"u".into()).await;
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.engine_id, Some(e2));

    h.refuse(&p2, &"u".into(), h.at(30)).await;
    let record = h.record(&"u".into()).await;
    assert_eq!(record.status, TaskStatus::Error);
    assert_eq!(record.result.unwrap().content["ename"], "ImpossibleDependency");
    assert!(h.executed(&p1).is_empty());
}

#[tokio::test]
async fn refused_direct_task_fails_and_leaves_the_queue() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    let e1 = h.engine(&p1, "e1", h.at(0)).await;

    let mut direct = task("m", on(e1));
    direct.queue = QueueKind::Mux;
    h.submit(&c, direct, h.at(10)).await;
    assert_eq!(h.executed(&p1), ids(&["m"]));

    h.refuse(&p1, &"m".into(), h.at(20)).await;
    let record = h.record(&"m".into()).await;
    assert_eq!(record.status, TaskStatus::Error);
    assert_eq!(record.result.unwrap().content["ename"], "ImpossibleDependency");

    let status = HubRequest::QueueStatus {
        targets: None,
        verbose: true,
    };
    let Some(HubReply::QueueStatus { engines, .. }) = h.send(&c, status, h.at(30)).await else {
        panic!("expected a queue status reply");
    };
    assert!(engines[&e1].queue.is_empty());
    match h.send(&c, HubRequest::LoadRequest { targets: None }, h.at(30)).await {
        Some(HubReply::Loads { loads }) => assert_eq!(loads[&e1], 0),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn results_are_only_taken_from_the_engine_peer() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    let e1 = h.engine(&p1, "e1", h.at(0)).await;
    h.submit(&c, plain("x"), h.at(10)).await;
    assert_eq!(h.executed(&p1), ids(&["x"]));

    let mut forged = result(true);
    forged.engine_id = Some(e1);
    let request = HubRequest::TaskReply {
        task_id: "x".into(),
        result: forged,
    };
    assert!(h.send(&c, request, h.at(20)).await.is_none());
    assert_eq!(h.record(&"x".into()).await.status, TaskStatus::Pending);
    assert_eq!(h.hub.scheduler().pending_on(e1), ids(&["x"]));

    h.finish(&p1, &"x".into(), true, h.at(30)).await;
    assert_eq!(h.record(&"x".into()).await.status, TaskStatus::Ok);
}

#[tokio::test]
async fn stray_heart_is_dropped_once_it_fails() {
    let mut h = Harness::new();
    let stray = HubRequest::Pong {
        heart_identity: "stray".into(),
        generation: h.hub.heart().generation(),
    };
    h.send(&peer(8), stray, h.at(0)).await;
    h.heartbeat(h.at(0)).await;
    assert_eq!(h.hub.heart().state("stray"), Some(HeartState::Alive { missed: 0 }));

    for _ in 0..h.hub.options().max_missed {
        h.heartbeat(h.at(100)).await;
    }
    assert_eq!(h.hub.heart().state("stray"), None);
    assert!(h.hub.registry().engines().is_empty());
}

// ── client requests ──────────────────────────────────────────────────

#[tokio::test]
async fn targets_are_validated() {
    let mut h = Harness::new();
    let c = peer(9);
    let status = HubRequest::QueueStatus {
        targets: None,
        verbose: false,
    };
    assert_eq!(
        error_kind(h.send(&c, status, h.at(0)).await),
        "NoEnginesRegistered"
    );

    let e1 = h.engine(&peer(1), "e1", h.at(0)).await;
    let unknown = HubRequest::LoadRequest {
        targets: Some(vec![e1, 42]),
    };
    assert_eq!(error_kind(h.send(&c, unknown, h.at(10)).await), "NoSuchEngine");
    let empty = HubRequest::LoadRequest {
        targets: Some(vec![]),
    };
    assert_eq!(error_kind(h.send(&c, empty, h.at(10)).await), "NoEnginesRegistered");
}

#[tokio::test]
async fn queue_status_reports_per_engine_queues() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    let e1 = h.engine(&p1, "e1", h.at(0)).await;

    h.submit(&c, plain("a"), h.at(10)).await;
    h.submit(&c, plain("b"), h.at(10)).await;
    h.finish(&p1, &"a".into(), true, h.at(20)).await;
    let waiting = TaskHeader {
        after: Dependency::all_of(ids(&["b"])),
        ..TaskHeader::default()
    };
    h.submit(&c, task("c", waiting), h.at(30)).await;

    let reply = h
        .send(
            &c,
            HubRequest::QueueStatus {
                targets: None,
                verbose: true,
            },
            h.at(40),
        )
        .await;
    let Some(HubReply::QueueStatus { engines, unassigned }) = reply else {
        panic!("unexpected reply: {reply:?}");
    };
    assert_eq!(unassigned, 1);
    let queue = &engines[&e1];
    assert_eq!(queue.tasks, QueueEntry::Ids(ids(&["b"])));
    assert_eq!(queue.completed, QueueEntry::Ids(ids(&["a"])));
    assert!(queue.queue.is_empty());

    match h.send(&c, HubRequest::LoadRequest { targets: None }, h.at(50)).await {
        Some(HubReply::Loads { loads }) => assert_eq!(loads[&e1], 1),
        other => panic!("unexpected reply: {other:?}"),
    }
}

#[tokio::test]
async fn direct_submission_goes_to_its_one_target() {
    let mut h = Harness::new();
    let (p1, p2, c) = (peer(1), peer(2), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    let e2 = h.engine(&p2, "e2", h.at(0)).await;

    let mut direct = task("m", on(e2));
    direct.queue = QueueKind::Mux;
    assert_eq!(
        h.submit(&c, direct, h.at(10)).await,
        HubReply::Submitted { task_id: "m".into() }
    );
    assert_eq!(h.executed(&p2), ids(&["m"]));

    h.finish(&p2, &"m".into(), true, h.at(20)).await;
    let record = h.record(&"m".into()).await;
    assert_eq!(record.status, TaskStatus::Ok);
    assert_eq!(record.engine_id, Some(e2));

    let mut untargeted = plain("n");
    untargeted.queue = QueueKind::Mux;
    let reply = h.send(&c, HubRequest::Submit(untargeted), h.at(30)).await;
    assert_eq!(error_kind(reply), "InvalidTarget");
}

#[tokio::test]
async fn engine_output_is_mirrored_into_the_record() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    h.submit(&c, plain("a"), h.at(0)).await;

    for text in ["hello ", "world"] {
        let output = HubRequest::Output {
            task_id: "a".into(),
            stream: "stdout".into(),
            text: text.into(),
        };
        h.send(&p1, output, h.at(10)).await;
    }
    assert_eq!(h.record(&"a".into()).await.stdout, "hello world");
}

#[tokio::test]
async fn results_split_completed_and_pending() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    h.submit(&c, plain("a"), h.at(0)).await;
    h.submit(&c, plain("b"), h.at(0)).await;
    h.finish(&p1, &"a".into(), true, h.at(10)).await;

    let reply = h
        .send(&c, HubRequest::ResultRequest { task_ids: ids(&["a", "b"]) }, h.at(20))
        .await;
    let Some(HubReply::Results { completed, pending }) = reply else {
        panic!("unexpected reply: {reply:?}");
    };
    assert_eq!(completed.keys().cloned().collect::<Vec<_>>(), ids(&["a"]));
    assert_eq!(pending, ids(&["b"]));

    let unknown = HubRequest::ResultRequest {
        task_ids: ids(&["ghost"]),
    };
    assert_eq!(error_kind(h.send(&c, unknown, h.at(30)).await), "UnknownTask");
}

#[tokio::test]
async fn purge_refuses_pending_and_resubmit_uses_fresh_ids() {
    let mut h = Harness::new();
    let (p1, c) = (peer(1), peer(9));
    h.engine(&p1, "e1", h.at(0)).await;
    h.submit(&c, plain("a"), h.at(0)).await;
    h.executed(&p1);

    let purge_a = HubRequest::PurgeRequest {
        task_ids: ids(&["a"]),
        engine_ids: vec![],
        all: false,
    };
    assert_eq!(error_kind(h.send(&c, purge_a.clone(), h.at(10)).await), "TaskPending");
    let resubmit_a = HubRequest::ResubmitRequest {
        task_ids: ids(&["a"]),
    };
    assert_eq!(error_kind(h.send(&c, resubmit_a.clone(), h.at(10)).await), "TaskPending");

    h.finish(&p1, &"a".into(), true, h.at(20)).await;
    let reply = h.send(&c, resubmit_a, h.at(30)).await;
    let Some(HubReply::Resubmitted { mapping }) = reply else {
        panic!("unexpected reply: {reply:?}");
    };
    let fresh = mapping[&TaskId::from("a")].clone();
    assert_ne!(fresh.as_str(), "a");
    assert_eq!(h.record(&fresh).await.resubmitted_from, Some("a".into()));
    assert_eq!(h.executed(&p1), vec![fresh]);

    assert_eq!(
        h.send(&c, purge_a, h.at(40)).await,
        Some(HubReply::Purged { dropped: 1 })
    );
    let gone = HubRequest::ResultRequest {
        task_ids: ids(&["a"]),
    };
    assert_eq!(error_kind(h.send(&c, gone, h.at(50)).await), "UnknownTask");
}

#[tokio::test]
async fn duplicate_task_id_is_rejected() {
    let mut h = Harness::new();
    let c = peer(9);
    h.submit(&c, plain("a"), h.at(0)).await;
    let reply = h.send(&c, HubRequest::Submit(plain("a")), h.at(10)).await;
    assert_eq!(error_kind(reply), "DuplicateTask");
}

#[tokio::test]
async fn shutdown_replies_then_schedules_exit() {
    let mut h = Harness::new();
    let now = h.at(0);
    let reply = h.send(&peer(9), HubRequest::ShutdownRequest, now).await;
    assert_eq!(reply, Some(HubReply::ShuttingDown));
    assert!(h.broadcasts().contains(&Broadcast::Shutdown));
    assert_eq!(h.hub.shutdown_deadline(), Some(now + Duration::from_secs(1)));
}
