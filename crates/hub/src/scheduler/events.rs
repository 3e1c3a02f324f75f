//! Typed scheduler notifications.

use std::collections::HashSet;

use tokio::sync::mpsc;

use taskhub_core::{EngineId, FailureReason, TaskId, TaskSubmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Dispatched,
    Finished,
    Failed,
}

/// Something the scheduler decided that the outside world must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// The task was routed to `engine_id`; the submission must be delivered.
    Dispatched {
        task_id: TaskId,
        engine_id: EngineId,
        submission: TaskSubmission,
    },
    /// An engine returned a result. `engine_id` is where it ran.
    Finished {
        task_id: TaskId,
        engine_id: EngineId,
        success: bool,
    },
    /// The scheduler failed the task itself.
    Failed {
        task_id: TaskId,
        reason: FailureReason,
    },
}

impl SchedulerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Dispatched { .. } => EventKind::Dispatched,
            Self::Finished { .. } => EventKind::Finished,
            Self::Failed { .. } => EventKind::Failed,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Self::Dispatched { task_id, .. }
            | Self::Finished { task_id, .. }
            | Self::Failed { task_id, .. } => task_id,
        }
    }
}

struct Subscriber {
    kinds: HashSet<EventKind>,
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

/// Fans events out to subscribers, each receiving every matching event once.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn subscribe(
        &mut self,
        kinds: impl IntoIterator<Item = EventKind>,
    ) -> mpsc::UnboundedReceiver<SchedulerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(Subscriber {
            kinds: kinds.into_iter().collect(),
            tx,
        });
        rx
    }

    /// Deliver an event; subscribers whose receiver is gone are dropped.
    pub fn publish(&mut self, event: &SchedulerEvent) {
        let kind = event.kind();
        self.subscribers.retain(|sub| {
            if !sub.kinds.contains(&kind) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(id: &str) -> SchedulerEvent {
        SchedulerEvent::Failed {
            task_id: TaskId::from(id),
            reason: FailureReason::DependencyTimeout,
        }
    }

    #[test]
    fn subscribers_only_see_their_kinds() {
        let mut bus = EventBus::default();
        let mut failures = bus.subscribe([EventKind::Failed]);
        let mut finishes = bus.subscribe([EventKind::Finished]);

        bus.publish(&failed("a"));

        assert_eq!(failures.try_recv().unwrap(), failed("a"));
        assert!(failures.try_recv().is_err());
        assert!(finishes.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut bus = EventBus::default();
        let rx = bus.subscribe([EventKind::Failed]);
        drop(rx);
        bus.publish(&failed("a"));
        assert!(bus.is_empty());
    }
}
