//! Ping/pong liveness tracking for engine hearts.
//!
//! The hub broadcasts a ping carrying a generation number every period and
//! each engine heart answers with a pong echoing it. On every beat the
//! monitor compares who answered the previous ping with who it knows:
//! new responders become [`HeartEvent::NewHeart`], known hearts that stayed
//! silent for `max_missed` consecutive beats become
//! [`HeartEvent::HeartFailure`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use taskhub_core::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartEvent {
    /// First pong from a heart the monitor did not know.
    NewHeart(Identity),
    /// A known heart missed too many consecutive pings. Reported once.
    HeartFailure(Identity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartState {
    /// Answered a ping; promoted on the next beat.
    AwaitingFirstBeat,
    Alive { missed: u32 },
    Failed,
}

/// Result of one beat: what to broadcast and what changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beat {
    pub generation: u64,
    pub events: Vec<HeartEvent>,
}

#[derive(Debug)]
pub struct HeartMonitor {
    period: Duration,
    max_missed: u32,
    generation: u64,
    /// Known hearts and their consecutive misses.
    hearts: HashMap<Identity, u32>,
    /// Hearts that answered since the last beat.
    responses: HashSet<Identity>,
    failed: HashSet<Identity>,
}

impl HeartMonitor {
    pub fn new(period: Duration, max_missed: u32) -> Self {
        Self {
            period,
            max_missed: max_missed.max(1),
            generation: 0,
            hearts: HashMap::new(),
            responses: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the current period and start the next one.
    pub fn beat(&mut self) -> Beat {
        let responses = std::mem::take(&mut self.responses);
        let mut events = Vec::new();

        let mut newcomers: Vec<&Identity> = responses
            .iter()
            .filter(|h| !self.hearts.contains_key(*h))
            .collect();
        newcomers.sort();
        for heart in newcomers {
            info!(heart = %heart, "new heart");
            self.failed.remove(heart);
            self.hearts.insert(heart.clone(), 0);
            events.push(HeartEvent::NewHeart(heart.clone()));
        }

        let mut failures = Vec::new();
        for (heart, missed) in self.hearts.iter_mut() {
            if responses.contains(heart) {
                *missed = 0;
                continue;
            }
            *missed += 1;
            debug!(heart = %heart, missed = *missed, "heart missed a beat");
            if *missed >= self.max_missed {
                failures.push(heart.clone());
            }
        }
        failures.sort();
        for heart in failures {
            warn!(heart = %heart, max_missed = self.max_missed, "heart failure");
            self.hearts.remove(&heart);
            self.failed.insert(heart.clone());
            events.push(HeartEvent::HeartFailure(heart));
        }

        self.generation += 1;
        Beat {
            generation: self.generation,
            events,
        }
    }

    /// Record a pong. Pongs for the previous generation are accepted late.
    pub fn handle_pong(&mut self, heart: &str, generation: u64) {
        if generation == self.generation {
            self.responses.insert(heart.to_string());
        } else if generation + 1 == self.generation {
            debug!(heart, generation, current = self.generation, "late pong accepted");
            self.responses.insert(heart.to_string());
        } else {
            warn!(heart, generation, current = self.generation, "dropping stale pong");
        }
    }

    /// Stop tracking a heart, e.g. after an explicit unregistration.
    pub fn forget(&mut self, heart: &str) {
        self.hearts.remove(heart);
        self.responses.remove(heart);
        self.failed.remove(heart);
    }

    pub fn state(&self, heart: &str) -> Option<HeartState> {
        if let Some(missed) = self.hearts.get(heart) {
            Some(HeartState::Alive { missed: *missed })
        } else if self.responses.contains(heart) {
            Some(HeartState::AwaitingFirstBeat)
        } else if self.failed.contains(heart) {
            Some(HeartState::Failed)
        } else {
            None
        }
    }

    /// Hearts currently considered alive.
    pub fn alive(&self) -> usize {
        self.hearts.len()
    }
}
