//! Engine lifecycle: incoming → registered → removed.
//!
//! Registration is two-phase. `register` allocates an id and parks the
//! engine as incoming with a deadline; the first heartbeat from its heart
//! `confirm`s it. An incoming engine whose deadline passes is purged and its
//! id is never handed out again.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use taskhub_core::{EngineId, HubError, Identity};

/// Everything the hub knows about one engine's endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConnector {
    pub engine_id: EngineId,
    pub queue_identity: Identity,
    pub heart_identity: Identity,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Incoming,
    Registered,
    Removed,
}

#[derive(Debug)]
struct Incoming {
    connector: EngineConnector,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Registry {
    next_id: EngineId,
    timeout: Duration,
    incoming: BTreeMap<EngineId, Incoming>,
    engines: BTreeMap<EngineId, EngineConnector>,
    /// Queue identity → id, for incoming and registered engines.
    by_identity: HashMap<Identity, EngineId>,
    /// Heart identity → id, for incoming and registered engines.
    by_heart: HashMap<Identity, EngineId>,
}

impl Registry {
    /// `timeout` is how long an incoming engine may wait for its first beat.
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 0,
            timeout,
            incoming: BTreeMap::new(),
            engines: BTreeMap::new(),
            by_identity: HashMap::new(),
            by_heart: HashMap::new(),
        }
    }

    /// The registration timeout for a heartbeat period: twice the period,
    /// never less than five seconds.
    pub fn timeout_for_period(period: Duration) -> Duration {
        (period * 2).max(Duration::from_secs(5))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn register(
        &mut self,
        queue_identity: &str,
        heart_identity: &str,
        now: Instant,
    ) -> Result<EngineId, HubError> {
        if self.by_identity.contains_key(queue_identity) {
            return Err(HubError::DuplicateIdentity(queue_identity.to_string()));
        }
        if self.by_heart.contains_key(heart_identity) {
            return Err(HubError::DuplicateIdentity(heart_identity.to_string()));
        }

        let engine_id = self.next_id;
        self.next_id += 1;
        self.by_identity.insert(queue_identity.to_string(), engine_id);
        self.by_heart.insert(heart_identity.to_string(), engine_id);
        self.incoming.insert(
            engine_id,
            Incoming {
                connector: EngineConnector {
                    engine_id,
                    queue_identity: queue_identity.to_string(),
                    heart_identity: heart_identity.to_string(),
                    registered_at: Utc::now(),
                },
                deadline: now + self.timeout,
            },
        );
        info!(engine_id, queue = queue_identity, heart = heart_identity, "registration requested");
        Ok(engine_id)
    }

    /// Promote the incoming engine owning `heart_identity`.
    ///
    /// Returns `None` if no incoming engine has that heart, e.g. because
    /// its registration already timed out.
    pub fn confirm(&mut self, heart_identity: &str) -> Option<EngineConnector> {
        let engine_id = *self.by_heart.get(heart_identity)?;
        let Some(Incoming { mut connector, .. }) = self.incoming.remove(&engine_id) else {
            debug!(engine_id, heart = heart_identity, "heart already registered");
            return None;
        };
        connector.registered_at = Utc::now();
        info!(engine_id, "engine registered");
        self.engines.insert(engine_id, connector.clone());
        Some(connector)
    }

    /// Remove a registered engine. Fails with `UnknownEngine` otherwise.
    pub fn unregister(&mut self, engine_id: EngineId) -> Result<EngineConnector, HubError> {
        let connector = self
            .engines
            .remove(&engine_id)
            .ok_or(HubError::UnknownEngine(engine_id))?;
        self.by_identity.remove(&connector.queue_identity);
        self.by_heart.remove(&connector.heart_identity);
        info!(engine_id, "engine unregistered");
        Ok(connector)
    }

    /// Purge incoming registrations whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<EngineConnector> {
        let expired: Vec<EngineId> = self
            .incoming
            .iter()
            .filter(|(_, inc)| inc.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut purged = Vec::with_capacity(expired.len());
        for engine_id in expired {
            if let Some(Incoming { connector, .. }) = self.incoming.remove(&engine_id) {
                warn!(engine_id, queue = %connector.queue_identity, "registration timed out");
                self.by_identity.remove(&connector.queue_identity);
                self.by_heart.remove(&connector.heart_identity);
                purged.push(connector);
            }
        }
        purged
    }

    /// `None` for ids never allocated.
    pub fn state(&self, engine_id: EngineId) -> Option<EngineState> {
        if self.engines.contains_key(&engine_id) {
            Some(EngineState::Registered)
        } else if self.incoming.contains_key(&engine_id) {
            Some(EngineState::Incoming)
        } else if engine_id < self.next_id {
            Some(EngineState::Removed)
        } else {
            None
        }
    }

    pub fn get(&self, engine_id: EngineId) -> Option<&EngineConnector> {
        self.engines.get(&engine_id)
    }

    pub fn by_queue(&self, queue_identity: &str) -> Option<EngineId> {
        self.by_identity.get(queue_identity).copied()
    }

    pub fn by_heart(&self, heart_identity: &str) -> Option<EngineId> {
        self.by_heart.get(heart_identity).copied()
    }

    pub fn is_registered(&self, engine_id: EngineId) -> bool {
        self.engines.contains_key(&engine_id)
    }

    /// Registered engine ids in ascending order.
    pub fn ids(&self) -> Vec<EngineId> {
        self.engines.keys().copied().collect()
    }

    /// Registered engines by id, mapped to their queue identity.
    pub fn engines(&self) -> BTreeMap<EngineId, Identity> {
        self.engines
            .iter()
            .map(|(id, c)| (*id, c.queue_identity.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
