use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Integer id the hub assigns to an engine at registration. Never reused.
pub type EngineId = u32;

/// Logical identity an engine picks for one of its endpoints (queue or heart).
pub type Identity = String;

/// Opaque unique id of one task submission.
///
/// Generated by the client at submission time and used as the join key
/// across records, queues, and dependency sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// A fresh UUID v4 task id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct_uuids() {
        let a = TaskId::random();
        let b = TaskId::random();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = TaskId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
