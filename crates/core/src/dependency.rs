//! Task dependency sets (`after` and `follow` constraints).
//!
//! A [`Dependency`] is an immutable set of task ids plus a match mode and a
//! `success_only` flag. It is evaluated against the sets of completed and
//! failed task ids; the empty dependency ([`Dependency::met`]) is always
//! satisfied and never unreachable.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// How many of a dependency's ids must resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepMode {
    /// Every id must resolve.
    #[default]
    All,
    /// At least one id must resolve.
    Any,
}

/// An immutable set of task ids a task waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    ids: BTreeSet<TaskId>,
    #[serde(default)]
    mode: DepMode,
    /// When set, only successful completions count; failures can make the
    /// dependency unreachable.
    #[serde(default = "default_success_only")]
    success_only: bool,
}

fn default_success_only() -> bool {
    true
}

impl Default for Dependency {
    fn default() -> Self {
        Self::met()
    }
}

impl Dependency {
    pub fn new(
        ids: impl IntoIterator<Item = TaskId>,
        mode: DepMode,
        success_only: bool,
    ) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            mode,
            success_only,
        }
    }

    /// `mode = all, success_only = true` over the given ids.
    pub fn all_of(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self::new(ids, DepMode::All, true)
    }

    /// `mode = any, success_only = true` over the given ids.
    pub fn any_of(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self::new(ids, DepMode::Any, true)
    }

    /// The empty dependency: trivially satisfied.
    pub fn met() -> Self {
        Self {
            ids: BTreeSet::new(),
            mode: DepMode::All,
            success_only: true,
        }
    }

    pub fn ids(&self) -> &BTreeSet<TaskId> {
        &self.ids
    }

    pub fn mode(&self) -> DepMode {
        self.mode
    }

    pub fn success_only(&self) -> bool {
        self.success_only
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.ids.contains(id)
    }

    /// Whether an id counts as resolved for this dependency.
    fn resolved(&self, id: &TaskId, completed: &HashSet<TaskId>, failed: &HashSet<TaskId>) -> bool {
        completed.contains(id) || (!self.success_only && failed.contains(id))
    }

    /// Whether the dependency is satisfied by the given completion sets.
    pub fn check(&self, completed: &HashSet<TaskId>, failed: &HashSet<TaskId>) -> bool {
        if self.ids.is_empty() {
            return true;
        }
        match self.mode {
            DepMode::All => self.ids.iter().all(|id| self.resolved(id, completed, failed)),
            DepMode::Any => self.ids.iter().any(|id| self.resolved(id, completed, failed)),
        }
    }

    /// Whether satisfaction has become permanently impossible.
    ///
    /// Only `success_only` dependencies can become unreachable: for `all`
    /// any failed id is fatal, for `any` every id must have failed.
    pub fn unreachable(&self, failed: &HashSet<TaskId>) -> bool {
        if self.ids.is_empty() || !self.success_only {
            return false;
        }
        match self.mode {
            DepMode::All => self.ids.iter().any(|id| failed.contains(id)),
            DepMode::Any => self.ids.iter().all(|id| failed.contains(id)),
        }
    }

    /// The ids that already count as resolved.
    pub fn relevant_done<'a>(
        &'a self,
        completed: &'a HashSet<TaskId>,
        failed: &'a HashSet<TaskId>,
    ) -> impl Iterator<Item = &'a TaskId> + 'a {
        self.ids
            .iter()
            .filter(move |id| self.resolved(id, completed, failed))
    }

    /// Reject self-references and references to ids that were never submitted.
    pub fn is_valid_for(&self, own_id: &TaskId, known: &HashSet<TaskId>) -> bool {
        !self.ids.contains(own_id) && self.ids.iter().all(|id| known.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<TaskId> {
        ids.iter().map(|s| TaskId::from(*s)).collect()
    }

    fn ids(ids: &[&str]) -> Vec<TaskId> {
        ids.iter().map(|s| TaskId::from(*s)).collect()
    }

    #[test]
    fn met_is_always_satisfied() {
        let dep = Dependency::met();
        assert!(dep.check(&set(&[]), &set(&[])));
        assert!(!dep.unreachable(&set(&["a"])));
    }

    #[test]
    fn all_success_only_requires_subset_of_completed() {
        let dep = Dependency::all_of(ids(&["a", "b"]));
        assert!(!dep.check(&set(&["a"]), &set(&[])));
        assert!(dep.check(&set(&["a", "b", "c"]), &set(&[])));
        // A failure does not count as resolution.
        assert!(!dep.check(&set(&["a"]), &set(&["b"])));
        assert!(dep.unreachable(&set(&["b"])));
    }

    #[test]
    fn all_without_success_only_counts_failures() {
        let dep = Dependency::new(ids(&["a", "b"]), DepMode::All, false);
        assert!(dep.check(&set(&["a"]), &set(&["b"])));
        assert!(!dep.unreachable(&set(&["a", "b"])));
    }

    #[test]
    fn any_needs_one_and_is_unreachable_when_all_failed() {
        let dep = Dependency::any_of(ids(&["a", "b"]));
        assert!(!dep.check(&set(&[]), &set(&["a"])));
        assert!(dep.check(&set(&["b"]), &set(&["a"])));
        assert!(!dep.unreachable(&set(&["a"])));
        assert!(dep.unreachable(&set(&["a", "b"])));
    }

    #[test]
    fn relevant_done_respects_success_only() {
        let strict = Dependency::all_of(ids(&["a", "b", "c"]));
        let done: Vec<_> = strict
            .relevant_done(&set(&["a"]), &set(&["b"]))
            .cloned()
            .collect();
        assert_eq!(done, ids(&["a"]));

        let lax = Dependency::new(ids(&["a", "b", "c"]), DepMode::All, false);
        assert_eq!(lax.relevant_done(&set(&["a"]), &set(&["b"])).count(), 2);
    }

    #[test]
    fn validity_rejects_self_and_unknown_ids() {
        let known = set(&["a", "b"]);
        assert!(Dependency::all_of(ids(&["a"])).is_valid_for(&TaskId::from("x"), &known));
        assert!(!Dependency::all_of(ids(&["x"])).is_valid_for(&TaskId::from("x"), &known));
        assert!(!Dependency::all_of(ids(&["zz"])).is_valid_for(&TaskId::from("x"), &known));
    }

    #[test]
    fn deserializes_with_defaults() {
        let dep: Dependency = serde_json::from_str(r#"{"ids": ["a"]}"#).unwrap();
        assert_eq!(dep.mode(), DepMode::All);
        assert!(dep.success_only());

        let dep: Dependency =
            serde_json::from_str(r#"{"ids": ["a", "b"], "mode": "any", "success_only": false}"#)
                .unwrap();
        assert_eq!(dep.mode(), DepMode::Any);
        assert!(!dep.success_only());
    }
}
