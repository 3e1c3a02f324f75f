//! Record filters for store queries.
//!
//! A [`RecordFilter`] is a conjunction of `(field, condition)` pairs over the
//! indexed fields of a [`TaskRecord`]. Conditions mirror the usual document
//! store operators: equality, `$ne`, `$lt`, `$gt`, `$in`, `$nin`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::record::TaskRecord;

/// Indexed fields of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    TaskId,
    ClientId,
    EngineId,
    Status,
    QueueKind,
    SubmittedAt,
    StartedAt,
    CompletedAt,
    ResubmittedFrom,
}

/// A comparable scalar extracted from a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Time(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&TaskId> for FieldValue {
    fn from(id: &TaskId) -> Self {
        Self::Text(id.0.clone())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(t)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A single comparison against a field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(FieldValue),
    Ne(FieldValue),
    Lt(FieldValue),
    Gt(FieldValue),
    In(Vec<FieldValue>),
    Nin(Vec<FieldValue>),
}

impl Condition {
    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Self::Eq(v) => value == v,
            Self::Ne(v) => value != v,
            Self::Lt(v) => value.compare(v) == Some(Ordering::Less),
            Self::Gt(v) => value.compare(v) == Some(Ordering::Greater),
            Self::In(vs) => vs.contains(value),
            Self::Nin(vs) => !vs.contains(value),
        }
    }
}

/// Conjunction of field conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    clauses: Vec<(RecordField, Condition)>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: RecordField, condition: Condition) -> Self {
        self.clauses.push((field, condition));
        self
    }

    /// Filter selecting exactly the given task ids.
    pub fn task_ids<'a>(ids: impl IntoIterator<Item = &'a TaskId>) -> Self {
        Self::new().with(
            RecordField::TaskId,
            Condition::In(ids.into_iter().map(FieldValue::from).collect()),
        )
    }

    /// Filter selecting finished records.
    pub fn finished() -> Self {
        Self::new().with(RecordField::CompletedAt, Condition::Ne(FieldValue::Null))
    }

    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.clauses
            .iter()
            .all(|(field, cond)| cond.matches(&record.field(*field)))
    }
}

impl TaskRecord {
    /// Extract an indexed field as a comparable value.
    pub fn field(&self, field: RecordField) -> FieldValue {
        match field {
            RecordField::TaskId => FieldValue::from(&self.task_id),
            RecordField::ClientId => FieldValue::from(self.client_id.as_str()),
            RecordField::EngineId => FieldValue::from(self.engine_id),
            RecordField::Status => FieldValue::from(self.status.as_str()),
            RecordField::QueueKind => FieldValue::from(self.queue_kind.as_str()),
            RecordField::SubmittedAt => FieldValue::from(self.submitted_at),
            RecordField::StartedAt => FieldValue::from(self.started_at),
            RecordField::CompletedAt => FieldValue::from(self.completed_at),
            RecordField::ResubmittedFrom => FieldValue::from(self.resubmitted_from.as_ref()),
        }
    }
}
