//! Task snapshots as seen by this subsystem.
//!
//! The Task Store (an external collaborator) owns the rows; we only read
//! snapshots out of events and queries, and hand back `NewTask` field sets
//! when the recurrence engine creates the next occurrence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, UserId};
use super::recurrence::Recurrence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A point-in-time copy of one task row.
///
/// Immutable here: snapshots travel inside event payloads and query
/// results. Mutation happens only through the `TaskStore` port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,

    /// Set on occurrences created by the recurrence engine; points at the
    /// completed task they were derived from. Traceability only, not a
    /// relational constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<TaskId>,

    /// True once a reminder event has been dispatched for the current
    /// due date. Reset to false when the due date changes.
    pub reminder_dispatched: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a task row via `TaskStore::create_task`.
///
/// The store fills in the id, timestamps, `completed = false` and
/// `reminder_dispatched = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub parent_task_id: Option<TaskId>,
}

impl NewTask {
    /// Derive the next occurrence of a completed recurring task.
    ///
    /// Copies title, description, priority, tags and the recurrence
    /// settings; links back via `parent_task_id`.
    pub fn next_occurrence(snapshot: &TaskSnapshot, next_due: DateTime<Utc>) -> Self {
        Self {
            user_id: snapshot.user_id,
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            priority: snapshot.priority,
            tags: snapshot.tags.clone(),
            due_date: Some(next_due),
            recurrence: snapshot.recurrence,
            parent_task_id: Some(snapshot.task_id),
        }
    }
}
