//! Event envelope and payload shapes for both broker topics.
//!
//! Wire format (JSON, both topics):
//!
//! ```json
//! { "event_id": "...", "type": "com.todo.task.completed.v1",
//!   "task_id": "...", "user_id": "...",
//!   "occurred_at": "2025-01-10T09:00:00Z", "payload": { ... } }
//! ```
//!
//! Envelopes are immutable once published. `event_id` is globally unique
//! and doubles as the consumer-side idempotency key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, TaskId, UserId};
use super::task::TaskSnapshot;

/// Versioned event type, reversed-DNS style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "com.todo.task.created.v1")]
    TaskCreated,
    #[serde(rename = "com.todo.task.updated.v1")]
    TaskUpdated,
    #[serde(rename = "com.todo.task.completed.v1")]
    TaskCompleted,
    #[serde(rename = "com.todo.task.deleted.v1")]
    TaskDeleted,
    #[serde(rename = "com.todo.reminder.scheduled.v1")]
    ReminderScheduled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskCreated => "com.todo.task.created.v1",
            EventType::TaskUpdated => "com.todo.task.updated.v1",
            EventType::TaskCompleted => "com.todo.task.completed.v1",
            EventType::TaskDeleted => "com.todo.task.deleted.v1",
            EventType::ReminderScheduled => "com.todo.reminder.scheduled.v1",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
///
/// The payload stays `serde_json::Value` in the envelope: the broker and
/// outbox never need to understand it, and a consumer decoding it lazily
/// can dead-letter a malformed payload without poisoning the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: EventId,

    #[serde(rename = "type")]
    pub event_type: EventType,

    pub task_id: TaskId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Payload of `com.todo.task.created.v1`, `task.updated.v1` and
/// `task.completed.v1`: the full snapshot after the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub task: TaskSnapshot,
}

/// Payload of `com.todo.reminder.scheduled.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub title: String,
    pub due_at: DateTime<Utc>,
}

/// Server-initiated push sent to a live client session.
///
/// Serializes to the client contract:
/// `{"type":"reminder","task_id":...,"title":...,"due_at":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    Reminder {
        task_id: TaskId,
        title: String,
        due_at: DateTime<Utc>,
    },
}
