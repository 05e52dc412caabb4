//! Domain model (IDs, task snapshots, recurrence math, event shapes).

pub mod event;
pub mod ids;
pub mod recurrence;
pub mod task;

pub use event::{EventType, PushMessage, ReminderPayload, SnapshotPayload, TaskEvent};
pub use ids::{ConnectionId, EventId, TaskId, UserId};
pub use recurrence::Recurrence;
pub use task::{NewTask, Priority, TaskSnapshot};
