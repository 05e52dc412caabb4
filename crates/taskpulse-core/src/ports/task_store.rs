//! TaskStore port - the Task Store collaborator's boundary.
//!
//! The store owns the task rows; this crate only consumes the four
//! operations below. Everything else about the CRUD API (edits, deletes,
//! listing) happens on the collaborator's side of this seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{NewTask, TaskId, TaskSnapshot};
use crate::error::PulseError;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch one task. `None` when the row no longer exists - consumers
    /// use this to turn deleted-task races into no-ops instead of
    /// assuming existence.
    async fn get_task(&self, id: TaskId) -> Result<Option<TaskSnapshot>, PulseError>;

    /// Insert a new row. The store assigns the id and timestamps and
    /// starts the row with `completed = false`,
    /// `reminder_dispatched = false`.
    async fn create_task(&self, fields: NewTask) -> Result<TaskSnapshot, PulseError>;

    /// Rows with `due_date` in `[from, until]`, not completed, reminder
    /// not yet dispatched. The reminder scheduler's scan query.
    async fn query_due_soon(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TaskSnapshot>, PulseError>;

    /// Compare-and-swap `reminder_dispatched` from false to true.
    ///
    /// Returns true when this caller performed the transition. A false
    /// return means another scheduler replica got there first (or the
    /// row is gone); the caller must skip publishing. This CAS is the
    /// sole dedupe mechanism between concurrent scanner replicas.
    async fn cas_set_reminder_dispatched(&self, id: TaskId) -> Result<bool, PulseError>;
}
