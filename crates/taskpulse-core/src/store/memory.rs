//! In-memory task store.
//!
//! Test/demo stand-in for the real Task Store collaborator. It keeps the
//! row-level semantics the subsystem depends on: the CAS on
//! `reminder_dispatched` and the dispatch-flag reset on due-date edits.
//!
//! The inherent methods beyond the `TaskStore` port (`set_completed`,
//! `update_due_date`, `delete_task`) model the collaborator's CRUD side
//! so tests and the demo can drive full scenarios.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{NewTask, TaskId, TaskSnapshot};
use crate::error::PulseError;
use crate::ports::{Clock, IdGenerator, TaskStore};

pub struct InMemoryTaskStore {
    rows: Mutex<HashMap<TaskId, TaskSnapshot>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            ids,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskSnapshot>> {
        self.rows.lock().expect("task rows lock poisoned")
    }

    /// Collaborator edit path: mark a task completed.
    pub fn set_completed(&self, id: TaskId) -> Result<TaskSnapshot, PulseError> {
        let now = self.clock.now();
        let mut rows = self.lock();
        let row = rows.get_mut(&id).ok_or(PulseError::TaskNotFound(id))?;
        row.completed = true;
        row.updated_at = now;
        Ok(row.clone())
    }

    /// Collaborator edit path: change the due date.
    ///
    /// Resets `reminder_dispatched` so the new due time gets its own
    /// reminder. This reset is the collaborator's contractual duty; the
    /// scheduler relies on it.
    pub fn update_due_date(
        &self,
        id: TaskId,
        due: DateTime<Utc>,
    ) -> Result<TaskSnapshot, PulseError> {
        let now = self.clock.now();
        let mut rows = self.lock();
        let row = rows.get_mut(&id).ok_or(PulseError::TaskNotFound(id))?;
        row.due_date = Some(due);
        row.reminder_dispatched = false;
        row.updated_at = now;
        Ok(row.clone())
    }

    /// Collaborator delete path.
    pub fn delete_task(&self, id: TaskId) -> Result<(), PulseError> {
        self.lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(PulseError::TaskNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All tasks created with the given parent, for test assertions.
    pub fn children_of(&self, parent: TaskId) -> Vec<TaskSnapshot> {
        self.lock()
            .values()
            .filter(|row| row.parent_task_id == Some(parent))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: TaskId) -> Result<Option<TaskSnapshot>, PulseError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn create_task(&self, fields: NewTask) -> Result<TaskSnapshot, PulseError> {
        let now = self.clock.now();
        let snapshot = TaskSnapshot {
            task_id: self.ids.task_id(),
            user_id: fields.user_id,
            title: fields.title,
            description: fields.description,
            completed: false,
            priority: fields.priority,
            tags: fields.tags,
            due_date: fields.due_date,
            recurrence: fields.recurrence,
            parent_task_id: fields.parent_task_id,
            reminder_dispatched: false,
            created_at: now,
            updated_at: now,
        };
        self.lock().insert(snapshot.task_id, snapshot.clone());
        Ok(snapshot)
    }

    async fn query_due_soon(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TaskSnapshot>, PulseError> {
        let mut due: Vec<TaskSnapshot> = self
            .lock()
            .values()
            .filter(|row| {
                !row.completed
                    && !row.reminder_dispatched
                    && row
                        .due_date
                        .is_some_and(|d| d >= from && d <= until)
            })
            .cloned()
            .collect();
        due.sort_by_key(|row| row.due_date);
        Ok(due)
    }

    async fn cas_set_reminder_dispatched(&self, id: TaskId) -> Result<bool, PulseError> {
        let now = self.clock.now();
        let mut rows = self.lock();
        match rows.get_mut(&id) {
            Some(row) if !row.reminder_dispatched => {
                row.reminder_dispatched = true;
                row.updated_at = now;
                Ok(true)
            }
            // Already dispatched (another replica won) or row deleted:
            // the caller loses the race and skips publishing.
            _ => Ok(false),
        }
    }
}
