//! Outbox: durable local staging for events awaiting broker delivery.
//!
//! The mutating request appends here and returns; it never waits on the
//! broker. The `OutboxSender` drains the queue in order in the
//! background. In-memory here; a production adapter would back the same
//! shape with a table written in the mutation's transaction.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::domain::TaskEvent;

#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub topic: &'static str,
    pub partition_key: String,
    pub event: TaskEvent,
}

/// An entry that exhausted its send attempts, kept for manual replay.
#[derive(Debug, Clone)]
pub struct FailedEntry {
    pub entry: OutboxEntry,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Default)]
struct OutboxState {
    pending: VecDeque<OutboxEntry>,
    dead: Vec<FailedEntry>,
}

#[derive(Default)]
pub struct Outbox {
    state: Mutex<OutboxState>,
    notify: Notify,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboxState> {
        self.state.lock().expect("outbox lock poisoned")
    }

    pub fn append(&self, entry: OutboxEntry) {
        self.lock().pending.push_back(entry);
        self.notify.notify_one();
    }

    /// Wait until an entry is available and take it. FIFO, so per-task
    /// emission order survives into the broker.
    pub async fn next_entry(&self) -> OutboxEntry {
        loop {
            if let Some(entry) = self.lock().pending.pop_front() {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    /// Put an entry back at the head (sender shutting down mid-retry).
    pub fn requeue_front(&self, entry: OutboxEntry) {
        self.lock().pending.push_front(entry);
        self.notify.notify_one();
    }

    /// Give up on an entry after capped attempts.
    pub fn dead_letter(&self, entry: OutboxEntry, attempts: u32, last_error: String) {
        self.lock().dead.push(FailedEntry {
            entry,
            attempts,
            last_error,
        });
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn dead_letters(&self) -> Vec<FailedEntry> {
        self.lock().dead.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventId, EventType, TaskId, UserId};
    use crate::ports::broker::TOPIC_TASK_EVENTS;
    use chrono::Utc;
    use std::time::Duration;
    use ulid::Ulid;

    fn entry() -> OutboxEntry {
        OutboxEntry {
            topic: TOPIC_TASK_EVENTS,
            partition_key: "k".to_string(),
            event: TaskEvent {
                event_id: EventId::from_ulid(Ulid::new()),
                event_type: EventType::TaskCompleted,
                task_id: TaskId::from_ulid(Ulid::new()),
                user_id: UserId::from_ulid(Ulid::new()),
                occurred_at: Utc::now(),
                payload: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn append_then_next_is_fifo() {
        let outbox = Outbox::new();
        let first = entry();
        let second = entry();
        outbox.append(first.clone());
        outbox.append(second.clone());

        assert_eq!(outbox.next_entry().await.event.event_id, first.event.event_id);
        assert_eq!(outbox.next_entry().await.event.event_id, second.event.event_id);
        assert_eq!(outbox.pending_len(), 0);
    }

    #[tokio::test]
    async fn next_entry_wakes_on_append() {
        let outbox = std::sync::Arc::new(Outbox::new());
        let waiter = tokio::spawn({
            let outbox = outbox.clone();
            async move { outbox.next_entry().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let e = entry();
        outbox.append(e.clone());

        let got = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.event.event_id, e.event.event_id);
    }

    #[tokio::test]
    async fn requeue_front_restores_order() {
        let outbox = Outbox::new();
        let first = entry();
        let second = entry();
        outbox.append(second.clone());

        outbox.requeue_front(first.clone());

        assert_eq!(outbox.next_entry().await.event.event_id, first.event.event_id);
        assert_eq!(outbox.next_entry().await.event.event_id, second.event.event_id);
    }
}
