//! Event publication: envelope construction, outbox staging and the
//! background sender.
//!
//! `EventPublisher` is the only way events enter the system. It stamps a
//! fresh `event_id` and `occurred_at`, stages the envelope in the outbox
//! and returns immediately; the mutating request path never blocks on
//! broker availability. `OutboxSender` drains the outbox toward the
//! broker with exponential backoff, dead-lettering after capped
//! attempts.

mod outbox;

pub use outbox::{FailedEntry, Outbox, OutboxEntry};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::broker::RetryPolicy;
use crate::domain::{
    EventId, EventType, ReminderPayload, SnapshotPayload, TaskEvent, TaskId, TaskSnapshot, UserId,
};
use crate::error::PulseError;
use crate::ports::broker::{Broker, TOPIC_REMINDERS, TOPIC_TASK_EVENTS};
use crate::ports::{Clock, IdGenerator};

pub struct EventPublisher {
    outbox: Arc<Outbox>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl EventPublisher {
    pub fn new(outbox: Arc<Outbox>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { outbox, ids, clock }
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Publish a task mutation event to `task-events`, partitioned by
    /// `task_id` so events for one task stay ordered.
    pub fn publish_task_event(
        &self,
        event_type: EventType,
        snapshot: &TaskSnapshot,
    ) -> Result<EventId, PulseError> {
        let payload = serde_json::to_value(SnapshotPayload {
            task: snapshot.clone(),
        })?;
        Ok(self.stage(
            TOPIC_TASK_EVENTS,
            snapshot.task_id.to_string(),
            event_type,
            snapshot.task_id,
            snapshot.user_id,
            payload,
        ))
    }

    pub fn task_created(&self, snapshot: &TaskSnapshot) -> Result<EventId, PulseError> {
        self.publish_task_event(EventType::TaskCreated, snapshot)
    }

    pub fn task_updated(&self, snapshot: &TaskSnapshot) -> Result<EventId, PulseError> {
        self.publish_task_event(EventType::TaskUpdated, snapshot)
    }

    pub fn task_completed(&self, snapshot: &TaskSnapshot) -> Result<EventId, PulseError> {
        self.publish_task_event(EventType::TaskCompleted, snapshot)
    }

    /// Deletion has no snapshot left to carry; the envelope ids suffice.
    pub fn task_deleted(&self, task_id: TaskId, user_id: UserId) -> EventId {
        self.stage(
            TOPIC_TASK_EVENTS,
            task_id.to_string(),
            EventType::TaskDeleted,
            task_id,
            user_id,
            serde_json::json!({}),
        )
    }

    /// Publish a reminder to `reminders`, partitioned by `user_id` for
    /// gateway locality.
    pub fn reminder_scheduled(
        &self,
        task_id: TaskId,
        user_id: UserId,
        title: String,
        due_at: DateTime<Utc>,
    ) -> Result<EventId, PulseError> {
        let payload = serde_json::to_value(ReminderPayload { title, due_at })?;
        Ok(self.stage(
            TOPIC_REMINDERS,
            user_id.to_string(),
            EventType::ReminderScheduled,
            task_id,
            user_id,
            payload,
        ))
    }

    fn stage(
        &self,
        topic: &'static str,
        partition_key: String,
        event_type: EventType,
        task_id: TaskId,
        user_id: UserId,
        payload: serde_json::Value,
    ) -> EventId {
        let event = TaskEvent {
            event_id: self.ids.event_id(),
            event_type,
            task_id,
            user_id,
            occurred_at: self.clock.now(),
            payload,
        };
        let event_id = event.event_id;
        tracing::debug!(%event_id, r#type = %event.event_type, "event staged in outbox");
        self.outbox.append(OutboxEntry {
            topic,
            partition_key,
            event,
        });
        event_id
    }
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Publish attempts per entry before dead-lettering.
    pub max_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl OutboxConfig {
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            retry: RetryPolicy::fast(),
        }
    }
}

/// Background loop that moves outbox entries to the broker.
///
/// Retries in place (the head entry blocks the queue) so per-partition
/// emission order is preserved across transient broker failures.
pub struct OutboxSender {
    outbox: Arc<Outbox>,
    broker: Arc<dyn Broker>,
    config: OutboxConfig,
}

impl OutboxSender {
    pub fn new(outbox: Arc<Outbox>, broker: Arc<dyn Broker>, config: OutboxConfig) -> Self {
        Self {
            outbox,
            broker,
            config,
        }
    }

    /// Run until shutdown is signalled. An entry being retried when
    /// shutdown arrives is requeued, not lost.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let entry = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                entry = self.outbox.next_entry() => entry,
            };

            self.send_with_retry(entry, &mut shutdown).await;
        }
        tracing::debug!("outbox sender stopped");
    }

    async fn send_with_retry(&self, entry: OutboxEntry, shutdown: &mut watch::Receiver<bool>) {
        for attempt in 1..=self.config.max_attempts {
            match self
                .broker
                .publish(entry.topic, &entry.partition_key, entry.event.clone())
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        event_id = %entry.event.event_id,
                        topic = entry.topic,
                        "event delivered to broker"
                    );
                    return;
                }
                Err(err) if attempt == self.config.max_attempts => {
                    tracing::error!(
                        event_id = %entry.event.event_id,
                        attempts = attempt,
                        %err,
                        "broker delivery failed permanently, dead-lettering for manual replay"
                    );
                    self.outbox.dead_letter(entry, attempt, err.to_string());
                    return;
                }
                Err(err) => {
                    let delay = self.config.retry.next_delay(attempt);
                    tracing::warn!(
                        event_id = %entry.event.event_id,
                        attempt,
                        %err,
                        ?delay,
                        "broker delivery failed, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => {
                            self.outbox.requeue_front(entry);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Convenience: spawn a sender on the current runtime and get a shutdown
/// handle back.
pub fn spawn_sender(
    outbox: Arc<Outbox>,
    broker: Arc<dyn Broker>,
    config: OutboxConfig,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sender = OutboxSender::new(outbox, broker, config);
    let join = tokio::spawn(sender.run(shutdown_rx));
    (shutdown_tx, join)
}
