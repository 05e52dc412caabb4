//! Recurrence engine: consumes completion events, creates the next
//! occurrence.
//!
//! Long-lived consumer of the `task-events` topic. Everything it does is
//! idempotent: duplicate deliveries are dropped on the `event_id` key,
//! and the benign races (task deleted before the event arrived, task not
//! recurring at all) are explicit no-ops, not errors.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::IdempotencyConfig;
use crate::domain::{EventType, NewTask, SnapshotPayload, TaskEvent, TaskSnapshot};
use crate::error::PulseError;
use crate::ports::broker::Subscription;
use crate::ports::TaskStore;

use super::idempotency::RecentlySeen;

/// What processing one event amounted to. Every variant except
/// `Created` is a no-op by design.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Next occurrence created.
    Created(TaskSnapshot),
    /// Event id already processed (at-least-once redelivery).
    DuplicateEvent,
    /// Event type this engine does not handle.
    Ignored,
    /// Completed task carries no recurrence.
    NotRecurring,
    /// Completed task has no due date to advance from.
    NoDueDate,
    /// Task row deleted before the event was processed.
    TaskGone,
}

pub struct RecurrenceEngine {
    store: Arc<dyn TaskStore>,
    seen: RecentlySeen,
}

impl RecurrenceEngine {
    pub fn new(store: Arc<dyn TaskStore>, config: IdempotencyConfig) -> Self {
        Self {
            store,
            seen: RecentlySeen::new(config.recent_capacity),
        }
    }

    /// Process one event.
    ///
    /// The event id is recorded as seen only after the outcome is
    /// settled; a store failure leaves it unrecorded so the redelivery
    /// can succeed.
    pub async fn process(&mut self, event: &TaskEvent) -> Result<Processed, PulseError> {
        if event.event_type != EventType::TaskCompleted {
            return Ok(Processed::Ignored);
        }
        if self.seen.contains(&event.event_id) {
            tracing::debug!(event_id = %event.event_id, "duplicate delivery, skipping");
            return Ok(Processed::DuplicateEvent);
        }

        let payload: SnapshotPayload = serde_json::from_value(event.payload.clone())?;
        let completed = payload.task;

        // Existence lookup, not assumption: the task may have been
        // deleted between completion and consumption.
        if self.store.get_task(event.task_id).await?.is_none() {
            tracing::info!(
                task_id = %event.task_id,
                event_id = %event.event_id,
                "task deleted before completion event was processed, nothing to do"
            );
            self.seen.insert(event.event_id);
            return Ok(Processed::TaskGone);
        }

        let Some(recurrence) = completed.recurrence else {
            self.seen.insert(event.event_id);
            return Ok(Processed::NotRecurring);
        };
        let Some(due) = completed.due_date else {
            tracing::debug!(task_id = %event.task_id, "recurring task without due date");
            self.seen.insert(event.event_id);
            return Ok(Processed::NoDueDate);
        };

        let next_due = recurrence.next_due(due);
        let next = self
            .store
            .create_task(NewTask::next_occurrence(&completed, next_due))
            .await?;

        tracing::info!(
            parent_task_id = %completed.task_id,
            task_id = %next.task_id,
            %next_due,
            "created next occurrence of recurring task"
        );
        self.seen.insert(event.event_id);
        Ok(Processed::Created(next))
    }

    /// Consume the subscription until shutdown. One malformed event is
    /// dead-lettered and the stream continues; transient store failures
    /// nack for redelivery.
    pub async fn run(mut self, mut sub: Box<dyn Subscription>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                delivery = sub.next() => delivery,
            };
            let Some(delivery) = delivery else {
                break; // broker shut down
            };

            let event = delivery.event().clone();
            match self.process(&event).await {
                Ok(_) => {
                    if let Err(err) = delivery.ack().await {
                        tracing::warn!(event_id = %event.event_id, %err, "ack failed");
                    }
                }
                Err(PulseError::MalformedPayload(err)) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        %err,
                        "malformed completion payload, dead-lettering"
                    );
                    if let Err(err) = delivery.reject(err.to_string()).await {
                        tracing::warn!(event_id = %event.event_id, %err, "reject failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        %err,
                        "processing failed, requesting redelivery"
                    );
                    if let Err(err) = delivery.nack().await {
                        tracing::warn!(event_id = %event.event_id, %err, "nack failed");
                    }
                }
            }
        }
        tracing::debug!("recurrence engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventId, Priority, Recurrence, UserId};
    use crate::ports::{Clock, FixedClock, IdGenerator, UlidGenerator};
    use crate::store::InMemoryTaskStore;
    use chrono::{DateTime, TimeZone, Utc};
    use ulid::Ulid;

    fn fixtures() -> (Arc<InMemoryTaskStore>, Arc<dyn IdGenerator>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap(),
        ));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let store = Arc::new(InMemoryTaskStore::new(ids.clone(), clock.clone()));
        (store, ids, clock)
    }

    async fn seeded_task(
        store: &InMemoryTaskStore,
        recurrence: Option<Recurrence>,
        due: Option<DateTime<Utc>>,
    ) -> TaskSnapshot {
        store
            .create_task(NewTask {
                user_id: UserId::from_ulid(Ulid::new()),
                title: "Standup".to_string(),
                description: Some("Daily sync".to_string()),
                priority: Some(Priority::High),
                tags: vec!["work".to_string()],
                due_date: due,
                recurrence,
                parent_task_id: None,
            })
            .await
            .unwrap()
    }

    fn completed_event(ids: &dyn IdGenerator, clock: &dyn Clock, task: &TaskSnapshot) -> TaskEvent {
        let mut completed = task.clone();
        completed.completed = true;
        TaskEvent {
            event_id: ids.event_id(),
            event_type: EventType::TaskCompleted,
            task_id: task.task_id,
            user_id: task.user_id,
            occurred_at: clock.now(),
            payload: serde_json::to_value(SnapshotPayload { task: completed }).unwrap(),
        }
    }

    #[tokio::test]
    async fn completion_of_daily_task_creates_tomorrow_occurrence() {
        let (store, ids, clock) = fixtures();
        let due = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        let task = seeded_task(&store, Some(Recurrence::Daily), Some(due)).await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        let outcome = engine.process(&event).await.unwrap();

        let Processed::Created(next) = outcome else {
            panic!("expected Created, got {outcome:?}");
        };
        assert_eq!(
            next.due_date,
            Some(Utc.with_ymd_and_hms(2025, 1, 11, 9, 0, 0).unwrap())
        );
        assert_eq!(next.parent_task_id, Some(task.task_id));
        assert_eq!(next.title, task.title);
        assert_eq!(next.priority, task.priority);
        assert_eq!(next.tags, task.tags);
        assert_eq!(next.recurrence, Some(Recurrence::Daily));
        assert!(!next.completed);
        assert!(!next.reminder_dispatched);
    }

    #[tokio::test]
    async fn custom_interval_advances_by_interval_days() {
        let (store, ids, clock) = fixtures();
        let due = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        let task = seeded_task(
            &store,
            Some(Recurrence::Custom { interval_days: 3 }),
            Some(due),
        )
        .await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        let Processed::Created(next) = engine.process(&event).await.unwrap() else {
            panic!("expected Created");
        };
        assert_eq!(
            next.due_date,
            Some(Utc.with_ymd_and_hms(2025, 1, 13, 9, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn duplicate_event_id_creates_exactly_one_row() {
        let (store, ids, clock) = fixtures();
        let task = seeded_task(&store, Some(Recurrence::Daily), Some(clock.now())).await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        let first = engine.process(&event).await.unwrap();
        let second = engine.process(&event).await.unwrap();

        assert!(matches!(first, Processed::Created(_)));
        assert_eq!(second, Processed::DuplicateEvent);
        assert_eq!(store.children_of(task.task_id).len(), 1);
    }

    #[tokio::test]
    async fn deleted_task_is_a_benign_no_op() {
        let (store, ids, clock) = fixtures();
        let task = seeded_task(&store, Some(Recurrence::Daily), Some(clock.now())).await;
        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        store.delete_task(task.task_id).unwrap();

        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());
        let outcome = engine.process(&event).await.unwrap();

        assert_eq!(outcome, Processed::TaskGone);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn non_recurring_completion_is_a_no_op() {
        let (store, ids, clock) = fixtures();
        let task = seeded_task(&store, None, Some(clock.now())).await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        let outcome = engine.process(&event).await.unwrap();

        assert_eq!(outcome, Processed::NotRecurring);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn non_completion_events_are_ignored() {
        let (store, ids, clock) = fixtures();
        let task = seeded_task(&store, Some(Recurrence::Daily), Some(clock.now())).await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let mut event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        event.event_type = EventType::TaskUpdated;

        assert_eq!(engine.process(&event).await.unwrap(), Processed::Ignored);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_surfaces_as_decode_error() {
        let (store, ids, clock) = fixtures();
        let task = seeded_task(&store, Some(Recurrence::Daily), Some(clock.now())).await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let event = TaskEvent {
            event_id: EventId::from_ulid(Ulid::new()),
            event_type: EventType::TaskCompleted,
            task_id: task.task_id,
            user_id: task.user_id,
            occurred_at: clock.now(),
            payload: serde_json::json!({"task": "not an object"}),
        };

        assert!(matches!(
            engine.process(&event).await,
            Err(PulseError::MalformedPayload(_))
        ));
        // The stream keeps going: a later well-formed event still works.
        let good = completed_event(ids.as_ref(), clock.as_ref(), &task);
        assert!(matches!(
            engine.process(&good).await.unwrap(),
            Processed::Created(_)
        ));
    }

    /// Store whose `create_task` fails a set number of times before
    /// delegating, to exercise the nack-and-redeliver route.
    struct FlakyStore {
        inner: Arc<InMemoryTaskStore>,
        create_failures: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl crate::ports::TaskStore for FlakyStore {
        async fn get_task(
            &self,
            id: crate::domain::TaskId,
        ) -> Result<Option<TaskSnapshot>, PulseError> {
            self.inner.get_task(id).await
        }

        async fn create_task(&self, fields: NewTask) -> Result<TaskSnapshot, PulseError> {
            use std::sync::atomic::Ordering;
            if self.create_failures.load(Ordering::SeqCst) > 0 {
                self.create_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(PulseError::Store("connection reset".to_string()));
            }
            self.inner.create_task(fields).await
        }

        async fn query_due_soon(
            &self,
            from: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<TaskSnapshot>, PulseError> {
            self.inner.query_due_soon(from, until).await
        }

        async fn cas_set_reminder_dispatched(
            &self,
            id: crate::domain::TaskId,
        ) -> Result<bool, PulseError> {
            self.inner.cas_set_reminder_dispatched(id).await
        }
    }

    #[tokio::test]
    async fn transient_store_failure_nacks_and_the_redelivery_succeeds() {
        use crate::broker::{BrokerConfig, InMemoryBroker};
        use crate::ports::broker::{Broker, TOPIC_TASK_EVENTS};

        let (store, ids, clock) = fixtures();
        let task = seeded_task(&store, Some(Recurrence::Daily), Some(clock.now())).await;
        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);

        let flaky = Arc::new(FlakyStore {
            inner: store.clone(),
            create_failures: std::sync::atomic::AtomicU32::new(1),
        });
        let broker = InMemoryBroker::new(BrokerConfig::fast());
        let sub = broker.subscribe(TOPIC_TASK_EVENTS).await.unwrap();
        let engine = RecurrenceEngine::new(flaky, IdempotencyConfig::default());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(engine.run(sub, shutdown_rx));

        broker
            .publish(TOPIC_TASK_EVENTS, &task.task_id.to_string(), event)
            .await
            .unwrap();

        // First delivery hits the store failure and is nacked; the
        // redelivery creates the occurrence. The event id must not be
        // marked seen by the failed attempt.
        let mut created = false;
        for _ in 0..200 {
            if !store.children_of(task.task_id).is_empty() {
                created = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(created, "redelivery did not create the next occurrence");
        assert_eq!(store.children_of(task.task_id).len(), 1);
        assert!(broker.dead_letters(TOPIC_TASK_EVENTS).is_empty());

        shutdown_tx.send(true).unwrap();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_shutdown_handle_stops_the_engine() {
        use crate::broker::{BrokerConfig, InMemoryBroker};
        use crate::ports::broker::{Broker, TOPIC_TASK_EVENTS};

        let (store, _ids, _clock) = fixtures();
        let engine = RecurrenceEngine::new(store, IdempotencyConfig::default());
        let broker = InMemoryBroker::new(BrokerConfig::fast());
        let sub = broker.subscribe(TOPIC_TASK_EVENTS).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(engine.run(sub, shutdown_rx));
        drop(shutdown_tx);

        tokio::time::timeout(std::time::Duration::from_millis(500), join)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn monthly_end_of_january_lands_on_end_of_february() {
        let (store, ids, clock) = fixtures();
        let due = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap();
        let task = seeded_task(&store, Some(Recurrence::Monthly), Some(due)).await;
        let mut engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());

        let event = completed_event(ids.as_ref(), clock.as_ref(), &task);
        let Processed::Created(next) = engine.process(&event).await.unwrap() else {
            panic!("expected Created");
        };
        assert_eq!(
            next.due_date,
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap())
        );
    }

}
