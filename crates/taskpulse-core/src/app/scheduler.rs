//! Reminder scheduler: periodic scan for tasks due soon.
//!
//! Every tick queries the store for tasks due inside the lookahead
//! window, then publishes one reminder event per task it wins. The win
//! is decided by the store's compare-and-set on `reminder_dispatched`:
//! the CAS runs first, and only the winning replica stages the event.
//! Staging is a local outbox append and cannot fail after the CAS, so
//! concurrent replicas produce exactly one reminder per due time.
//!
//! Ticks that land while a previous scan is still running are skipped,
//! and a scan is abandoned at `batch_timeout` so one slow store query
//! cannot wedge the loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::error::PulseError;
use crate::ports::{Clock, TaskStore};
use crate::publisher::EventPublisher;

pub struct ReminderScheduler {
    store: Arc<dyn TaskStore>,
    publisher: Arc<EventPublisher>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

/// Outcome of one scan, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanReport {
    /// Tasks the window query returned.
    pub candidates: usize,
    /// Reminders actually published (CAS wins).
    pub dispatched: usize,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        publisher: Arc<EventPublisher>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self, PulseError> {
        config.validate()?;
        Ok(Self {
            store,
            publisher,
            clock,
            config,
        })
    }

    /// One scan pass over the lookahead window.
    ///
    /// Window edges come from the injected clock, so tests can pin them.
    /// A CAS loss (another replica already dispatched, or the task was
    /// deleted under us) is silent; this is the normal outcome for all
    /// but one replica.
    pub async fn scan_once(&self) -> Result<ScanReport, PulseError> {
        let now = self.clock.now();
        let until = now
            + chrono::Duration::from_std(self.config.lookahead)
                .map_err(|e| PulseError::InvalidConfig(e.to_string()))?;

        let candidates = self.store.query_due_soon(now, until).await?;
        let mut report = ScanReport {
            candidates: candidates.len(),
            dispatched: 0,
        };

        for task in candidates {
            let Some(due_at) = task.due_date else {
                continue; // window query contract, but cheap to re-check
            };
            if !self.store.cas_set_reminder_dispatched(task.task_id).await? {
                tracing::debug!(task_id = %task.task_id, "reminder already claimed elsewhere");
                continue;
            }
            self.publisher.reminder_scheduled(
                task.task_id,
                task.user_id,
                task.title.clone(),
                due_at,
            )?;
            tracing::info!(task_id = %task.task_id, %due_at, "reminder dispatched");
            report.dispatched += 1;
        }

        Ok(report)
    }

    /// Tick loop. Runs until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // Err means the sender is gone; treat as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match tokio::time::timeout(self.config.batch_timeout, self.scan_once()).await {
                        Ok(Ok(report)) if report.candidates > 0 => {
                            tracing::debug!(
                                candidates = report.candidates,
                                dispatched = report.dispatched,
                                "reminder scan finished"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => {
                            // Next tick retries; undispatched tasks are
                            // still in the window.
                            tracing::warn!(%err, "reminder scan failed");
                        }
                        Err(_) => {
                            tracing::warn!(
                                timeout = ?self.config.batch_timeout,
                                "reminder scan exceeded batch timeout, abandoning"
                            );
                        }
                    }
                }
            }
        }
        tracing::debug!("reminder scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventType, NewTask, Recurrence, ReminderPayload, UserId};
    use crate::ports::broker::TOPIC_REMINDERS;
    use crate::ports::{FixedClock, IdGenerator, UlidGenerator};
    use crate::publisher::Outbox;
    use crate::store::InMemoryTaskStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::time::Duration as StdDuration;
    use ulid::Ulid;

    struct Harness {
        store: Arc<InMemoryTaskStore>,
        clock: Arc<FixedClock>,
        publisher: Arc<EventPublisher>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(t0()));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let store = Arc::new(InMemoryTaskStore::new(ids.clone(), clock.clone()));
        let publisher = Arc::new(EventPublisher::new(Arc::new(Outbox::new()), ids, clock.clone()));
        Harness {
            store,
            clock,
            publisher,
        }
    }

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            tick: StdDuration::from_millis(10),
            lookahead: StdDuration::from_secs(60 * 60),
            batch_timeout: StdDuration::from_secs(1),
        }
    }

    impl Harness {
        fn scheduler(&self) -> ReminderScheduler {
            ReminderScheduler::new(
                self.store.clone(),
                self.publisher.clone(),
                self.clock.clone(),
                test_config(),
            )
            .unwrap()
        }

        async fn seed(&self, due: Option<DateTime<Utc>>) -> crate::domain::TaskSnapshot {
            self.store
                .create_task(NewTask {
                    user_id: UserId::from_ulid(Ulid::new()),
                    title: "Standup".to_string(),
                    description: None,
                    priority: None,
                    tags: Vec::new(),
                    due_date: due,
                    recurrence: Some(Recurrence::Daily),
                    parent_task_id: None,
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn due_task_gets_exactly_one_reminder_across_scans() {
        let h = harness();
        let task = h.seed(Some(t0() + Duration::minutes(30))).await;
        let scheduler = h.scheduler();

        let first = scheduler.scan_once().await.unwrap();
        assert_eq!(first, ScanReport { candidates: 1, dispatched: 1 });

        // Second scan inside the same window: the flag filters the task
        // out of the query entirely.
        let second = scheduler.scan_once().await.unwrap();
        assert_eq!(second, ScanReport { candidates: 0, dispatched: 0 });

        let entry = h.publisher.outbox().next_entry().await;
        assert_eq!(entry.topic, TOPIC_REMINDERS);
        assert_eq!(entry.event.event_type, EventType::ReminderScheduled);
        assert_eq!(entry.event.task_id, task.task_id);

        let payload: ReminderPayload = serde_json::from_value(entry.event.payload).unwrap();
        assert_eq!(payload.title, "Standup");
        assert_eq!(payload.due_at, t0() + Duration::minutes(30));
        assert_eq!(h.publisher.outbox().pending_len(), 0);
    }

    #[tokio::test]
    async fn task_outside_lookahead_is_not_reminded_yet() {
        let h = harness();
        h.seed(Some(t0() + Duration::hours(3))).await;
        let scheduler = h.scheduler();

        let report = scheduler.scan_once().await.unwrap();
        assert_eq!(report, ScanReport::default());

        // Advance the clock so the task enters the window.
        h.clock.set(t0() + Duration::hours(2) + Duration::minutes(30));
        let report = scheduler.scan_once().await.unwrap();
        assert_eq!(report.dispatched, 1);
    }

    #[tokio::test]
    async fn concurrent_replicas_publish_one_event() {
        let h = harness();
        h.seed(Some(t0() + Duration::minutes(30))).await;

        // Two replicas share the store and outbox, scanning at once.
        let a = h.scheduler();
        let b = h.scheduler();
        let (ra, rb) = tokio::join!(a.scan_once(), b.scan_once());
        let total = ra.unwrap().dispatched + rb.unwrap().dispatched;

        assert_eq!(total, 1);
        assert_eq!(h.publisher.outbox().pending_len(), 1);
    }

    #[tokio::test]
    async fn due_date_edit_rearms_the_reminder() {
        let h = harness();
        let task = h.seed(Some(t0() + Duration::minutes(30))).await;
        let scheduler = h.scheduler();

        assert_eq!(scheduler.scan_once().await.unwrap().dispatched, 1);

        h.store
            .update_due_date(task.task_id, t0() + Duration::minutes(45))
            .unwrap();

        assert_eq!(scheduler.scan_once().await.unwrap().dispatched, 1);
        assert_eq!(h.publisher.outbox().pending_len(), 2);
    }

    #[tokio::test]
    async fn run_loop_scans_on_ticks_and_stops_on_shutdown() {
        let h = harness();
        h.seed(Some(t0() + Duration::minutes(30))).await;
        let scheduler = h.scheduler();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(StdDuration::from_millis(500), join)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.publisher.outbox().pending_len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_shutdown_handle_stops_the_loop() {
        let h = harness();
        let scheduler = h.scheduler();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(scheduler.run(shutdown_rx));
        drop(shutdown_tx);

        tokio::time::timeout(StdDuration::from_millis(500), join)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let h = harness();
        let result = ReminderScheduler::new(
            h.store.clone(),
            h.publisher.clone(),
            h.clock.clone(),
            SchedulerConfig {
                tick: StdDuration::from_secs(600),
                lookahead: StdDuration::from_secs(60),
                batch_timeout: StdDuration::from_secs(1),
            },
        );
        assert!(matches!(result, Err(PulseError::InvalidConfig(_))));
    }
}
