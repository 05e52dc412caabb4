//! Demo wiring: the whole subsystem running in one process against the
//! in-memory adapters.
//!
//! Walks the full loop once: a recurring task is created, a reminder is
//! pushed to a connected client, the task is completed and the next
//! occurrence shows up in the store. Run with `RUST_LOG=debug` to watch
//! the events move.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use taskpulse_core::app::{NotificationGateway, RecurrenceEngine, ReminderScheduler};
use taskpulse_core::broker::{BrokerConfig, InMemoryBroker};
use taskpulse_core::config::{GatewayConfig, IdempotencyConfig, SchedulerConfig};
use taskpulse_core::domain::{NewTask, Recurrence, UserId};
use taskpulse_core::ports::broker::{Broker, TOPIC_REMINDERS, TOPIC_TASK_EVENTS};
use taskpulse_core::ports::{
    ChannelConnection, Clock, IdGenerator, StaticTokenAuth, SystemClock, TaskStore, UlidGenerator,
};
use taskpulse_core::publisher::{EventPublisher, Outbox, OutboxConfig, OutboxSender};
use taskpulse_core::store::InMemoryTaskStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // (A) Shared infrastructure: clock, ids, store, broker, outbox.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
    let store = Arc::new(InMemoryTaskStore::new(ids.clone(), clock.clone()));
    let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default()));
    let publisher = Arc::new(EventPublisher::new(
        Arc::new(Outbox::new()),
        ids.clone(),
        clock.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // (B) Background loops: outbox sender, recurrence engine, scheduler,
    // gateway consumer.
    let sender = OutboxSender::new(
        publisher.outbox().clone(),
        broker.clone(),
        OutboxConfig::default(),
    );
    let sender_task = tokio::spawn(sender.run(shutdown_rx.clone()));

    let engine = RecurrenceEngine::new(store.clone(), IdempotencyConfig::default());
    let engine_task = tokio::spawn(engine.run(
        broker.subscribe(TOPIC_TASK_EVENTS).await?,
        shutdown_rx.clone(),
    ));

    let scheduler = ReminderScheduler::new(
        store.clone(),
        publisher.clone(),
        clock.clone(),
        SchedulerConfig {
            tick: Duration::from_secs(1),
            lookahead: Duration::from_secs(60 * 60),
            batch_timeout: Duration::from_secs(10),
        },
    )?;
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let auth = Arc::new(StaticTokenAuth::new());
    let gateway = Arc::new(NotificationGateway::new(
        auth.clone(),
        ids.clone(),
        clock.clone(),
        GatewayConfig::default(),
    )?);
    let gateway_task = tokio::spawn(gateway.clone().run(
        broker.subscribe(TOPIC_REMINDERS).await?,
        shutdown_rx.clone(),
    ));
    let housekeeping_task = tokio::spawn(gateway.clone().run_housekeeping(shutdown_rx.clone()));

    // (C) A client connects with a valid session token. No auth service
    // mints users here, so make one up.
    let user = UserId::from_ulid(ulid::Ulid::new());
    auth.insert("demo-token", user);
    let (conn, mut pushes) = ChannelConnection::new();
    let (_, connection_id) = gateway.connect("demo-token", Arc::new(conn)).await?;
    tracing::info!(%user, %connection_id, "demo client connected");

    let push_printer = tokio::spawn(async move {
        while let Some(message) = pushes.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => println!("push -> {json}"),
                Err(err) => tracing::warn!(%err, "push not serializable"),
            }
        }
    });

    // (D) Create a recurring task due in 30 minutes; the next scheduler
    // tick picks it up and the reminder lands on the connection above.
    let task = store
        .create_task(NewTask {
            user_id: user,
            title: "Standup".to_string(),
            description: Some("Daily sync".to_string()),
            priority: None,
            tags: vec!["work".to_string()],
            due_date: Some(Utc::now() + chrono::Duration::minutes(30)),
            recurrence: Some(Recurrence::Daily),
            parent_task_id: None,
        })
        .await?;
    publisher.task_created(&task)?;
    tracing::info!(task_id = %task.task_id, "recurring task created");

    tokio::time::sleep(Duration::from_secs(2)).await;

    // (E) Complete it; the recurrence engine creates tomorrow's task.
    let completed = store.set_completed(task.task_id)?;
    publisher.task_completed(&completed)?;
    tracing::info!(task_id = %task.task_id, "task completed");

    tokio::time::sleep(Duration::from_secs(2)).await;

    for child in store.children_of(task.task_id) {
        println!(
            "next occurrence: {} \"{}\" due {}",
            child.task_id,
            child.title,
            child.due_date.map(|d| d.to_rfc3339()).unwrap_or_default()
        );
    }

    // (F) Graceful shutdown: stop the loops, then the broker.
    shutdown_tx.send(true)?;
    broker.shutdown();
    let _ = tokio::join!(
        sender_task,
        engine_task,
        scheduler_task,
        gateway_task,
        housekeeping_task
    );
    push_printer.abort();

    tracing::info!("demo finished");
    Ok(())
}
