//! taskpulse-core
//!
//! Event-driven augmentation layer for a task tracker: event
//! publication, recurrence regeneration, reminder scheduling and
//! notification fan-out.
//!
//! # Module layout
//! - **domain**: domain model (ids, task snapshots, recurrence math,
//!   event envelopes and payloads)
//! - **ports**: abstraction layer (TaskStore, Broker, SessionAuth,
//!   PushConnection, Clock, IdGenerator)
//! - **broker** / **store**: in-memory adapters for the broker and the
//!   task store ports, used by tests and the demo binary
//! - **publisher**: event staging (outbox) and the background sender
//! - **app**: the long-lived loops (recurrence engine, reminder
//!   scheduler, notification gateway) and the connection registry
//! - **config**: tunables for the loops, deserializable from JSON
//!
//! Everything stateful is reached through a port, so the loops can be
//! tested against the in-memory adapters and deployed against real
//! collaborators without changes.

pub mod app;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod publisher;
pub mod store;

pub use app::{ConnectionRegistry, NotificationGateway, RecurrenceEngine, ReminderScheduler};
pub use config::{GatewayConfig, IdempotencyConfig, SchedulerConfig};
pub use error::PulseError;
pub use publisher::{EventPublisher, Outbox, OutboxConfig, OutboxSender};
