//! Application loops: the long-lived consumers and producers wired on
//! top of the ports.
//!
//! - [`RecurrenceEngine`] consumes `task-events` and regenerates
//!   recurring tasks on completion.
//! - [`ReminderScheduler`] scans the store on a fixed tick and publishes
//!   reminder events for tasks entering the lookahead window.
//! - [`NotificationGateway`] consumes `reminders` and fans pushes out to
//!   the live connections in the [`ConnectionRegistry`].
//!
//! Each loop takes a `watch::Receiver<bool>` shutdown signal and is
//! spawned as its own task; they share nothing but the ports.

pub mod gateway;
pub mod idempotency;
pub mod recurrence;
pub mod registry;
pub mod scheduler;

pub use gateway::NotificationGateway;
pub use idempotency::RecentlySeen;
pub use recurrence::{Processed, RecurrenceEngine};
pub use registry::{ConnectionRegistry, RegistryCounts};
pub use scheduler::{ReminderScheduler, ScanReport};
