//! Ports - the abstraction layer between this subsystem and the world.
//!
//! Each trait hides one collaborator (task store, broker, auth, the
//! client transport) or one injectable concern (clock, id generation).
//! The in-memory implementations under `broker/` and `store/` plug in
//! here for tests and the demo binary; production adapters would do the
//! same.

pub mod auth;
pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod push;
pub mod task_store;

pub use self::auth::{SessionAuth, StaticTokenAuth};
pub use self::broker::{Broker, Delivery, Subscription, TOPIC_REMINDERS, TOPIC_TASK_EVENTS};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::push::{ChannelConnection, PushConnection};
pub use self::task_store::TaskStore;
