//! Broker port - topics, publishing and at-least-once consumption.
//!
//! Delivery contract:
//! - At-least-once: an unacked or nacked delivery comes back. Consumers
//!   must be idempotent (they key on `event_id`).
//! - Ordering is guaranteed per partition key only, and only while a
//!   single consumer drains a partition. No cross-key ordering. A
//!   nacked event re-enters after its backoff and may be overtaken by
//!   newer events of its key.
//! - A delivery that can never be processed is `reject`ed to the topic's
//!   dead-letter queue so the stream keeps moving.

use async_trait::async_trait;

use crate::domain::TaskEvent;
use crate::error::PulseError;

/// Topic carrying task mutation events, partitioned by `task_id` so
/// completions of the same task arrive in emission order.
pub const TOPIC_TASK_EVENTS: &str = "task-events";

/// Topic carrying reminder events, partitioned by `user_id` for gateway
/// locality. Ordering is irrelevant here; reminders are independent.
pub const TOPIC_REMINDERS: &str = "reminders";

/// One in-flight delivery. The consumer owns it and must settle it
/// exactly one way.
///
/// Mirrors a lease: the broker tracks state, the consumer reports the
/// result. Dropping a delivery without settling counts as a nack (the
/// broker redelivers), which is what makes abrupt consumer death safe.
#[async_trait]
pub trait Delivery: Send {
    fn event(&self) -> &TaskEvent;

    /// How many times this event has been delivered, this one included.
    fn attempt(&self) -> u32;

    /// Processing done (including idempotent no-ops).
    async fn ack(self: Box<Self>) -> Result<(), PulseError>;

    /// Processing failed transiently; redeliver later.
    async fn nack(self: Box<Self>) -> Result<(), PulseError>;

    /// Processing can never succeed (malformed payload). Move to the
    /// dead-letter queue and continue the stream.
    async fn reject(self: Box<Self>, reason: String) -> Result<(), PulseError>;
}

/// A consumer's handle onto one topic. Competing-consumer semantics:
/// replicas subscribing to the same topic split the deliveries.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the broker shut down.
    async fn next(&mut self) -> Option<Box<dyn Delivery>>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event: TaskEvent,
    ) -> Result<(), PulseError>;

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, PulseError>;
}
