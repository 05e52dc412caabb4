//! Broker implementations and retry policy.
//!
//! `InMemoryBroker` is the development/test adapter for the `Broker`
//! port; a production deployment would plug a Kafka/Redis-backed adapter
//! into the same trait.

mod memory;
mod retry;

pub use memory::{BrokerConfig, DeadLetter, InMemoryBroker, TopicCounts};
pub use retry::RetryPolicy;
