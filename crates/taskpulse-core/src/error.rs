use thiserror::Error;

use crate::domain::TaskId;

#[derive(Debug, Error)]
pub enum PulseError {
    /// Transient broker failure (publish or consume). Retryable.
    #[error("broker: {0}")]
    Broker(String),

    /// Task store failure. Retryable unless the store says otherwise.
    /// The in-memory adapter never produces it; production adapters map
    /// their driver errors here, and consumers nack to retry.
    #[error("task store: {0}")]
    Store(String),

    /// Event payload did not decode into the expected shape.
    /// Routed to the dead-letter queue; never halts a consumer.
    #[error("malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// Referenced task does not exist (deleted before the event was
    /// processed). Consumers treat this as a benign no-op.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Session token was rejected by the auth collaborator.
    #[error("session token rejected")]
    Unauthorized,

    /// Push connection is gone; the handle should be unregistered.
    #[error("connection closed")]
    ConnectionClosed,
}
