//! IdGenerator port - ID minting behind a trait for testability.
//!
//! Production IDs are ULIDs: sortable by time, generatable on any replica
//! without coordination. The clock is injected so a `FixedClock` yields
//! deterministic timestamp halves in tests.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::{ConnectionId, EventId, TaskId};

use super::clock::Clock;

pub trait IdGenerator: Send + Sync {
    fn event_id(&self) -> EventId;
    fn task_id(&self) -> TaskId;
    fn connection_id(&self) -> ConnectionId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn event_id(&self) -> EventId {
        EventId::from(self.next())
    }

    fn task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }

    fn connection_id(&self) -> ConnectionId {
        ConnectionId::from(self.next())
    }
}
