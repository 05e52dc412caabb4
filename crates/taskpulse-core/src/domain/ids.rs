//! Domain identifiers (strongly-typed IDs).
//!
//! IDs are ULIDs (Universally Unique Lexicographically Sortable Identifiers):
//! sortable by creation time, generatable on any node without coordination,
//! and 128-bit like a UUID. A phantom-typed generic `Id<T>` provides one
//! implementation for all ID kinds while keeping them distinct at compile
//! time (an `EventId` can never be passed where a `TaskId` is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for ID kinds. Provides the `Display` prefix.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used in `Display` (e.g. "task-", "event-").
    fn prefix() -> &'static str;
}

/// Generic ID type.
///
/// `T` is a zero-sized marker: it costs nothing at runtime but makes the
/// ID kinds mutually incompatible at compile time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "event-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Connection {}

impl IdMarker for Connection {
    fn prefix() -> &'static str {
        "conn-"
    }
}

/// Identifier of a task row in the Task Store.
pub type TaskId = Id<Task>;

/// Identifier of a user (owner of tasks and connections).
pub type UserId = Id<User>;

/// Identifier of a published event. The idempotency key for consumers.
pub type EventId = Id<Event>;

/// Identifier of one live client session in the gateway registry.
pub type ConnectionId = Id<Connection>;
