//! Bounded recently-seen set for duplicate-event suppression.

use std::collections::{HashSet, VecDeque};

use crate::domain::EventId;

/// Sliding window of processed event ids.
///
/// The broker is at-least-once, so consumers key on `event_id` and
/// no-op redeliveries. The window is bounded: insertion order is kept
/// in a ring and the oldest id is evicted once capacity is reached.
/// Owned by a single consumer loop, so no interior locking.
#[derive(Debug)]
pub struct RecentlySeen {
    capacity: usize,
    seen: HashSet<EventId>,
    order: VecDeque<EventId>,
}

impl RecentlySeen {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Record an id. Returns false if it was already present (duplicate
    /// delivery; the caller should no-op).
    pub fn insert(&mut self, id: EventId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
