//! In-memory broker implementation.
//!
//! Development and test stand-in for a real partitioned broker. It keeps
//! the contract that matters to consumers: at-least-once delivery (nack
//! and drop both redeliver), per-key FIFO while a single consumer drains
//! a topic, attempt caps, and a per-topic dead-letter queue.
//!
//! One exception to per-key FIFO: a nacked event waits out its backoff
//! in `scheduled` and is no longer in flight, so a newer event for the
//! same key can be handed out before the redelivery. Consumers key on
//! `event_id` anyway, so the reorder is harmless.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::TaskEvent;
use crate::error::PulseError;
use crate::ports::broker::{Broker, Delivery, Subscription};

use super::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Deliveries per event before it is moved to the dead-letter queue.
    pub max_delivery_attempts: u32,

    /// Backoff between redeliveries of a nacked event.
    pub redelivery: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            redelivery: RetryPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn fast() -> Self {
        Self {
            max_delivery_attempts: 5,
            redelivery: RetryPolicy::fast(),
        }
    }
}

/// An event that ended up unprocessable, kept for manual replay.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: TaskEvent,
    pub attempts: u32,
    pub reason: String,
}

/// Queue depth snapshot for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub dead: usize,
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: TaskEvent,
    partition_key: String,
    /// Deliveries so far (incremented when handed to a consumer).
    attempts: u32,
}

struct ScheduledEvent {
    ready_at: Instant,
    queued: QueuedEvent,
}

/// Per-topic queue state. Guarded by a std mutex; never held across an
/// await (waiting happens on the `Notify` outside the lock).
struct TopicQueue {
    pending: VecDeque<QueuedEvent>,
    /// Nacked events waiting out their backoff. Small, scanned linearly.
    scheduled: Vec<ScheduledEvent>,
    in_flight: HashMap<u64, QueuedEvent>,
    dead: Vec<DeadLetter>,
    next_seq: u64,
}

impl TopicQueue {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            scheduled: Vec::new(),
            in_flight: HashMap::new(),
            dead: Vec::new(),
            next_seq: 1,
        }
    }

    /// Move scheduled events whose backoff elapsed into the pending
    /// queue. Returns the earliest wake-up still outstanding.
    fn promote_scheduled(&mut self) -> Option<Instant> {
        let now = Instant::now();
        let mut i = 0;
        while i < self.scheduled.len() {
            if self.scheduled[i].ready_at <= now {
                let entry = self.scheduled.swap_remove(i);
                self.pending.push_back(entry.queued);
            } else {
                i += 1;
            }
        }
        self.scheduled.iter().map(|e| e.ready_at).min()
    }

    /// Hand out the oldest pending event whose partition is idle.
    ///
    /// A partition with an in-flight delivery is blocked until that
    /// delivery settles; this is what gives per-key ordering even with
    /// competing consumers.
    fn take_next(&mut self) -> Option<(u64, QueuedEvent)> {
        let idx = self.pending.iter().position(|candidate| {
            !self
                .in_flight
                .values()
                .any(|busy| busy.partition_key == candidate.partition_key)
        })?;

        let mut queued = self.pending.remove(idx)?;
        queued.attempts += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(seq, queued.clone());
        Some((seq, queued))
    }

    fn counts(&self) -> TopicCounts {
        TopicCounts {
            pending: self.pending.len() + self.scheduled.len(),
            in_flight: self.in_flight.len(),
            dead: self.dead.len(),
        }
    }
}

struct Topic {
    queue: Mutex<TopicQueue>,
    notify: Notify,
}

impl Topic {
    fn new() -> Self {
        Self {
            queue: Mutex::new(TopicQueue::new()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TopicQueue> {
        self.queue.lock().expect("topic queue lock poisoned")
    }
}

/// In-memory partitioned broker.
///
/// Topics are created on first use. Subscriptions to the same topic are
/// competing consumers: each delivery goes to exactly one of them.
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    config: BrokerConfig,
    shutdown: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().expect("topic table lock poisoned");
        Arc::clone(topics.entry(name.to_string()).or_insert_with(|| Arc::new(Topic::new())))
    }

    /// Stop all subscriptions: every pending `next()` resolves to `None`.
    /// In-flight deliveries can still be settled.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let topics = self.topics.lock().expect("topic table lock poisoned");
        for topic in topics.values() {
            topic.notify.notify_waiters();
        }
    }

    pub fn counts(&self, topic: &str) -> TopicCounts {
        self.topic(topic).lock().counts()
    }

    /// Dead-lettered events of a topic, oldest first.
    pub fn dead_letters(&self, topic: &str) -> Vec<DeadLetter> {
        self.topic(topic).lock().dead.clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event: TaskEvent,
    ) -> Result<(), PulseError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PulseError::Broker("broker is shut down".to_string()));
        }

        let topic = self.topic(topic);
        topic.lock().pending.push_back(QueuedEvent {
            event,
            partition_key: partition_key.to_string(),
            attempts: 0,
        });
        topic.notify.notify_one();
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, PulseError> {
        Ok(Box::new(InMemorySubscription {
            topic: self.topic(topic),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }))
    }
}

struct InMemorySubscription {
    topic: Arc<Topic>,
    config: BrokerConfig,
    /// Shared with the broker; lets a subscription outlive the borrow
    /// it was created from.
    shutdown: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Option<Box<dyn Delivery>> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }

            let next_wake = {
                let mut queue = self.topic.lock();
                let next_wake = queue.promote_scheduled();

                if let Some((seq, queued)) = queue.take_next() {
                    return Some(Box::new(InMemoryDelivery {
                        seq,
                        queued: Some(queued),
                        topic: Arc::clone(&self.topic),
                        config: self.config.clone(),
                    }));
                }
                next_wake
            };

            // Nothing ready: wait for a publish/redelivery notification,
            // the earliest scheduled wake-up, or shutdown.
            match next_wake {
                Some(wake_at) => {
                    tokio::select! {
                        _ = self.topic.notify.notified() => {}
                        _ = tokio::time::sleep_until(wake_at.into()) => {}
                    }
                }
                None => self.topic.notify.notified().await,
            }
        }
    }
}

struct InMemoryDelivery {
    seq: u64,
    queued: Option<QueuedEvent>,
    topic: Arc<Topic>,
    config: BrokerConfig,
}

impl InMemoryDelivery {
    fn settle(&mut self) -> Option<QueuedEvent> {
        let queued = self.queued.take()?;
        self.topic.lock().in_flight.remove(&self.seq);
        // Settling unblocks the partition; wake a waiting consumer.
        self.topic.notify.notify_one();
        Some(queued)
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn event(&self) -> &TaskEvent {
        &self
            .queued
            .as_ref()
            .expect("delivery already settled")
            .event
    }

    fn attempt(&self) -> u32 {
        self.queued
            .as_ref()
            .expect("delivery already settled")
            .attempts
    }

    async fn ack(mut self: Box<Self>) -> Result<(), PulseError> {
        self.settle();
        Ok(())
    }

    async fn nack(mut self: Box<Self>) -> Result<(), PulseError> {
        let Some(queued) = self.settle() else {
            return Ok(());
        };

        let mut queue = self.topic.lock();
        if queued.attempts >= self.config.max_delivery_attempts {
            tracing::warn!(
                event_id = %queued.event.event_id,
                attempts = queued.attempts,
                "delivery attempts exhausted, dead-lettering"
            );
            queue.dead.push(DeadLetter {
                attempts: queued.attempts,
                reason: format!("max delivery attempts ({}) reached", queued.attempts),
                event: queued.event,
            });
            return Ok(());
        }

        let delay = self.config.redelivery.next_delay(queued.attempts);
        queue.scheduled.push(ScheduledEvent {
            ready_at: Instant::now() + delay,
            queued,
        });
        drop(queue);
        self.topic.notify.notify_one();
        Ok(())
    }

    async fn reject(mut self: Box<Self>, reason: String) -> Result<(), PulseError> {
        let Some(queued) = self.settle() else {
            return Ok(());
        };

        tracing::warn!(
            event_id = %queued.event.event_id,
            %reason,
            "delivery rejected, dead-lettering"
        );
        self.topic.lock().dead.push(DeadLetter {
            attempts: queued.attempts,
            reason,
            event: queued.event,
        });
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    /// A delivery dropped without being settled counts as a nack: the
    /// event goes straight back to pending so a crashed consumer never
    /// loses it.
    fn drop(&mut self) {
        if let Some(queued) = self.queued.take() {
            let mut queue = self.topic.lock();
            queue.in_flight.remove(&self.seq);
            queue.pending.push_front(queued);
            drop(queue);
            self.topic.notify.notify_one();
        }
    }
}
