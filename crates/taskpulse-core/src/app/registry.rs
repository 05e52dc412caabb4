//! Connection registry: live push handles per user, sharded.
//!
//! A user may hold several connections at once (laptop and phone); each
//! is tracked separately and a dispatch fans out to all of them. The map
//! is sharded by user so connection churn on one shard does not contend
//! with dispatch on another. Locks are plain `std::sync::Mutex` and are
//! never held across an await: dispatch snapshots the handles under the
//! lock and sends outside it.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{ConnectionId, PushMessage, UserId};
use crate::error::PulseError;
use crate::ports::{Clock, PushConnection};

struct ConnEntry {
    conn: Arc<dyn PushConnection>,
    last_seen: DateTime<Utc>,
}

type Shard = HashMap<UserId, HashMap<ConnectionId, ConnEntry>>;

pub struct ConnectionRegistry {
    shards: Vec<Mutex<Shard>>,
    clock: Arc<dyn Clock>,
}

/// Counts over the whole registry, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryCounts {
    pub users: usize,
    pub connections: usize,
}

impl ConnectionRegistry {
    pub fn new(shard_count: usize, clock: Arc<dyn Clock>) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(Shard::new()))
            .collect();
        Self { shards, clock }
    }

    fn shard(&self, user_id: UserId) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index].lock().expect("registry shard poisoned")
    }

    pub fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        conn: Arc<dyn PushConnection>,
    ) {
        let now = self.clock.now();
        self.shard(user_id).entry(user_id).or_default().insert(
            connection_id,
            ConnEntry {
                conn,
                last_seen: now,
            },
        );
        tracing::debug!(%user_id, %connection_id, "connection registered");
    }

    /// Returns false if the connection was already gone (double
    /// disconnect, or evicted by the sweep first).
    pub fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut shard = self.shard(user_id);
        let Some(conns) = shard.get_mut(&user_id) else {
            return false;
        };
        let removed = conns.remove(&connection_id).is_some();
        if conns.is_empty() {
            shard.remove(&user_id);
        }
        if removed {
            tracing::debug!(%user_id, %connection_id, "connection unregistered");
        }
        removed
    }

    /// Heartbeat: refresh a connection's idle timer.
    pub fn touch(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let now = self.clock.now();
        let mut shard = self.shard(user_id);
        match shard
            .get_mut(&user_id)
            .and_then(|conns| conns.get_mut(&connection_id))
        {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Fan one message out to every live connection of the user.
    ///
    /// Returns the number of successful sends. Zero connections is a
    /// silent no-op (the user is simply offline). A handle that reports
    /// `ConnectionClosed` is dropped from the registry; the remaining
    /// handles still get the message.
    pub async fn dispatch(&self, user_id: UserId, message: &PushMessage) -> usize {
        let handles: Vec<(ConnectionId, Arc<dyn PushConnection>)> = {
            let shard = self.shard(user_id);
            match shard.get(&user_id) {
                Some(conns) => conns
                    .iter()
                    .map(|(id, entry)| (*id, entry.conn.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut sent = 0;
        for (connection_id, conn) in handles {
            match conn.send(message).await {
                Ok(()) => sent += 1,
                Err(PulseError::ConnectionClosed) => {
                    tracing::debug!(%user_id, %connection_id, "dead connection dropped on send");
                    self.unregister(user_id, connection_id);
                }
                Err(err) => {
                    tracing::warn!(%user_id, %connection_id, %err, "push send failed");
                }
            }
        }
        sent
    }

    /// Evict connections silent for longer than `idle_ttl`. Returns the
    /// number evicted.
    pub fn sweep_idle(&self, idle_ttl: Duration) -> usize {
        // A TTL too large to represent means nothing can be idle yet.
        let Some(cutoff) = chrono::Duration::from_std(idle_ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_sub_signed(ttl))
        else {
            return 0;
        };
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().expect("registry shard poisoned");
            for conns in shard.values_mut() {
                let before = conns.len();
                conns.retain(|_, entry| entry.last_seen >= cutoff);
                evicted += before - conns.len();
            }
            shard.retain(|_, conns| !conns.is_empty());
        }
        if evicted > 0 {
            tracing::info!(evicted, "idle connections evicted");
        }
        evicted
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn counts(&self) -> RegistryCounts {
        let mut counts = RegistryCounts::default();
        for shard in &self.shards {
            let shard = shard.lock().expect("registry shard poisoned");
            counts.users += shard.len();
            counts.connections += shard.values().map(HashMap::len).sum::<usize>();
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::ports::{ChannelConnection, FixedClock};
    use chrono::TimeZone;
    use tokio::sync::mpsc;
    use ulid::Ulid;

    fn registry() -> (ConnectionRegistry, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap(),
        ));
        (ConnectionRegistry::new(4, clock.clone()), clock)
    }

    fn reminder() -> PushMessage {
        PushMessage::Reminder {
            task_id: TaskId::from_ulid(Ulid::new()),
            title: "Standup".to_string(),
            due_at: Utc::now(),
        }
    }

    fn attach(
        registry: &ConnectionRegistry,
        user: UserId,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<PushMessage>) {
        let (conn, rx) = ChannelConnection::new();
        let id = ConnectionId::from_ulid(Ulid::new());
        registry.register(user, id, Arc::new(conn));
        (id, rx)
    }

    #[tokio::test]
    async fn dispatch_reaches_every_connection_of_the_user() {
        let (registry, _clock) = registry();
        let user = UserId::from_ulid(Ulid::new());
        let other = UserId::from_ulid(Ulid::new());

        let (_id1, mut rx1) = attach(&registry, user);
        let (_id2, mut rx2) = attach(&registry, user);
        let (_id3, mut rx3) = attach(&registry, other);

        let sent = registry.dispatch(user, &reminder()).await;

        assert_eq!(sent, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_to_offline_user_is_a_no_op() {
        let (registry, _clock) = registry();
        let user = UserId::from_ulid(Ulid::new());
        assert_eq!(registry.dispatch(user, &reminder()).await, 0);
    }

    #[tokio::test]
    async fn dead_connection_is_dropped_others_still_receive() {
        let (registry, _clock) = registry();
        let user = UserId::from_ulid(Ulid::new());

        let (_dead_id, dead_rx) = attach(&registry, user);
        let (_live_id, mut live_rx) = attach(&registry, user);
        drop(dead_rx);

        let sent = registry.dispatch(user, &reminder()).await;

        assert_eq!(sent, 1);
        assert!(live_rx.try_recv().is_ok());
        assert_eq!(registry.counts().connections, 1);
    }

    #[tokio::test]
    async fn unregister_removes_only_the_named_connection() {
        let (registry, _clock) = registry();
        let user = UserId::from_ulid(Ulid::new());
        let (id1, _rx1) = attach(&registry, user);
        let (_id2, _rx2) = attach(&registry, user);

        assert!(registry.unregister(user, id1));
        assert!(!registry.unregister(user, id1));
        assert_eq!(
            registry.counts(),
            RegistryCounts {
                users: 1,
                connections: 1
            }
        );
    }

    #[tokio::test]
    async fn sweep_evicts_idle_connections_touch_keeps_them() {
        let (registry, clock) = registry();
        let user = UserId::from_ulid(Ulid::new());
        let (idle_id, _idle_rx) = attach(&registry, user);
        let (active_id, _active_rx) = attach(&registry, user);

        clock.advance(chrono::Duration::seconds(120));
        assert!(registry.touch(user, active_id));

        let evicted = registry.sweep_idle(Duration::from_secs(90));

        assert_eq!(evicted, 1);
        assert!(!registry.touch(user, idle_id));
        assert!(registry.touch(user, active_id));
    }

    #[tokio::test]
    async fn sweeping_out_the_last_connection_drops_the_user_entry() {
        let (registry, clock) = registry();
        let user = UserId::from_ulid(Ulid::new());
        let (_id, _rx) = attach(&registry, user);

        clock.advance(chrono::Duration::seconds(120));
        registry.sweep_idle(Duration::from_secs(90));

        assert_eq!(registry.counts(), RegistryCounts::default());
    }
}
