//! Notification gateway: reminder consumption and push fan-out.
//!
//! Owns the client-facing side: it authenticates connecting sessions,
//! keeps their push handles in the [`ConnectionRegistry`], consumes the
//! `reminders` topic and fans each reminder out to the owning user's
//! live connections. Users with no connections are skipped silently.
//!
//! A separate housekeeping loop evicts connections whose heartbeats
//! stopped, so a client that vanished without a clean disconnect does
//! not accumulate forever.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::GatewayConfig;
use crate::domain::{ConnectionId, EventType, PushMessage, ReminderPayload, TaskEvent, UserId};
use crate::error::PulseError;
use crate::ports::broker::Subscription;
use crate::ports::{Clock, IdGenerator, PushConnection, SessionAuth};

use super::registry::ConnectionRegistry;

pub struct NotificationGateway {
    registry: Arc<ConnectionRegistry>,
    auth: Arc<dyn SessionAuth>,
    ids: Arc<dyn IdGenerator>,
    config: GatewayConfig,
}

impl NotificationGateway {
    /// The gateway owns its registry; `config.registry_shards` sizes it.
    pub fn new(
        auth: Arc<dyn SessionAuth>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: GatewayConfig,
    ) -> Result<Self, PulseError> {
        config.validate()?;
        let registry = Arc::new(ConnectionRegistry::new(config.registry_shards, clock));
        Ok(Self {
            registry,
            auth,
            ids,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handshake: validate the session token, register the connection.
    /// An invalid token never touches the registry.
    pub async fn connect(
        &self,
        token: &str,
        conn: Arc<dyn PushConnection>,
    ) -> Result<(UserId, ConnectionId), PulseError> {
        let user_id = self.auth.validate_session_token(token).await?;
        let connection_id = self.ids.connection_id();
        self.registry.register(user_id, connection_id, conn);
        tracing::info!(%user_id, %connection_id, "client connected");
        Ok((user_id, connection_id))
    }

    /// Clean disconnect from the client side.
    pub fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) {
        self.registry.unregister(user_id, connection_id);
    }

    /// Client heartbeat. Returns false if the connection is unknown
    /// (already evicted); the client should reconnect.
    pub fn heartbeat(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        self.registry.touch(user_id, connection_id)
    }

    /// Handle one reminder event. Returns the number of connections the
    /// push reached.
    async fn deliver(&self, event: &TaskEvent) -> Result<usize, PulseError> {
        let payload: ReminderPayload = serde_json::from_value(event.payload.clone())?;
        let message = PushMessage::Reminder {
            task_id: event.task_id,
            title: payload.title,
            due_at: payload.due_at,
        };
        let sent = self.registry.dispatch(event.user_id, &message).await;
        if sent == 0 {
            tracing::debug!(user_id = %event.user_id, "user offline, reminder dropped");
        }
        Ok(sent)
    }

    /// Consume the `reminders` subscription until shutdown.
    ///
    /// Best-effort delivery: the event is acked whether or not anyone was
    /// connected to receive it. Only a malformed payload is rejected.
    pub async fn run(
        self: Arc<Self>,
        mut sub: Box<dyn Subscription>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                delivery = sub.next() => delivery,
            };
            let Some(delivery) = delivery else {
                break;
            };

            let event = delivery.event().clone();
            if event.event_type != EventType::ReminderScheduled {
                tracing::debug!(r#type = %event.event_type, "unexpected event on reminders topic");
                if let Err(err) = delivery.ack().await {
                    tracing::warn!(%err, "ack failed");
                }
                continue;
            }

            match self.deliver(&event).await {
                Ok(sent) => {
                    tracing::debug!(
                        event_id = %event.event_id,
                        user_id = %event.user_id,
                        sent,
                        "reminder fanned out"
                    );
                    if let Err(err) = delivery.ack().await {
                        tracing::warn!(event_id = %event.event_id, %err, "ack failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        %err,
                        "malformed reminder payload, dead-lettering"
                    );
                    if let Err(err) = delivery.reject(err.to_string()).await {
                        tracing::warn!(event_id = %event.event_id, %err, "reject failed");
                    }
                }
            }
        }
        tracing::debug!("notification gateway stopped");
    }

    /// Periodic eviction of connections with stale heartbeats.
    pub async fn run_housekeeping(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.registry.sweep_idle(self.config.idle_ttl);
                }
            }
        }
    }
}
