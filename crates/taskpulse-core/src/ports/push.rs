//! PushConnection port - one live client session's outbound transport.
//!
//! In production this wraps a WebSocket sink; the crate ships a
//! channel-backed implementation for tests and the demo binary. The
//! gateway only ever sees the trait: push, observe failure, unregister.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::PushMessage;
use crate::error::PulseError;

#[async_trait]
pub trait PushConnection: Send + Sync {
    /// Push one message to the client. `ConnectionClosed` tells the
    /// gateway to drop this handle; other handles are unaffected.
    async fn send(&self, message: &PushMessage) -> Result<(), PulseError>;
}

/// Channel-backed connection: pushes land in an mpsc receiver.
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<PushMessage>,
}

impl ChannelConnection {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PushMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PushConnection for ChannelConnection {
    async fn send(&self, message: &PushMessage) -> Result<(), PulseError> {
        self.tx
            .send(message.clone())
            .map_err(|_| PulseError::ConnectionClosed)
    }
}
