//! SessionAuth port - the auth collaborator's boundary.
//!
//! The gateway validates the handshake token here before registering a
//! connection. Token issuance and session lifecycle live entirely on the
//! collaborator's side.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::UserId;
use crate::error::PulseError;

#[async_trait]
pub trait SessionAuth: Send + Sync {
    /// Resolve a session token to its user, or `Unauthorized`.
    async fn validate_session_token(&self, token: &str) -> Result<UserId, PulseError>;
}

/// Token-table auth for tests and the demo binary.
#[derive(Default)]
pub struct StaticTokenAuth {
    tokens: Mutex<HashMap<String, UserId>>,
}

impl StaticTokenAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens
            .lock()
            .expect("token table lock poisoned")
            .insert(token.into(), user_id);
    }
}

#[async_trait]
impl SessionAuth for StaticTokenAuth {
    async fn validate_session_token(&self, token: &str) -> Result<UserId, PulseError> {
        self.tokens
            .lock()
            .expect("token table lock poisoned")
            .get(token)
            .copied()
            .ok_or(PulseError::Unauthorized)
    }
}
