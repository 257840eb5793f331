//! Session/auth store
//!
//! Holds the signed-in identity and its bearer token. Setting or clearing the
//! session is the only thing that connects or disconnects the live socket.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::User;
use crate::sync::{ConnectionManager, ConnectionStatus};

/// Signed-in identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Current session, wired to the connection manager
#[derive(Clone)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Session>>>,
    connection: ConnectionManager,
}

impl SessionStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            connection,
        }
    }

    /// Replace the session and connect for it
    pub fn set_session(&self, session: Session) {
        info!("Session set for user {}", session.user.id);
        self.connection.connect(&session);
        *self.write() = Some(session);
    }

    /// Forget the session and disconnect
    ///
    /// Returns the session that was cleared, if any.
    pub fn clear_session(&self) -> Option<Session> {
        self.connection.disconnect();
        let previous = self.write().take();
        if let Some(session) = &previous {
            info!("Session cleared for user {}", session.user.id);
        }
        previous
    }

    pub fn current(&self) -> Option<Session> {
        self.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read().as_ref().map(|s| s.user.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        self.current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
