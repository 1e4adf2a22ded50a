//! Signed-in session context shared by the gateway and every store

use crate::api::models::{Id, User};
use parking_lot::RwLock;
use tokio::sync::watch;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Token present and accepted so far
    Active,
    /// The backend rejected the token
    Expired,
    /// The user signed out
    LoggedOut,
}

/// Credentials and identity of the signed-in user.
///
/// Created at application start and passed by `Arc` to whoever needs it.
/// Expiry is broadcast so the owner can tear down polling.
pub struct Session {
    token: RwLock<Option<String>>,
    user: RwLock<Option<User>>,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(token: Option<String>, user: Option<User>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Active);
        Self {
            token: RwLock::new(token),
            user: RwLock::new(user),
            state_tx,
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn user_id(&self) -> Option<Id> {
        self.user.read().as_ref().map(|u| u.id.clone())
    }

    pub fn set_user(&self, user: User) {
        tracing::info!("Signed in as {}", user.username);
        *self.user.write() = Some(user);
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Watch for expiry or logout
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Drop the token after the backend rejected it
    pub fn expire(&self) {
        if self.state() != SessionState::Active {
            return;
        }
        tracing::warn!("Session expired, dropping credentials");
        *self.token.write() = None;
        self.state_tx.send_replace(SessionState::Expired);
    }

    pub fn logout(&self) {
        tracing::info!("Logging out");
        *self.token.write() = None;
        *self.user.write() = None;
        self.state_tx.send_replace(SessionState::LoggedOut);
    }
}
