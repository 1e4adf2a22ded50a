//! REST API integration: wire models, session context and the gateway

pub mod client;
pub mod models;
pub mod session;

pub use client::HttpGateway;
pub use models::{
    Attachment, Conversation, Id, Message, MessageSummary, Notification, NotificationFeed,
    NotificationType, OutgoingMessage, SentMessage, User,
};
pub use session::{Session, SessionState};

use async_trait::async_trait;
use thiserror::Error;

/// Gateway-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Whether the session behind the request is no longer valid
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::InvalidRequest(err.to_string())
    }
}

/// Operations the sync engine consumes from the backend.
///
/// Implementations are shared by every store and must tolerate concurrent
/// calls; the backend is the single source of truth.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Profile of the signed-in user
    async fn current_user(&self) -> Result<User, ApiError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn delete_conversation(&self, id: &Id) -> Result<(), ApiError>;

    async fn mark_conversation_read(&self, id: &Id) -> Result<(), ApiError>;

    async fn list_messages(&self, conversation_id: &Id) -> Result<Vec<Message>, ApiError>;

    async fn send_message(&self, message: OutgoingMessage) -> Result<SentMessage, ApiError>;

    async fn delete_message(&self, id: &Id) -> Result<(), ApiError>;

    async fn list_notifications(&self) -> Result<NotificationFeed, ApiError>;

    async fn mark_notification_read(&self, id: &Id) -> Result<(), ApiError>;

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;
}
