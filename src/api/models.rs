//! Wire models exchanged with the REST API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Opaque entity identifier.
///
/// The backend hands out integer keys while locally synthesized entities
/// use prefixed strings, so both forms are accepted on the wire. Numeric ids
/// order numerically and sort before any non-numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Id(String);

impl Id {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Temporary id for an entity that only exists on this client
    pub fn local(token: uuid::Uuid) -> Self {
        Self(format!("local-{}", token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }

    fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.numeric() {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Id(n.to_string()),
            RawId::Text(s) => Id(s),
        })
    }
}

/// A user account as embedded in conversations, messages and notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,

    pub username: String,

    #[serde(default)]
    pub profile_picture: Option<String>,
}

impl User {
    pub fn new(id: impl Into<Id>, username: &str) -> Self {
        Self {
            id: id.into(),
            username: username.to_string(),
            profile_picture: None,
        }
    }
}

/// Preview of the latest message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    #[serde(default)]
    pub id: Option<Id>,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub sender: Option<User>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_deleted: bool,
}

/// A one-to-one conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable conversation id
    pub id: Id,

    /// Both participants, the signed-in user included
    #[serde(default)]
    pub participants: Vec<User>,

    /// Latest message preview
    #[serde(default)]
    pub last_message: Option<MessageSummary>,

    /// Messages from the other participant not yet read
    #[serde(default)]
    pub unread_count: u32,

    /// Last server-side activity
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &Id) -> bool {
        self.participants.iter().any(|p| &p.id == user_id)
    }
}

/// A direct message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, or a `local-` id while the send is in flight
    pub id: Id,

    /// Owning conversation
    #[serde(default, alias = "conversation")]
    pub conversation_id: Id,

    pub sender: User,

    /// Text body. May be blank for conversation starters and is always
    /// blank once the message is deleted.
    #[serde(default)]
    pub content: String,

    pub created_at: DateTime<Utc>,

    /// Tombstone flag; the message keeps its place in the thread
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(default)]
    pub is_read: bool,
}

/// Kind of activity a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Message,
    Mention,
    #[serde(other)]
    Other,
}

/// An activity notification addressed to the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Id,

    pub notification_type: NotificationType,

    /// User whose action produced the notification
    pub sender: User,

    /// Post id for likes, comments and mentions
    #[serde(default)]
    pub object_id: Option<Id>,

    /// Human readable summary
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub is_read: bool,

    pub created_at: DateTime<Utc>,
}

/// Response of the notification list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationFeed {
    #[serde(default)]
    pub notifications: Vec<Notification>,

    /// Unread total across all notifications, not only the returned page
    #[serde(default)]
    pub unread_count: u32,
}

/// A file sent alongside a message
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Outgoing direct message request
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub recipient_id: Id,
    pub content: String,
    pub attachment: Option<Attachment>,
}

/// Response of the send endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    pub conversation_id: Id,
    pub message: Message,
}
