//! Scripted in-memory gateway for store tests

use crate::api::{
    ApiError, Conversation, Id, Message, MessageSummary, Notification, NotificationFeed,
    NotificationType, OutgoingMessage, RemoteGateway, SentMessage, User,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub fn alice() -> User {
    User::new(1u64, "alice")
}

pub fn bob() -> User {
    User::new(2u64, "bob")
}

pub fn carol() -> User {
    User::new(3u64, "carol")
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn conversation(id: &str, participants: Vec<User>, unread: u32) -> Conversation {
    Conversation {
        id: Id::from(id),
        participants,
        last_message: None,
        unread_count: unread,
        updated_at: None,
    }
}

pub fn message(id: &str, conversation_id: &str, sender: User, content: &str, secs: i64) -> Message {
    Message {
        id: Id::from(id),
        conversation_id: Id::from(conversation_id),
        sender,
        content: content.to_string(),
        created_at: at(secs),
        is_deleted: false,
        is_read: false,
    }
}

pub fn notification(id: &str, kind: NotificationType, is_read: bool) -> Notification {
    Notification {
        id: Id::from(id),
        notification_type: kind,
        sender: bob(),
        object_id: None,
        text: format!("{:?} from bob", kind),
        is_read,
        created_at: at(0),
    }
}

/// Local HTTP server that rejects every request with `401 Unauthorized`
pub async fn unauthorized_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 401 Unauthorized\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{}",
                    )
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Gateway double that serves canned data, records every call and can fail
/// or hold individual operations
pub struct FakeGateway {
    me: User,
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<HashMap<Id, Vec<Message>>>,
    feed: Mutex<NotificationFeed>,
    failing: Mutex<HashSet<&'static str>>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    calls: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl FakeGateway {
    pub fn new(me: User) -> Self {
        Self {
            me,
            conversations: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            feed: Mutex::new(NotificationFeed {
                notifications: Vec::new(),
                unread_count: 0,
            }),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(42),
        }
    }

    pub fn with_conversations(self, conversations: Vec<Conversation>) -> Self {
        *self.conversations.lock() = conversations;
        self
    }

    pub fn with_messages(self, conversation_id: &str, messages: Vec<Message>) -> Self {
        self.messages
            .lock()
            .insert(Id::from(conversation_id), messages);
        self
    }

    pub fn with_notifications(self, notifications: Vec<Notification>) -> Self {
        let unread_count = notifications.iter().filter(|n| !n.is_read).count() as u32;
        *self.feed.lock() = NotificationFeed {
            notifications,
            unread_count,
        };
        self
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock() = conversations;
    }

    pub fn set_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        self.messages
            .lock()
            .insert(Id::from(conversation_id), messages);
    }

    /// Make every call of `operation` fail with a server error
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().remove(operation);
    }

    /// Hold the next call tagged `key` until the returned sender fires
    pub fn gate(&self, key: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(key.to_string(), rx);
        tx
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    async fn enter(&self, operation: &'static str, call: String) -> Result<(), ApiError> {
        self.calls.lock().push(call.clone());

        let gate = self.gates.lock().remove(&call);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.failing.lock().contains(operation) {
            return Err(ApiError::Status {
                status: 500,
                body: format!("{} failed", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn current_user(&self) -> Result<User, ApiError> {
        self.enter("current_user", "current_user".to_string()).await?;
        Ok(self.me.clone())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.enter("list_conversations", "list_conversations".to_string())
            .await?;
        Ok(self.conversations.lock().clone())
    }

    async fn delete_conversation(&self, id: &Id) -> Result<(), ApiError> {
        self.enter("delete_conversation", format!("delete_conversation:{}", id))
            .await?;
        self.conversations.lock().retain(|c| &c.id != id);
        Ok(())
    }

    async fn mark_conversation_read(&self, id: &Id) -> Result<(), ApiError> {
        self.enter("mark_conversation_read", format!("mark_conversation_read:{}", id))
            .await?;
        if let Some(c) = self.conversations.lock().iter_mut().find(|c| &c.id == id) {
            c.unread_count = 0;
        }
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &Id) -> Result<Vec<Message>, ApiError> {
        // snapshot taken at request time, like a real server response
        let snapshot = self
            .messages
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        self.enter("list_messages", format!("list_messages:{}", conversation_id))
            .await?;
        Ok(snapshot)
    }

    async fn send_message(&self, outgoing: OutgoingMessage) -> Result<SentMessage, ApiError> {
        self.enter("send_message", format!("send_message:{}", outgoing.recipient_id))
            .await?;

        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };

        let mut conversations = self.conversations.lock();
        let conversation_id = match conversations
            .iter()
            .find(|c| c.has_participant(&outgoing.recipient_id))
        {
            Some(c) => c.id.clone(),
            None => {
                let conversation_id = Id::new(format!("c{}", conversations.len() + 1));
                conversations.push(Conversation {
                    id: conversation_id.clone(),
                    participants: vec![self.me.clone(), User::new(outgoing.recipient_id.clone(), "recipient")],
                    last_message: None,
                    unread_count: 0,
                    updated_at: None,
                });
                conversation_id
            }
        };

        let message = Message {
            id: Id::from(id),
            conversation_id: conversation_id.clone(),
            sender: self.me.clone(),
            content: outgoing.content.clone(),
            created_at: Utc::now(),
            is_deleted: false,
            is_read: false,
        };

        if let Some(c) = conversations.iter_mut().find(|c| c.id == conversation_id) {
            c.last_message = Some(MessageSummary {
                id: Some(message.id.clone()),
                content: message.content.clone(),
                sender: Some(self.me.clone()),
                created_at: Some(message.created_at),
                is_deleted: false,
            });
        }
        self.messages
            .lock()
            .entry(conversation_id.clone())
            .or_default()
            .push(message.clone());

        Ok(SentMessage {
            conversation_id,
            message,
        })
    }

    async fn delete_message(&self, id: &Id) -> Result<(), ApiError> {
        self.enter("delete_message", format!("delete_message:{}", id))
            .await?;
        for messages in self.messages.lock().values_mut() {
            if let Some(m) = messages.iter_mut().find(|m| &m.id == id) {
                m.is_deleted = true;
                m.content.clear();
            }
        }
        Ok(())
    }

    async fn list_notifications(&self) -> Result<NotificationFeed, ApiError> {
        self.enter("list_notifications", "list_notifications".to_string())
            .await?;
        Ok(self.feed.lock().clone())
    }

    async fn mark_notification_read(&self, id: &Id) -> Result<(), ApiError> {
        self.enter("mark_notification_read", format!("mark_notification_read:{}", id))
            .await?;
        let mut guard = self.feed.lock();
        let feed = &mut *guard;
        if let Some(n) = feed.notifications.iter_mut().find(|n| &n.id == id) {
            if !n.is_read {
                n.is_read = true;
                feed.unread_count = feed.unread_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.enter("mark_all_notifications_read", "mark_all_notifications_read".to_string())
            .await?;
        let mut feed = self.feed.lock();
        for n in feed.notifications.iter_mut() {
            n.is_read = true;
        }
        feed.unread_count = 0;
        Ok(())
    }
}
