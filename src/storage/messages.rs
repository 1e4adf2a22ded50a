//! Message thread of the open conversation

use crate::api::{Attachment, Id, Message, OutgoingMessage, RemoteGateway, Session};
use crate::storage::{MutationState, StoreError};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Content sent to open a thread with someone new. The backend creates the
/// conversation on first message, so an empty-looking one is used.
const CONVERSATION_STARTER: &str = " ";

/// A message as shown in the thread
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntry {
    pub message: Message,

    /// `Pending` while an optimistic send is in flight
    pub state: MutationState,

    /// Correlation token of a locally sent message
    pub correlation: Option<Uuid>,
}

impl MessageEntry {
    fn confirmed(message: Message) -> Self {
        Self {
            message,
            state: MutationState::Confirmed,
            correlation: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn is_own(&self, self_id: &Id) -> bool {
        &self.message.sender.id == self_id
    }

    /// Text to render for the viewer `self_id`
    pub fn display_text(&self, self_id: &Id) -> &str {
        if !self.message.is_deleted {
            &self.message.content
        } else if self.is_own(self_id) {
            "You deleted this message"
        } else {
            "This message was deleted"
        }
    }
}

/// Result of a `load` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The snapshot replaced the thread; carries the message count
    Applied(usize),
    /// A newer load was issued meanwhile, the response was dropped
    Stale,
}

#[derive(Debug, Default)]
struct MessageState {
    conversation_id: Option<Id>,
    entries: Vec<MessageEntry>,
}

/// Per-conversation message list.
///
/// Loads are tagged with a monotonic sequence number and only the latest
/// issued load may apply its response. Sends are appended optimistically and
/// swapped for the server copy by correlation token.
pub struct MessageStore {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<Session>,
    state: RwLock<MessageState>,
    latest_load: AtomicU64,
    disposed: AtomicBool,
}

impl MessageStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>, session: Arc<Session>) -> Self {
        Self {
            gateway,
            session,
            state: RwLock::new(MessageState::default()),
            latest_load: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Replace the thread with the server's copy of `conversation_id`
    pub async fn load(&self, conversation_id: &Id) -> Result<LoadOutcome, StoreError> {
        self.ensure_live()?;

        // the sequence bump and the conversation switch happen under one lock
        let seq = {
            let mut state = self.state.write();
            let seq = self.latest_load.fetch_add(1, Ordering::SeqCst) + 1;
            if state.conversation_id.as_ref() != Some(conversation_id) {
                state.conversation_id = Some(conversation_id.clone());
                state.entries.clear();
            }
            seq
        };

        let result = self.gateway.list_messages(conversation_id).await;

        let mut state = self.state.write();
        if self.latest_load.load(Ordering::SeqCst) != seq {
            tracing::debug!(
                "Discarding stale message load #{} for conversation {}",
                seq,
                conversation_id
            );
            return Ok(LoadOutcome::Stale);
        }
        self.ensure_live()?;

        let mut messages = result.map_err(StoreError::fetch)?;
        for message in messages.iter_mut() {
            message.conversation_id = conversation_id.clone();
        }

        let pending: Vec<MessageEntry> = state
            .entries
            .drain(..)
            .filter(|e| e.is_pending())
            .collect();
        let count = messages.len();
        state.entries = messages
            .into_iter()
            .map(MessageEntry::confirmed)
            .chain(pending)
            .collect();
        sort_entries(&mut state.entries);

        tracing::debug!("Loaded {} messages for conversation {}", count, conversation_id);
        Ok(LoadOutcome::Applied(count))
    }

    /// Send a message, showing it in the thread before the server confirms.
    ///
    /// `conversation_id` is `None` when writing to someone without an
    /// existing thread.
    pub async fn send(
        &self,
        conversation_id: Option<&Id>,
        recipient_id: &Id,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, StoreError> {
        self.ensure_live()?;

        let content = content.trim();
        if content.is_empty() && attachment.is_none() {
            return Err(StoreError::Validation("message is empty".to_string()));
        }

        let me = self.session.user().ok_or(StoreError::AuthExpired)?;
        let token = Uuid::new_v4();

        {
            let mut state = self.state.write();
            if state.conversation_id.as_ref() == conversation_id {
                state.entries.push(MessageEntry {
                    message: Message {
                        id: Id::local(token),
                        conversation_id: conversation_id.cloned().unwrap_or_default(),
                        sender: me,
                        content: content.to_string(),
                        created_at: Utc::now(),
                        is_deleted: false,
                        is_read: true,
                    },
                    state: MutationState::Pending,
                    correlation: Some(token),
                });
                sort_entries(&mut state.entries);
            }
        }

        let result = self
            .gateway
            .send_message(OutgoingMessage {
                recipient_id: recipient_id.clone(),
                content: content.to_string(),
                attachment,
            })
            .await;

        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }

        let mut state = self.state.write();
        let position = state
            .entries
            .iter()
            .position(|e| e.correlation == Some(token));

        match result {
            Ok(sent) => {
                let mut message = sent.message;
                message.conversation_id = sent.conversation_id.clone();

                if let Some(position) = position {
                    if state.conversation_id.is_none() {
                        state.conversation_id = Some(sent.conversation_id.clone());
                    }
                    if state.entries.iter().any(|e| e.message.id == message.id) {
                        // a reload already brought the server copy in
                        state.entries.remove(position);
                    } else {
                        state.entries[position] = MessageEntry {
                            message: message.clone(),
                            state: MutationState::Confirmed,
                            correlation: Some(token),
                        };
                    }
                    sort_entries(&mut state.entries);
                }

                tracing::debug!(
                    "Message {} confirmed in conversation {}",
                    message.id,
                    message.conversation_id
                );
                Ok(message)
            }
            Err(err) => {
                if let Some(position) = position {
                    state.entries.remove(position);
                }
                tracing::warn!("Sending message failed, removed from thread: {}", err);
                Err(StoreError::mutation("send message", err))
            }
        }
    }

    /// Open a thread with `recipient_id` by sending the placeholder message.
    /// Returns the conversation the server created or reused.
    pub async fn start_conversation(&self, recipient_id: &Id) -> Result<Id, StoreError> {
        self.ensure_live()?;

        let sent = self
            .gateway
            .send_message(OutgoingMessage {
                recipient_id: recipient_id.clone(),
                content: CONVERSATION_STARTER.to_string(),
                attachment: None,
            })
            .await
            .map_err(|e| StoreError::mutation("start conversation", e))?;

        self.ensure_live()?;
        tracing::info!(
            "Started conversation {} with user {}",
            sent.conversation_id,
            recipient_id
        );
        Ok(sent.conversation_id)
    }

    /// Delete a message on the server, then reload the thread.
    ///
    /// Nothing is tombstoned locally; how a deleted message reads depends on
    /// the viewer and comes back with the reload.
    pub async fn delete(&self, message_id: &Id) -> Result<(), StoreError> {
        self.ensure_live()?;

        self.gateway
            .delete_message(message_id)
            .await
            .map_err(|e| StoreError::mutation("delete message", e))?;

        let conversation_id = self.state.read().conversation_id.clone();
        if let Some(conversation_id) = conversation_id {
            match self.load(&conversation_id).await {
                Ok(_) => {}
                Err(StoreError::Disposed) => return Err(StoreError::Disposed),
                Err(err) => {
                    tracing::warn!("Reload after deleting message {} failed: {}", message_id, err)
                }
            }
        }
        Ok(())
    }

    pub fn conversation_id(&self) -> Option<Id> {
        self.state.read().conversation_id.clone()
    }

    /// Thread in render order
    pub fn entries(&self) -> Vec<MessageEntry> {
        self.state.read().entries.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state
            .read()
            .entries
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Called when the conversation view closes
    pub fn close(&self) {
        self.dispose();
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), StoreError> {
        if self.is_disposed() {
            Err(StoreError::Disposed)
        } else {
            Ok(())
        }
    }
}

/// Oldest first, ties broken by id
fn sort_entries(entries: &mut [MessageEntry]) {
    entries.sort_by(|a, b| {
        a.message
            .created_at
            .cmp(&b.message.created_at)
            .then_with(|| a.message.id.cmp(&b.message.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn store_with(gateway: Arc<FakeGateway>) -> MessageStore {
        let session = Arc::new(Session::new(Some("token".into()), Some(alice())));
        MessageStore::new(gateway, session)
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store
            .entries()
            .iter()
            .map(|e| e.message.id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_load_sorts_out_of_order_response() {
        let gateway = Arc::new(FakeGateway::new(alice()).with_messages(
            "c1",
            vec![
                message("m3", "c1", bob(), "third", 3),
                message("m1", "c1", alice(), "first", 1),
                message("m2", "c1", bob(), "second", 2),
            ],
        ));
        let store = store_with(gateway);

        let outcome = store.load(&Id::from("c1")).await.unwrap();
        assert_eq!(outcome, LoadOutcome::Applied(3));
        assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_are_ordered_by_id() {
        let gateway = Arc::new(FakeGateway::new(alice()).with_messages(
            "c1",
            vec![
                message("12", "c1", bob(), "b", 5),
                message("9", "c1", bob(), "a", 5),
                message("3", "c1", bob(), "z", 1),
            ],
        ));
        let store = store_with(gateway);
        store.load(&Id::from("c1")).await.unwrap();

        assert_eq!(ids(&store), vec!["3", "9", "12"]);
    }

    #[tokio::test]
    async fn test_stale_load_is_discarded() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("A", vec![message("a1", "A", bob(), "from A", 1)])
                .with_messages("B", vec![message("b1", "B", carol(), "from B", 1)]),
        );
        let store = Arc::new(store_with(gateway.clone()));

        let release_a = gateway.gate("list_messages:A");
        let load_a = {
            let store = store.clone();
            tokio::spawn(async move { store.load(&Id::from("A")).await })
        };
        tokio::task::yield_now().await;

        let outcome_b = store.load(&Id::from("B")).await.unwrap();
        assert_eq!(outcome_b, LoadOutcome::Applied(1));

        // A's response arrives after B's
        release_a.send(()).unwrap();
        assert_eq!(load_a.await.unwrap().unwrap(), LoadOutcome::Stale);

        assert_eq!(store.conversation_id(), Some(Id::from("B")));
        assert_eq!(ids(&store), vec!["b1"]);
    }

    #[tokio::test]
    async fn test_stale_snapshot_does_not_fill_failed_newer_load() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("A", vec![message("a1", "A", bob(), "from A", 1)]),
        );
        let store = Arc::new(store_with(gateway.clone()));

        let release_a = gateway.gate("list_messages:A");
        let load_a = {
            let store = store.clone();
            tokio::spawn(async move { store.load(&Id::from("A")).await })
        };
        tokio::task::yield_now().await;

        // B fails while A's snapshot is still held back
        gateway.fail("list_messages");
        let err = store.load(&Id::from("B")).await.unwrap_err();
        assert!(matches!(err, StoreError::TransientFetch(_)));

        release_a.send(()).unwrap();
        assert_eq!(load_a.await.unwrap(), Ok(LoadOutcome::Stale));

        assert_eq!(store.conversation_id(), Some(Id::from("B")));
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_loads_never_mix_conversations() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("A", vec![message("a1", "A", bob(), "from A", 1)])
                .with_messages("B", vec![message("b1", "B", carol(), "from B", 1)]),
        );
        let store = Arc::new(store_with(gateway));

        for round in 0..50 {
            let tasks: Vec<_> = ["A", "B", "A", "B"]
                .into_iter()
                .map(|id| {
                    let store = store.clone();
                    tokio::spawn(async move { store.load(&Id::from(id)).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let current = store.conversation_id().unwrap();
            for entry in store.entries() {
                assert_eq!(entry.message.conversation_id, current, "round {}", round);
            }
        }
    }

    #[tokio::test]
    async fn test_reload_replaces_thread() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("c1", vec![message("m1", "c1", bob(), "hello", 1)]),
        );
        let store = store_with(gateway.clone());
        let c1 = Id::from("c1");
        store.load(&c1).await.unwrap();

        gateway.set_messages(
            "c1",
            vec![
                message("m1", "c1", bob(), "hello", 1),
                message("m4", "c1", bob(), "still there?", 9),
            ],
        );
        assert_eq!(store.load(&c1).await.unwrap(), LoadOutcome::Applied(2));
        assert_eq!(ids(&store), vec!["m1", "m4"]);
    }

    #[tokio::test]
    async fn test_send_rejects_blank_content_without_network() {
        let gateway = Arc::new(FakeGateway::new(alice()));
        let store = store_with(gateway.clone());

        for content in ["", "   ", "\n\t"] {
            let err = store.send(None, &bob().id, content, None).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }
        assert!(gateway.calls().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_blank_content_with_attachment_is_sent() {
        let gateway = Arc::new(FakeGateway::new(alice()));
        let store = store_with(gateway.clone());

        let attachment = Attachment {
            file_name: "cat.png".into(),
            content_type: "image/png".into(),
            data: vec![1, 2, 3],
        };
        store
            .send(None, &bob().id, " ", Some(attachment))
            .await
            .unwrap();
        assert_eq!(gateway.count_calls("send_message"), 1);
    }

    #[tokio::test]
    async fn test_send_to_new_conversation() {
        let gateway = Arc::new(FakeGateway::new(alice()));
        let store = Arc::new(store_with(gateway.clone()));

        let release = gateway.gate("send_message:2");
        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.send(None, &bob().id, "hi", None).await })
        };
        tokio::task::yield_now().await;

        // optimistic copy is visible while the request is held
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_pending());
        assert!(entries[0].message.id.is_local());
        assert_eq!(entries[0].message.sender, alice());
        assert_eq!(entries[0].message.content, "hi");

        release.send(()).unwrap();
        let sent = task.await.unwrap().unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.id, Id::from("42"));
        assert_eq!(entries[0].message.content, "hi");
        assert_eq!(entries[0].message.sender, alice());
        assert_eq!(entries[0].state, MutationState::Confirmed);
        assert_eq!(store.conversation_id(), Some(sent.conversation_id));
    }

    #[tokio::test]
    async fn test_first_message_scenario() {
        use crate::storage::ConversationStore;

        let gateway = Arc::new(FakeGateway::new(alice()));
        let session = Arc::new(Session::new(Some("token".into()), Some(alice())));
        let messages = MessageStore::new(gateway.clone(), session.clone());
        let conversations = ConversationStore::new(gateway.clone(), session);

        let sent = messages.send(None, &bob().id, "hi", None).await.unwrap();
        assert_eq!(sent.id, Id::from("42"));
        assert_eq!(sent.conversation_id, Id::from("c1"));

        let thread = messages.messages();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id, Id::from("42"));
        assert_eq!(thread[0].content, "hi");
        assert_eq!(thread[0].sender, alice());

        conversations.refresh().await.unwrap();
        let list = conversations.conversations();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, Id::from("c1"));
        assert_eq!(list[0].unread_count, 0);
        assert_eq!(list[0].last_message.as_ref().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_duplicate_content_is_matched_by_token() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_conversations(vec![conversation("c1", vec![alice(), bob()], 0)])
                .with_messages("c1", vec![]),
        );
        let store = store_with(gateway);
        let c1 = Id::from("c1");
        store.load(&c1).await.unwrap();

        store.send(Some(&c1), &bob().id, "same", None).await.unwrap();
        store.send(Some(&c1), &bob().id, "same", None).await.unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(ids(&store), vec!["42", "43"]);
        assert!(entries.iter().all(|e| !e.is_pending()));
    }

    #[tokio::test]
    async fn test_failed_send_is_rolled_back() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("c1", vec![message("m1", "c1", bob(), "hello", 1)]),
        );
        let store = store_with(gateway.clone());
        let c1 = Id::from("c1");
        store.load(&c1).await.unwrap();

        gateway.fail("send_message");
        let err = store.send(Some(&c1), &bob().id, "reply", None).await.unwrap_err();

        assert!(matches!(err, StoreError::MutationFailure { .. }));
        assert_eq!(ids(&store), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_pending_send_survives_reload() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("c1", vec![message("m1", "c1", bob(), "hello", 1)]),
        );
        let store = Arc::new(store_with(gateway.clone()));
        let c1 = Id::from("c1");
        store.load(&c1).await.unwrap();

        let release = gateway.gate("send_message:2");
        let task = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .send(Some(&Id::from("c1")), &Id::from("2"), "reply", None)
                    .await
            })
        };
        tokio::task::yield_now().await;

        store.load(&c1).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.entries()[1].is_pending());

        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(ids(&store), vec!["m1", "42"]);
    }

    #[tokio::test]
    async fn test_delete_reloads_thread() {
        let gateway = Arc::new(FakeGateway::new(alice()).with_messages(
            "c1",
            vec![
                message("m1", "c1", alice(), "oops", 1),
                message("m2", "c1", bob(), "hm?", 2),
            ],
        ));
        let store = store_with(gateway.clone());
        store.load(&Id::from("c1")).await.unwrap();

        store.delete(&Id::from("m1")).await.unwrap();

        assert_eq!(gateway.count_calls("list_messages:c1"), 2);
        let entries = store.entries();
        assert_eq!(ids(&store), vec!["m1", "m2"]);
        assert!(entries[0].message.is_deleted);
        assert_eq!(entries[0].display_text(&alice().id), "You deleted this message");
        assert_eq!(entries[0].display_text(&bob().id), "This message was deleted");
        assert_eq!(entries[1].display_text(&alice().id), "hm?");
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_thread_untouched() {
        let gateway = Arc::new(
            FakeGateway::new(alice())
                .with_messages("c1", vec![message("m1", "c1", alice(), "keep", 1)]),
        );
        let store = store_with(gateway.clone());
        store.load(&Id::from("c1")).await.unwrap();

        gateway.fail("delete_message");
        assert!(store.delete(&Id::from("m1")).await.is_err());
        assert_eq!(gateway.count_calls("list_messages"), 1);
        assert!(!store.entries()[0].message.is_deleted);
    }

    #[tokio::test]
    async fn test_start_conversation_returns_conversation_id() {
        let gateway = Arc::new(FakeGateway::new(alice()));
        let store = store_with(gateway.clone());

        let conversation_id = store.start_conversation(&bob().id).await.unwrap();
        assert_eq!(conversation_id, Id::from("c1"));
        // the placeholder is not shown as an optimistic entry
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_work() {
        let gateway = Arc::new(FakeGateway::new(alice()));
        let store = store_with(gateway.clone());
        store.close();

        assert_eq!(store.load(&Id::from("c1")).await, Err(StoreError::Disposed));
        assert!(gateway.calls().is_empty());
    }
}
