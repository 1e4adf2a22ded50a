//! Conversation list and unread counters

use crate::api::{Conversation, Id, RemoteGateway, Session, User};
use crate::storage::{MutationState, StoreError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Conversation paired with the participant that is not the signed-in user
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationView {
    pub conversation: Conversation,

    /// `None` when the participant list is malformed; render a fallback
    pub other: Option<User>,
}

/// Participant of `conversation` whose id differs from `self_id`.
///
/// Returns `None` for conversations with no participants or only the
/// signed-in user.
pub fn select_other_participant<'a>(conversation: &'a Conversation, self_id: &Id) -> Option<&'a User> {
    conversation.participants.iter().find(|p| &p.id != self_id)
}

/// A delete that has been applied locally but not yet answered
#[derive(Debug, Clone)]
struct PendingDelete {
    /// Position the conversation held when it was removed
    index: usize,
    conversation: Conversation,
}

#[derive(Debug, Default)]
struct ConversationState {
    conversations: Vec<Conversation>,
    pending_deletes: HashMap<Id, PendingDelete>,
    pending_reads: HashSet<Id>,
}

/// Authoritative client-side view of the conversation list.
///
/// Refreshes replace the list wholesale. Conversations with a delete in
/// flight stay hidden, conversations with a mark-read in flight keep a zero
/// unread count until the request settles.
pub struct ConversationStore {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<Session>,
    state: RwLock<ConversationState>,
    disposed: AtomicBool,
}

impl ConversationStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>, session: Arc<Session>) -> Self {
        Self {
            gateway,
            session,
            state: RwLock::new(ConversationState::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Fetch the full list and replace local state
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        self.ensure_live()?;

        let snapshot = self
            .gateway
            .list_conversations()
            .await
            .map_err(StoreError::fetch)?;

        self.ensure_live()?;

        let mut state = self.state.write();
        let mut conversations: Vec<Conversation> = snapshot
            .into_iter()
            .filter(|c| !state.pending_deletes.contains_key(&c.id))
            .collect();
        for conversation in conversations.iter_mut() {
            if state.pending_reads.contains(&conversation.id) {
                conversation.unread_count = 0;
            }
        }

        tracing::debug!(
            "Conversation list refreshed: {} conversations, {} pending deletes",
            conversations.len(),
            state.pending_deletes.len()
        );

        state.conversations = conversations;
        Ok(state.conversations.len())
    }

    /// Remove a conversation immediately and delete it on the server.
    ///
    /// On failure the conversation is put back where it was.
    pub async fn delete(&self, id: &Id) -> Result<(), StoreError> {
        self.ensure_live()?;

        {
            let mut state = self.state.write();
            if let Some(index) = state.conversations.iter().position(|c| &c.id == id) {
                let conversation = state.conversations.remove(index);
                state
                    .pending_deletes
                    .insert(id.clone(), PendingDelete { index, conversation });
            }
        }

        let result = self.gateway.delete_conversation(id).await;
        let outcome = MutationState::settle(&result);

        let mut state = self.state.write();
        let pending = state.pending_deletes.remove(id);
        tracing::debug!("Delete of conversation {} settled: {:?}", id, outcome);

        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }

        match result {
            Ok(()) => {
                tracing::info!("Deleted conversation {}", id);
                Ok(())
            }
            Err(err) => {
                if let Some(pending) = pending {
                    if !state.conversations.iter().any(|c| &c.id == id) {
                        let index = pending.index.min(state.conversations.len());
                        state.conversations.insert(index, pending.conversation);
                    }
                    tracing::warn!("Deleting conversation {} failed, restored: {}", id, err);
                }
                Err(StoreError::mutation("delete conversation", err))
            }
        }
    }

    /// Reset the unread counter and tell the server the thread was read
    pub async fn mark_read(&self, id: &Id) -> Result<(), StoreError> {
        self.ensure_live()?;

        let previous = {
            let mut state = self.state.write();
            let previous = state
                .conversations
                .iter_mut()
                .find(|c| &c.id == id)
                .map(|c| std::mem::replace(&mut c.unread_count, 0));
            state.pending_reads.insert(id.clone());
            previous
        };

        let result = self.gateway.mark_conversation_read(id).await;

        let mut state = self.state.write();
        state.pending_reads.remove(id);

        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }

        if let Err(err) = result {
            if let Some(previous) = previous {
                if let Some(c) = state.conversations.iter_mut().find(|c| &c.id == id) {
                    if c.unread_count == 0 {
                        c.unread_count = previous;
                    }
                }
            }
            tracing::warn!("Marking conversation {} read failed: {}", id, err);
            return Err(StoreError::mutation("mark conversation read", err));
        }

        Ok(())
    }

    /// Sum of unread counters, drives the messages badge
    pub fn total_unread(&self) -> u32 {
        self.state
            .read()
            .conversations
            .iter()
            .fold(0u32, |sum, c| sum.saturating_add(c.unread_count))
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.read().conversations.clone()
    }

    /// Conversations with their other participant resolved
    pub fn views(&self) -> Vec<ConversationView> {
        let self_id = self.session.user_id().unwrap_or_default();
        self.state
            .read()
            .conversations
            .iter()
            .map(|c| ConversationView {
                other: select_other_participant(c, &self_id).cloned(),
                conversation: c.clone(),
            })
            .collect()
    }

    pub fn get(&self, id: &Id) -> Option<Conversation> {
        self.state
            .read()
            .conversations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    /// Existing conversation with `user_id`, if any
    pub fn find_with(&self, user_id: &Id) -> Option<Conversation> {
        self.state
            .read()
            .conversations
            .iter()
            .find(|c| c.has_participant(user_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop applying async results
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
