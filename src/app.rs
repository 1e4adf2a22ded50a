//! Main application state and logic

use crate::api::{
    Attachment, Id, Message, Notification, RemoteGateway, Session, SessionState,
};
use crate::services::{PollScheduler, ServiceManager, SyncService};
use crate::storage::conversations::select_other_participant;
use crate::storage::suggestions::DEFAULT_SUGGESTIONS;
use crate::storage::{
    ConversationStore, ConversationView, LocalStore, MessageStore, NotificationStore,
    NotificationTarget, Settings, StoreError, SuggestionStateCache, SuggestionView,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Composition root of the sync engine.
///
/// Owns the session, the long-lived stores and the scheduler, and holds at
/// most one [`MessageStore`] for the conversation currently open.
pub struct SyncApp {
    session: Arc<Session>,
    gateway: Arc<dyn RemoteGateway>,
    settings: Settings,
    services: ServiceManager,
    sync: SyncService,
    conversations: Arc<ConversationStore>,
    notifications: Arc<NotificationStore>,
    suggestions: Arc<SuggestionStateCache>,

    /// Thread of the open conversation
    open: RwLock<Option<Arc<MessageStore>>>,

    /// Followed suggestion cards hidden after the dismissal delay
    dismissed: Arc<RwLock<HashSet<String>>>,

    /// Pending dismissal timer per suggestion key
    dismiss_timers: Mutex<HashMap<String, JoinHandle<()>>>,

    /// Tears polling down when the session ends
    session_watch: Mutex<Option<JoinHandle<()>>>,
}

impl SyncApp {
    pub fn new(
        session: Arc<Session>,
        gateway: Arc<dyn RemoteGateway>,
        local: Arc<dyn LocalStore>,
        settings: Settings,
    ) -> Self {
        let services = ServiceManager::new();
        let conversations = Arc::new(ConversationStore::new(gateway.clone(), session.clone()));
        let notifications = Arc::new(NotificationStore::new(gateway.clone()));
        let sync = SyncService::new(
            services.scheduler(),
            conversations.clone(),
            notifications.clone(),
            settings.polling.clone(),
        );

        Self {
            session,
            gateway,
            settings,
            services,
            sync,
            conversations,
            notifications,
            suggestions: Arc::new(SuggestionStateCache::new(local)),
            open: RwLock::new(None),
            dismissed: Arc::new(RwLock::new(HashSet::new())),
            dismiss_timers: Mutex::new(HashMap::new()),
            session_watch: Mutex::new(None),
        }
    }

    /// Start polling and watch the session for expiry
    pub fn start(&self) {
        let mut state_rx = self.session.subscribe();
        let state = *state_rx.borrow_and_update();
        if state != SessionState::Active {
            tracing::warn!("Session {:?}, not starting polls", state);
            return;
        }

        self.sync.start();

        let scheduler = self.services.scheduler();
        let handle = tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                if state != SessionState::Active {
                    tracing::warn!("Session {:?}, stopping all polls", state);
                    scheduler.cancel_all();
                    break;
                }
            }
        });

        if let Some(previous) = self.session_watch.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn scheduler(&self) -> Arc<PollScheduler> {
        self.services.scheduler()
    }

    pub fn conversation_store(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn notification_store(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    /// Conversation list with the other participant resolved
    pub fn conversations(&self) -> Vec<ConversationView> {
        self.conversations.views()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.notifications()
    }

    /// Badge count for the messages tab
    pub fn unread_messages(&self) -> u32 {
        self.conversations.total_unread()
    }

    /// Badge count for the notifications tab
    pub fn unread_notifications(&self) -> u32 {
        self.notifications.unread_count()
    }

    /// Refresh both polled stores right away
    pub async fn request_sync(&self) -> anyhow::Result<()> {
        self.sync.request_sync().await
    }

    // Messaging

    /// Thread of the open conversation, if any
    pub fn open_messages(&self) -> Option<Arc<MessageStore>> {
        self.open.read().clone()
    }

    /// Open `conversation_id`, closing whatever was open before
    pub async fn open_conversation(
        &self,
        conversation_id: &Id,
    ) -> Result<Arc<MessageStore>, StoreError> {
        let store = self.replace_open_store();
        store.load(conversation_id).await?;

        let unread = self
            .conversations
            .get(conversation_id)
            .map_or(0, |c| c.unread_count);
        if unread > 0 {
            if let Err(e) = self.conversations.mark_read(conversation_id).await {
                tracing::warn!("Could not mark conversation {} read: {}", conversation_id, e);
            }
        }

        tracing::info!("Opened conversation {}", conversation_id);
        Ok(store)
    }

    /// Open the thread with `user_id`, creating it server-side if needed
    pub async fn open_conversation_with(
        &self,
        user_id: &Id,
    ) -> Result<Arc<MessageStore>, StoreError> {
        if self.session.user_id().as_ref() == Some(user_id) {
            return Err(StoreError::Validation(
                "cannot start a conversation with yourself".to_string(),
            ));
        }

        if let Some(existing) = self.conversations.find_with(user_id) {
            return self.open_conversation(&existing.id).await;
        }

        let starter = MessageStore::new(self.gateway.clone(), self.session.clone());
        let conversation_id = starter.start_conversation(user_id).await?;

        if let Err(e) = self.conversations.refresh().await {
            tracing::warn!("Conversation list refresh after start failed: {}", e);
        }
        self.open_conversation(&conversation_id).await
    }

    /// Close the open thread; late responses for it are dropped
    pub fn close_conversation(&self) {
        if let Some(store) = self.open.write().take() {
            store.close();
            tracing::debug!("Closed conversation {:?}", store.conversation_id());
        }
    }

    /// Send `content` to the other participant of the open conversation
    pub async fn send_message(
        &self,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, StoreError> {
        let store = self
            .open_messages()
            .ok_or_else(|| StoreError::Validation("no conversation is open".to_string()))?;
        let conversation_id = store
            .conversation_id()
            .ok_or_else(|| StoreError::Validation("no conversation is open".to_string()))?;

        let self_id = self.session.user_id().ok_or(StoreError::AuthExpired)?;
        let recipient = self
            .conversations
            .get(&conversation_id)
            .and_then(|c| select_other_participant(&c, &self_id).map(|u| u.id.clone()))
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "conversation {} has no other participant",
                    conversation_id
                ))
            })?;

        let message = store
            .send(Some(&conversation_id), &recipient, content, attachment)
            .await?;

        if let Err(e) = self.conversations.refresh().await {
            tracing::debug!("Conversation list refresh after send failed: {}", e);
        }
        Ok(message)
    }

    /// Delete a message in the open conversation
    pub async fn delete_message(&self, message_id: &Id) -> Result<(), StoreError> {
        let store = self
            .open_messages()
            .ok_or_else(|| StoreError::Validation("no conversation is open".to_string()))?;
        store.delete(message_id).await
    }

    /// Delete a conversation, closing it first when it is open
    pub async fn delete_conversation(&self, conversation_id: &Id) -> Result<(), StoreError> {
        let is_open = self
            .open_messages()
            .and_then(|store| store.conversation_id())
            .is_some_and(|id| &id == conversation_id);
        if is_open {
            self.close_conversation();
        }

        self.conversations.delete(conversation_id).await
    }

    // Notifications

    pub async fn mark_notification_read(&self, id: &Id) -> Result<bool, StoreError> {
        self.notifications.mark_read(id).await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<usize, StoreError> {
        self.notifications.mark_all_read().await
    }

    /// Navigation target for a selected notification
    pub fn notification_target(&self, notification: &Notification) -> NotificationTarget {
        self.notifications.route(notification)
    }

    // Suggestions

    /// Suggested accounts still shown in the sidebar
    pub fn suggestions(&self) -> Vec<SuggestionView> {
        let dismissed = self.dismissed.read();
        self.suggestions
            .views(&DEFAULT_SUGGESTIONS)
            .into_iter()
            .filter(|view| !dismissed.contains(view.card.key))
            .collect()
    }

    /// Follow or unfollow a suggested account. A followed card is dismissed
    /// after the configured delay unless it was unfollowed meanwhile.
    pub fn toggle_suggestion(&self, key: &str) -> Result<bool, StoreError> {
        let following = self.suggestions.toggle(key)?;

        let mut timers = self.dismiss_timers.lock();
        if let Some(previous) = timers.remove(key) {
            previous.abort();
        }

        if following {
            let cache = self.suggestions.clone();
            let dismissed = self.dismissed.clone();
            let delay = self.settings.suggestions.dismiss_delay();
            let timer_key = key.to_string();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if cache.is_following(&timer_key) {
                    tracing::debug!("Dismissing suggestion {}", timer_key);
                    dismissed.write().insert(timer_key);
                }
            });
            timers.insert(key.to_string(), timer);
        } else {
            self.dismissed.write().remove(key);
        }

        Ok(following)
    }

    // Lifecycle

    /// Wait for Ctrl-C or [`shutdown`](Self::shutdown)
    pub async fn run_until_shutdown(&self) -> anyhow::Result<()> {
        self.services.run_until_shutdown().await
    }

    /// Stop polling and dispose every store
    pub async fn shutdown(&self) {
        if let Some(watch) = self.session_watch.lock().take() {
            watch.abort();
        }
        for (_, timer) in self.dismiss_timers.lock().drain() {
            timer.abort();
        }
        self.services.shutdown().await;
        self.close_conversation();
        self.conversations.dispose();
        self.notifications.dispose();
        tracing::info!("Sync engine stopped");
    }

    /// Replace the open thread with a fresh store
    fn replace_open_store(&self) -> Arc<MessageStore> {
        let store = Arc::new(MessageStore::new(self.gateway.clone(), self.session.clone()));
        if let Some(previous) = self.open.write().replace(store.clone()) {
            previous.close();
        }
        store
    }
}
