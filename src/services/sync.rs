//! Sync service keeping the conversation list and notification feed fresh

use crate::services::poller::{task, PollOptions, PollScheduler};
use crate::storage::settings::PollingSettings;
use crate::storage::{ConversationStore, NotificationStore};
use std::sync::Arc;
use tokio::time::Duration;

/// Poll key of the conversation list refresh
pub const CONVERSATIONS_POLL: &str = "conversations";

/// Poll key of the notification feed refresh
pub const NOTIFICATIONS_POLL: &str = "notifications";

/// Registers the periodic refreshes of the long-lived stores
pub struct SyncService {
    scheduler: Arc<PollScheduler>,
    conversations: Arc<ConversationStore>,
    notifications: Arc<NotificationStore>,
    settings: PollingSettings,
}

impl SyncService {
    pub fn new(
        scheduler: Arc<PollScheduler>,
        conversations: Arc<ConversationStore>,
        notifications: Arc<NotificationStore>,
        settings: PollingSettings,
    ) -> Self {
        Self {
            scheduler,
            conversations,
            notifications,
            settings,
        }
    }

    fn options(&self, secs: u64) -> PollOptions {
        PollOptions::every(Duration::from_secs(secs))
            .with_jitter(Duration::from_millis(self.settings.jitter_ms))
            .with_max_backoff(Duration::from_secs(self.settings.max_backoff_secs))
    }

    /// Start both polls; each fires once right away
    pub fn start(&self) {
        tracing::info!("Starting sync service");

        let conversations = self.conversations.clone();
        self.scheduler.schedule_with(
            CONVERSATIONS_POLL,
            self.options(self.settings.conversations_secs),
            task(move || {
                let store = conversations.clone();
                async move {
                    store.refresh().await?;
                    Ok(())
                }
            }),
        );

        let notifications = self.notifications.clone();
        self.scheduler.schedule_with(
            NOTIFICATIONS_POLL,
            self.options(self.settings.notifications_secs),
            task(move || {
                let store = notifications.clone();
                async move {
                    store.refresh().await?;
                    Ok(())
                }
            }),
        );
    }

    /// Refresh both stores now, outside the schedule
    pub async fn request_sync(&self) -> anyhow::Result<()> {
        tracing::info!("Immediate sync requested");

        let (conversations, notifications) =
            tokio::join!(self.conversations.refresh(), self.notifications.refresh());
        conversations?;
        notifications?;
        Ok(())
    }

    /// Stop both polls
    pub fn stop(&self) {
        self.scheduler.cancel(CONVERSATIONS_POLL);
        self.scheduler.cancel(NOTIFICATIONS_POLL);
        tracing::info!("Sync service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_scheduled(CONVERSATIONS_POLL)
            && self.scheduler.is_scheduled(NOTIFICATIONS_POLL)
    }
}
