//! Notification feed and its unread counter

use crate::api::{Id, Notification, NotificationType, RemoteGateway};
use crate::storage::{MutationState, StoreError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where selecting a notification should take the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    /// Post detail page
    Post(Id),
    /// Profile page, by username
    Profile(String),
    /// Messages screen
    Messages,
}

impl NotificationTarget {
    /// Navigation target for a notification
    pub fn for_notification(notification: &Notification) -> Self {
        let profile = || NotificationTarget::Profile(notification.sender.username.clone());

        match notification.notification_type {
            NotificationType::Like | NotificationType::Comment | NotificationType::Mention => {
                match &notification.object_id {
                    Some(post_id) => NotificationTarget::Post(post_id.clone()),
                    None => profile(),
                }
            }
            NotificationType::Message => NotificationTarget::Messages,
            NotificationType::Follow | NotificationType::Other => profile(),
        }
    }
}

#[derive(Debug, Default)]
struct NotificationState {
    notifications: Vec<Notification>,
    /// Reads issued but not yet answered
    pending_reads: HashSet<Id>,
    /// A bulk read is in flight
    pending_read_all: bool,
}

impl NotificationState {
    fn unread(&self) -> u32 {
        self.notifications.iter().filter(|n| !n.is_read).count() as u32
    }
}

/// Client-side copy of the notification feed.
///
/// The unread counter is always derived from the local entries so it can
/// never drift below zero or away from what is rendered.
pub struct NotificationStore {
    gateway: Arc<dyn RemoteGateway>,
    state: RwLock<NotificationState>,
    disposed: AtomicBool,
}

impl NotificationStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            gateway,
            state: RwLock::new(NotificationState::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Replace the feed with the server's. Reads still in flight stay read.
    pub async fn refresh(&self) -> Result<u32, StoreError> {
        self.ensure_live()?;

        let feed = self
            .gateway
            .list_notifications()
            .await
            .map_err(StoreError::fetch)?;

        self.ensure_live()?;

        let mut state = self.state.write();
        let mut notifications = feed.notifications;
        for notification in notifications.iter_mut() {
            if state.pending_read_all || state.pending_reads.contains(&notification.id) {
                notification.is_read = true;
            }
        }
        state.notifications = notifications;

        let unread = state.unread();
        if unread != feed.unread_count {
            tracing::debug!(
                "Server reports {} unread notifications, {} unread in feed",
                feed.unread_count,
                unread
            );
        }
        tracing::debug!(
            "Refreshed {} notifications ({} unread)",
            state.notifications.len(),
            unread
        );
        Ok(unread)
    }

    /// Mark one notification read.
    ///
    /// Returns `Ok(false)` without contacting the server when the entry is
    /// already read locally or a read for it is in flight.
    pub async fn mark_read(&self, id: &Id) -> Result<bool, StoreError> {
        self.ensure_live()?;

        let edited = {
            let mut state = self.state.write();
            if state.pending_reads.contains(id) {
                return Ok(false);
            }
            let edited = match state.notifications.iter_mut().find(|n| &n.id == id) {
                Some(n) if n.is_read => return Ok(false),
                Some(n) => {
                    n.is_read = true;
                    true
                }
                None => false,
            };
            state.pending_reads.insert(id.clone());
            edited
        };

        let result = self.gateway.mark_notification_read(id).await;

        let mut state = self.state.write();
        state.pending_reads.remove(id);
        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }

        match MutationState::settle(&result) {
            MutationState::RolledBack => {
                if edited {
                    if let Some(n) = state.notifications.iter_mut().find(|n| &n.id == id) {
                        n.is_read = false;
                    }
                }
                tracing::warn!("Marking notification {} read failed, reverted", id);
            }
            _ => tracing::debug!("Notification {} marked read", id),
        }
        result
            .map(|_| true)
            .map_err(|e| StoreError::mutation("mark notification read", e))
    }

    /// Mark the whole feed read with one request.
    ///
    /// On failure the entries stay read until the next refresh brings back
    /// the server's state.
    pub async fn mark_all_read(&self) -> Result<usize, StoreError> {
        self.ensure_live()?;

        let flipped = {
            let mut state = self.state.write();
            let mut flipped = 0;
            for n in state.notifications.iter_mut().filter(|n| !n.is_read) {
                n.is_read = true;
                flipped += 1;
            }
            state.pending_read_all = true;
            flipped
        };

        let result = self.gateway.mark_all_notifications_read().await;

        self.state.write().pending_read_all = false;
        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }

        match result {
            Ok(()) => {
                tracing::debug!("Marked {} notifications read", flipped);
                Ok(flipped)
            }
            Err(err) => {
                tracing::warn!("Marking all notifications read failed: {}", err);
                Err(StoreError::mutation("mark all notifications read", err))
            }
        }
    }

    /// Navigation target for `notification`
    pub fn route(&self, notification: &Notification) -> NotificationTarget {
        NotificationTarget::for_notification(notification)
    }

    pub fn unread_count(&self) -> u32 {
        self.state.read().unread()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.read().notifications.clone()
    }

    pub fn get(&self, id: &Id) -> Option<Notification> {
        self.state
            .read()
            .notifications
            .iter()
            .find(|n| &n.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
