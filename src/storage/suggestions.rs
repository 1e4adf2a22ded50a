//! Persisted follow state of the "who to follow" demo cards

use crate::storage::{LocalStore, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Storage key holding the follow map
pub const SUGGESTIONS_KEY: &str = "suggested_follows";

/// A suggested account shown in the sidebar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionCard {
    pub key: &'static str,
    pub display_name: &'static str,
    pub handle: &'static str,
}

/// Seed accounts with no follow edge on the backend
pub const DEFAULT_SUGGESTIONS: [SuggestionCard; 3] = [
    SuggestionCard {
        key: "natgeo",
        display_name: "National Geographic",
        handle: "@NatGeo",
    },
    SuggestionCard {
        key: "bbc",
        display_name: "BBC News",
        handle: "@BBCWorld",
    },
    SuggestionCard {
        key: "nasa",
        display_name: "NASA",
        handle: "@NASA",
    },
];

/// Card together with its local follow flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionView {
    pub card: SuggestionCard,
    pub is_following: bool,
}

/// Key to boolean map written through to local storage on every change.
///
/// Tracks state only. Hiding followed cards is up to the caller.
pub struct SuggestionStateCache {
    store: Arc<dyn LocalStore>,
    state: RwLock<BTreeMap<String, bool>>,
}

impl SuggestionStateCache {
    /// Create the cache and read the persisted map
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        let cache = Self {
            store,
            state: RwLock::new(BTreeMap::new()),
        };
        cache.load();
        cache
    }

    /// Reload from storage. A missing or unreadable entry yields an empty map.
    pub fn load(&self) -> BTreeMap<String, bool> {
        let loaded = match self.store.get(SUGGESTIONS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<BTreeMap<String, bool>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("Ignoring corrupt suggestion state: {}", e);
                    BTreeMap::new()
                }
            },
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read suggestion state: {}", e);
                BTreeMap::new()
            }
        };

        *self.state.write() = loaded.clone();
        loaded
    }

    /// Replace the whole map and persist it
    pub fn save(&self, state: BTreeMap<String, bool>) -> Result<(), StoreError> {
        self.persist(&state)?;
        *self.state.write() = state;
        Ok(())
    }

    /// Flip the follow flag of `key` and return the new value.
    /// The change is undone if it cannot be persisted.
    pub fn toggle(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let previous = state.get(key).copied();
        let following = !previous.unwrap_or(false);
        state.insert(key.to_string(), following);

        if let Err(err) = self.persist(&state) {
            match previous {
                Some(value) => state.insert(key.to_string(), value),
                None => state.remove(key),
            };
            return Err(err);
        }

        tracing::debug!("Suggestion {} following={}", key, following);
        Ok(following)
    }

    pub fn is_following(&self, key: &str) -> bool {
        self.state.read().get(key).copied().unwrap_or(false)
    }

    /// Snapshot of the map
    pub fn state(&self) -> BTreeMap<String, bool> {
        self.state.read().clone()
    }

    /// Project `cards` with their follow flags
    pub fn views(&self, cards: &[SuggestionCard]) -> Vec<SuggestionView> {
        let state = self.state.read();
        cards
            .iter()
            .map(|card| SuggestionView {
                card: *card,
                is_following: state.get(card.key).copied().unwrap_or(false),
            })
            .collect()
    }

    fn persist(&self, state: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(state).map_err(|e| StoreError::Persistence(e.to_string()))?;
        self.store
            .set(SUGGESTIONS_KEY, &raw)
            .map_err(|e| StoreError::Persistence(e.to_string()))
    }
}
