pub mod conversations;
pub mod messages;
pub mod notifications;
pub mod settings;
pub mod suggestions;

use crate::api::{ApiError, User};
use anyhow::Result;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use conversations::{ConversationStore, ConversationView};
pub use messages::{LoadOutcome, MessageEntry, MessageStore};
pub use notifications::{NotificationStore, NotificationTarget};
pub use settings::{Settings, SettingsRepository};
pub use suggestions::{SuggestionCard, SuggestionStateCache, SuggestionView};

/// Errors surfaced by the client-side stores
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Rejected locally before any request was made
    #[error("Validation error: {0}")]
    Validation(String),

    /// A read failed; the next scheduled refresh retries it
    #[error("Fetch failed: {0}")]
    TransientFetch(#[source] ApiError),

    /// A write failed after its optimistic edit was applied
    #[error("{operation} failed: {source}")]
    MutationFailure {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Session expired")]
    AuthExpired,

    /// The store was closed while the request was in flight
    #[error("Store disposed")]
    Disposed,

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub(crate) fn fetch(err: ApiError) -> Self {
        if err.is_auth() {
            StoreError::AuthExpired
        } else {
            StoreError::TransientFetch(err)
        }
    }

    pub(crate) fn mutation(operation: &'static str, err: ApiError) -> Self {
        if err.is_auth() {
            StoreError::AuthExpired
        } else {
            StoreError::MutationFailure {
                operation,
                source: err,
            }
        }
    }

    /// Whether the caller can simply retry later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::TransientFetch(_) | StoreError::MutationFailure { .. }
        )
    }
}

/// Lifecycle of an optimistic edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Applied locally, request in flight
    Pending,
    /// The server accepted the change
    Confirmed,
    /// The request failed and the local edit was undone
    RolledBack,
}

impl MutationState {
    pub fn settle<T, E>(result: &std::result::Result<T, E>) -> Self {
        match result {
            Ok(_) => MutationState::Confirmed,
            Err(_) => MutationState::RolledBack,
        }
    }

    pub fn is_pending(self) -> bool {
        self == MutationState::Pending
    }
}

/// Small durable key-value storage, the client's equivalent of browser
/// local storage
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Credentials persisted between runs
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct AppConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl AppConfig {
    fn load(path: &Path) -> Option<Self> {
        if path.exists() {
            std::fs::read_to_string(path)
                .ok()
                .and_then(|content| serde_json::from_str(&content).ok())
        } else {
            None
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// On-disk root for everything the client persists
pub struct Storage {
    data_dir: PathBuf,
    local_dir: PathBuf,
}

impl Storage {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("org", "xclone", "XClone")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        Self::at(project_dirs.data_dir())
    }

    /// Storage rooted at an explicit directory
    pub fn at(data_dir: &Path) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        let local_dir = data_dir.join("local");
        std::fs::create_dir_all(&local_dir)?;

        tracing::info!("Storage initialized at: {:?}", data_dir);

        Ok(Self {
            data_dir,
            local_dir,
        })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn load_config(&self) -> AppConfig {
        AppConfig::load(&self.config_path()).unwrap_or_default()
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        config.save(&self.config_path())
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(anyhow::anyhow!("Invalid storage key: {:?}", key));
        }
        Ok(self.local_dir.join(format!("{}.json", key)))
    }

    /// Remove every persisted entry and the saved credentials
    pub fn clear_all(&self) -> Result<()> {
        let config_path = self.config_path();
        if config_path.exists() {
            std::fs::remove_file(&config_path)?;
        }

        if self.local_dir.exists() {
            std::fs::remove_dir_all(&self.local_dir)?;
            std::fs::create_dir_all(&self.local_dir)?;
        }

        tracing::info!("All data cleared");
        Ok(())
    }
}

impl LocalStore for Storage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        std::fs::write(path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
