//! Application settings storage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Backend connection
    #[serde(default)]
    pub api: ApiSettings,

    /// Poll intervals and retry policy
    #[serde(default)]
    pub polling: PollingSettings,

    /// Suggested-accounts panel
    #[serde(default)]
    pub suggestions: SuggestionSettings,
}

/// Backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// API root, e.g. `http://localhost:8000/api`
    pub base_url: String,

    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 15,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Poll intervals and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Conversation list refresh interval
    pub conversations_secs: u64,

    /// Notification feed refresh interval
    pub notifications_secs: u64,

    /// Random delay added to every wait, spreads requests from many clients
    pub jitter_ms: u64,

    /// Upper bound for the wait after repeated failures
    pub max_backoff_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            conversations_secs: 30,
            notifications_secs: 30,
            jitter_ms: 0,
            max_backoff_secs: 300,
        }
    }
}

/// Suggested-accounts panel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionSettings {
    /// How long a followed card stays visible before it is dismissed
    pub dismiss_delay_ms: u64,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            dismiss_delay_ms: 1500,
        }
    }
}

impl SuggestionSettings {
    pub fn dismiss_delay(&self) -> Duration {
        Duration::from_millis(self.dismiss_delay_ms)
    }
}

/// Settings repository
pub struct SettingsRepository {
    settings_path: PathBuf,
    settings: Settings,
}

impl SettingsRepository {
    /// Load `settings.json` from the data directory, falling back to defaults
    pub fn new(data_dir: &Path) -> Self {
        let settings_path = data_dir.join("settings.json");

        let settings = if settings_path.exists() {
            std::fs::read_to_string(&settings_path)
                .ok()
                .and_then(|content| match serde_json::from_str(&content) {
                    Ok(settings) => Some(settings),
                    Err(e) => {
                        tracing::warn!("Ignoring invalid settings file: {}", e);
                        None
                    }
                })
                .unwrap_or_default()
        } else {
            Settings::default()
        };

        Self {
            settings_path,
            settings,
        }
    }

    /// Get current settings
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Get mutable settings
    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Save settings
    pub fn save(&self) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(&self.settings)?;
        std::fs::write(&self.settings_path, content)?;
        Ok(())
    }

    /// Reset to defaults
    pub fn reset(&mut self) {
        self.settings = Settings::default();
    }
}
