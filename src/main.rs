//! xclone-sync: headless X-Clone messaging and notification sync
//!
//! Runs the polling engine against the configured backend and logs the
//! unread badge counts until interrupted.

#![warn(clippy::all, rust_2018_idioms)]

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use xclone_sync::api::{HttpGateway, RemoteGateway, Session, SessionState};
use xclone_sync::services::poller::{task, PollOptions};
use xclone_sync::storage::{AppConfig, Settings, SettingsRepository, Storage};
use xclone_sync::SyncApp;

/// Poll key of the badge summary log line
const SUMMARY_POLL: &str = "summary";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("xclone_sync=debug,warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting xclone-sync v{}", env!("CARGO_PKG_VERSION"));

    let storage = Arc::new(Storage::new()?);
    let settings = load_settings(&storage);
    let mut config = storage.load_config();

    if let Ok(token) = std::env::var("XCLONE_TOKEN") {
        if config.token.as_deref() != Some(token.as_str()) {
            // a different token may belong to a different account
            config.user = None;
        }
        config.token = Some(token);
    }
    if config.token.is_none() {
        anyhow::bail!("No API token configured; set XCLONE_TOKEN or sign in first");
    }

    let session = Arc::new(Session::new(config.token.clone(), config.user.clone()));
    let gateway: Arc<dyn RemoteGateway> = Arc::new(
        HttpGateway::new(
            &settings.api.base_url,
            settings.api.timeout(),
            session.clone(),
        )
        .context("Invalid API base URL")?,
    );

    if session.user().is_none() {
        let user = gateway
            .current_user()
            .await
            .context("Failed to load the signed-in user")?;
        session.set_user(user.clone());
        config.user = Some(user);
    }
    storage.save_config(&config)?;

    let poll_secs = settings
        .polling
        .conversations_secs
        .min(settings.polling.notifications_secs);
    let app = Arc::new(SyncApp::new(session, gateway, storage.clone(), settings));
    app.start();

    let summary = Arc::downgrade(&app);
    app.scheduler().schedule_with(
        SUMMARY_POLL,
        PollOptions::every(Duration::from_secs(poll_secs)).delayed(),
        task(move || {
            let app = summary.clone();
            async move {
                if let Some(app) = app.upgrade() {
                    tracing::info!(
                        "{} conversations, {} unread messages, {} unread notifications",
                        app.conversation_store().len(),
                        app.unread_messages(),
                        app.unread_notifications()
                    );
                }
                Ok(())
            }
        }),
    );

    let mut session_rx = app.session().subscribe();
    tokio::select! {
        result = app.run_until_shutdown() => result?,
        _ = session_rx.wait_for(|state| *state != SessionState::Active) => {
            tracing::error!("Session ended, sign in again to resume syncing");
            storage.save_config(&AppConfig::default())?;
        }
    }

    app.shutdown().await;
    Ok(())
}

/// Settings from the data dir with environment overrides applied
fn load_settings(storage: &Storage) -> Settings {
    let mut settings = SettingsRepository::new(storage.data_dir()).get().clone();

    if let Ok(base_url) = std::env::var("XCLONE_API_URL") {
        tracing::info!("Using API root from XCLONE_API_URL: {}", base_url);
        settings.api.base_url = base_url;
    }

    settings
}
