//! Background services

pub mod poller;
pub mod sync;

pub use poller::{PollOptions, PollScheduler, PollStats, PollTask};
pub use sync::SyncService;

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Owns the poll scheduler and the shutdown signal
pub struct ServiceManager {
    /// Shared scheduler for every periodic task
    scheduler: Arc<PollScheduler>,

    /// Shutdown signal sender
    shutdown_tx: mpsc::Sender<()>,

    /// Shutdown signal receiver, taken by `run_until_shutdown`
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            scheduler: Arc::new(PollScheduler::new()),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        }
    }

    pub fn scheduler(&self) -> Arc<PollScheduler> {
        self.scheduler.clone()
    }

    /// Block until Ctrl-C or [`shutdown`](Self::shutdown), then stop every poll
    pub async fn run_until_shutdown(&self) -> anyhow::Result<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("Service manager is already running"))?;

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Interrupt received");
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Shutdown requested");
            }
        }

        self.scheduler.cancel_all();
        Ok(())
    }

    /// Stop all services
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down background services...");

        // Send shutdown signal; a full buffer means one is already queued
        let _ = self.shutdown_tx.try_send(());
        self.scheduler.cancel_all();
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}
