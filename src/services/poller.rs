//! Keyed periodic task scheduler
//!
//! Every registered key owns one timer loop. A tick that arrives while the
//! previous body of the same key is still running is skipped, never queued.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Shortest accepted interval
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Body of a periodic task, invoked once per tick
pub type PollTask = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`PollTask`]
pub fn task<F, Fut>(f: F) -> PollTask
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Timing of a scheduled task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Time between ticks
    pub interval: Duration,

    /// Upper bound of the random delay added to each wait
    pub jitter: Duration,

    /// Longest wait after consecutive failures; at or below `interval`
    /// disables backoff
    pub max_backoff: Duration,

    /// Fire the first tick at registration instead of after one interval
    pub run_immediately: bool,
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            max_backoff: interval,
            run_immediately: true,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Wait one interval before the first tick
    pub fn delayed(mut self) -> Self {
        self.run_immediately = false;
        self
    }

    /// Wait before the next tick after `failures` failed runs in a row
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 || self.max_backoff <= self.interval {
            return self.interval;
        }
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.interval
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    fn jitter_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Counters for one scheduled key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Bodies started
    pub runs: u64,
    /// Ticks dropped because the previous body was still running
    pub skipped: u64,
    /// Failed bodies since the last success
    pub consecutive_failures: u32,
}

struct EntryShared {
    /// Owned by the key, not the entry, so it outlives replace and cancel
    in_flight: Arc<AtomicBool>,
    stats: Mutex<PollStats>,
}

/// Clears the in-flight flag when a body finishes, panics included
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Entry {
    timer: JoinHandle<()>,
    shared: Arc<EntryShared>,
}

/// Periodic refresh orchestration shared by every store
#[derive(Default)]
pub struct PollScheduler {
    entries: Mutex<HashMap<String, Entry>>,

    /// In-flight flag per key, shared by every entry registered under it
    in_flight: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `interval`, replacing any task registered under `key`
    pub fn schedule(&self, key: &str, interval: Duration, task: PollTask) {
        self.schedule_with(key, PollOptions::every(interval), task);
    }

    /// Like [`schedule`](Self::schedule) with full timing control.
    /// Must be called inside a tokio runtime.
    pub fn schedule_with(&self, key: &str, mut options: PollOptions, task: PollTask) {
        if options.interval < MIN_INTERVAL {
            tracing::warn!(
                "Poll interval {:?} for {} too short, using {:?}",
                options.interval,
                key,
                MIN_INTERVAL
            );
            options.interval = MIN_INTERVAL;
        }

        let in_flight = self
            .in_flight
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        let shared = Arc::new(EntryShared {
            in_flight,
            stats: Mutex::new(PollStats::default()),
        });
        let timer = tokio::spawn(run_timer(
            key.to_string(),
            options.clone(),
            task,
            shared.clone(),
        ));

        let previous = self
            .entries
            .lock()
            .insert(key.to_string(), Entry { timer, shared });
        if let Some(previous) = previous {
            previous.timer.abort();
            tracing::debug!("Replaced poll {}", key);
        }

        tracing::info!("Scheduled poll {} every {:?}", key, options.interval);
    }

    /// Stop the task under `key`. Unknown keys are ignored.
    /// A body already running is left to finish.
    pub fn cancel(&self, key: &str) {
        if let Some(entry) = self.entries.lock().remove(key) {
            entry.timer.abort();
            tracing::debug!("Cancelled poll {}", key);
        }
    }

    /// Stop every task
    pub fn cancel_all(&self) {
        let entries: Vec<(String, Entry)> = self.entries.lock().drain().collect();
        if entries.is_empty() {
            return;
        }
        for (_, entry) in &entries {
            entry.timer.abort();
        }
        tracing::info!("Cancelled {} polls", entries.len());
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self, key: &str) -> Option<PollStats> {
        self.entries
            .lock()
            .get(key)
            .map(|entry| *entry.shared.stats.lock())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            entry.timer.abort();
        }
    }
}

async fn run_timer(key: String, options: PollOptions, task: PollTask, shared: Arc<EntryShared>) {
    if !options.run_immediately {
        sleep(options.interval + options.jitter_delay()).await;
    }

    loop {
        fire(&key, &task, &shared);

        sleep(options.interval + options.jitter_delay()).await;

        let failures = shared.stats.lock().consecutive_failures;
        let extra = options
            .backoff_delay(failures)
            .saturating_sub(options.interval);
        if !extra.is_zero() {
            tracing::debug!(
                "Poll {} backing off {:?} after {} failures",
                key,
                extra,
                failures
            );
            sleep(extra).await;
        }
    }
}

fn fire(key: &str, task: &PollTask, shared: &Arc<EntryShared>) {
    if shared.in_flight.swap(true, Ordering::SeqCst) {
        shared.stats.lock().skipped += 1;
        tracing::debug!("Poll {} still running, skipping tick", key);
        return;
    }
    shared.stats.lock().runs += 1;

    let body = task();
    let guard = InFlightGuard(shared.in_flight.clone());
    let shared = shared.clone();
    let key = key.to_string();

    tokio::spawn(async move {
        let _guard = guard;
        match body.await {
            Ok(()) => shared.stats.lock().consecutive_failures = 0,
            Err(e) => {
                let failures = {
                    let mut stats = shared.stats.lock();
                    stats.consecutive_failures += 1;
                    stats.consecutive_failures
                };
                tracing::warn!("Poll {} failed ({} in a row): {:#}", key, failures, e);
            }
        }
    });
}
