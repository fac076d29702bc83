//! Timer-driven expiry for the seat selection store.
//!
//! The watcher keeps exactly one pending timer, armed for the store's current
//! deadline. Whenever the deadline changes the pending timer is dropped and a
//! new one is armed; when a timer fires the store is asked to purge the
//! record and the [`ExpiryHandler`] is told about it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::selection::SeatSelection;
use crate::store::SelectionStore;

/// Slack added past the deadline, since a record is only expired strictly after it.
const DEADLINE_GRACE: Duration = Duration::from_millis(5);

/// Wait before retrying after the store returned an error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A selection was purged because its time ran out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryEvent {
    /// The record as it was when purged.
    pub selection: SeatSelection,
    /// When the watcher noticed the expiry.
    pub detected_at: DateTime<Utc>,
}

/// Receives expiry notifications.
#[async_trait::async_trait]
pub trait ExpiryHandler: Send + Sync {
    /// Called once per purged selection.
    async fn on_expired(&self, event: ExpiryEvent);
}

/// Logs expirations and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExpiryHandler;

#[async_trait::async_trait]
impl ExpiryHandler for LogExpiryHandler {
    async fn on_expired(&self, event: ExpiryEvent) {
        info!(
            showtime = %event.selection.showtime_id,
            seats = event.selection.seat_count(),
            "Seat hold released after expiry"
        );
    }
}

/// Forwards expirations into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelExpiryHandler {
    tx: mpsc::Sender<ExpiryEvent>,
}

impl ChannelExpiryHandler {
    /// Create a handler and the receiving end of its channel.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ExpiryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl ExpiryHandler for ChannelExpiryHandler {
    async fn on_expired(&self, event: ExpiryEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Expiry receiver dropped");
        }
    }
}

/// Counters reported when the watcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Timers armed, including re-arms after a deadline change.
    pub timers_armed: u64,
    /// Timers dropped because the deadline changed first.
    pub timers_cancelled: u64,
    /// Selections purged.
    pub expirations: u64,
}

/// Spawns expiry watchers.
#[derive(Debug)]
pub struct ExpiryWatcher;

impl ExpiryWatcher {
    /// Start watching `store` on the current tokio runtime.
    ///
    /// The watcher runs until [`WatcherHandle::stop`] is called or the handle
    /// is dropped.
    #[must_use]
    pub fn spawn<H>(store: Arc<SelectionStore>, handler: H) -> WatcherHandle
    where
        H: ExpiryHandler + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let deadlines = store.subscribe();
        let task = tokio::spawn(run(store, handler, deadlines, stop_rx));
        WatcherHandle { stop_tx, task }
    }
}

/// Controls a running watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<WatcherStats>,
}

impl WatcherHandle {
    /// Cancel the pending timer and end the watcher.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the watcher task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watcher to end without stopping it.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher task panicked.
    pub async fn join(self) -> Result<WatcherStats> {
        self.task
            .await
            .map_err(|e| Error::internal(format!("expiry watcher failed: {e}")))
    }

    /// Stop the watcher and wait for it to end.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher task panicked.
    pub async fn shutdown(self) -> Result<WatcherStats> {
        self.stop();
        self.join().await
    }
}

/// How a watched hold came to an end.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldOutcome {
    /// The hold ran out and was purged.
    Expired(ExpiryEvent),
    /// The hold was gone before it ran out, cleared here or by another process.
    Released,
}

/// Watch the store's hold until it expires or disappears.
///
/// Returns [`HoldOutcome::Released`] at once when no hold is live.
///
/// # Errors
///
/// Returns an error if the watcher task panicked.
pub async fn wait_for_hold_end(store: Arc<SelectionStore>) -> Result<HoldOutcome> {
    let mut deadlines = store.subscribe();
    let (handler, mut expirations) = ChannelExpiryHandler::channel(1);
    let watcher = ExpiryWatcher::spawn(Arc::clone(&store), handler);

    let ended = deadlines.wait_for(Option::is_none).await.map(|_| ());
    let stats = watcher.shutdown().await?;
    debug!(?stats, "Hold watch finished");
    ended.map_err(|_| Error::internal("selection store closed its deadline channel"))?;

    Ok(expirations
        .try_recv()
        .map_or(HoldOutcome::Released, HoldOutcome::Expired))
}

async fn run<H: ExpiryHandler>(
    store: Arc<SelectionStore>,
    handler: H,
    mut deadlines: watch::Receiver<Option<DateTime<Utc>>>,
    mut stop: watch::Receiver<bool>,
) -> WatcherStats {
    let mut stats = WatcherStats::default();
    let mut backoff: Option<Duration> = None;

    loop {
        if *stop.borrow() {
            break;
        }

        let deadline = *deadlines.borrow_and_update();
        let wait = deadline.map(|deadline| {
            let wait = store.time_until(deadline) + DEADLINE_GRACE;
            backoff.take().map_or(wait, |b| wait.max(b))
        });
        if let Some(wait) = wait {
            stats.timers_armed += 1;
            debug!(?wait, "Armed expiry timer");
        }

        let timer = async {
            match wait {
                Some(wait) => tokio::time::sleep(wait).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            changed = deadlines.changed() => {
                if changed.is_err() {
                    break;
                }
                if wait.is_some() {
                    stats.timers_cancelled += 1;
                    debug!("Deadline changed, rescheduling expiry timer");
                }
            }
            () = timer => {
                match store.expire_if_due() {
                    Ok(Some(selection)) => {
                        stats.expirations += 1;
                        let event = ExpiryEvent {
                            selection,
                            detected_at: store.now(),
                        };
                        handler.on_expired(event).await;
                    }
                    Ok(None) => debug!("Expiry timer fired with nothing due"),
                    Err(e) => {
                        warn!(error = %e, "Expiry check failed, retrying");
                        backoff = Some(ERROR_BACKOFF);
                    }
                }
            }
        }
    }

    debug!(?stats, "Expiry watcher stopped");
    stats
}
