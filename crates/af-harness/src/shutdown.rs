use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// Graceful-shutdown flag shared by the daemon and its workers.
///
/// Workers poll [`is_shutting_down`](Self::is_shutting_down) between jobs and
/// `select!` on [`wait`](Self::wait) while idle. Each worker holds a
/// [`ShutdownGuard`]; dropping it tells [`wait_for_drain`](Self::wait_for_drain)
/// that the worker finished its active job.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    shutting_down: Arc<AtomicBool>,
    trigger_tx: Arc<watch::Sender<bool>>,
    trigger_rx: watch::Receiver<bool>,
    drain_tx: Arc<watch::Sender<usize>>,
    drain_rx: watch::Receiver<usize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger_tx, trigger_rx) = watch::channel(false);
        let (drain_tx, drain_rx) = watch::channel(0);
        Self {
            shutting_down: Arc::new(AtomicBool::new(false)),
            trigger_tx: Arc::new(trigger_tx),
            trigger_rx,
            drain_tx: Arc::new(drain_tx),
            drain_rx,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Stop accepting new work. Idempotent.
    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("shutdown signal triggered");
            self.trigger_tx.send_replace(true);
        } else {
            warn!("shutdown already triggered");
        }
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.trigger_rx.clone();
        // An error means every sender is gone, which only happens on teardown.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            signal: self.clone(),
        }
    }

    fn confirm_drained(&self) {
        self.drain_tx.send_modify(|count| *count += 1);
    }

    /// Wait for `expected` guards to be dropped, with a timeout.
    pub async fn wait_for_drain(&self, expected: usize, timeout: Duration) -> DrainResult {
        let mut rx = self.drain_rx.clone();
        let drained = tokio::time::timeout(timeout, rx.wait_for(|n| *n >= expected))
            .await
            .is_ok();
        let confirmed = *self.drain_rx.borrow();
        if drained {
            info!(count = confirmed, "all workers drained");
            DrainResult::Complete(confirmed)
        } else {
            warn!(confirmed, expected, "drain timeout, some workers still busy");
            DrainResult::Timeout {
                confirmed,
                expected,
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// DrainResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete(usize),
    Timeout { confirmed: usize, expected: usize },
}

impl DrainResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, DrainResult::Complete(_))
    }
}

// ---------------------------------------------------------------------------
// ShutdownGuard
// ---------------------------------------------------------------------------

/// Confirms drain when dropped.
pub struct ShutdownGuard {
    signal: ShutdownSignal,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.signal.confirm_drained();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
