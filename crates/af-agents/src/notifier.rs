//! Fire-and-forget notification delivery.
//!
//! Callers push onto a flume channel and move on. A single worker task owns
//! the [`AlertChannel`], spaces deliveries apart, retries failures and honors
//! rate-limit hints. Delivery errors end in a log line, never at the caller.

use std::sync::Arc;
use std::time::Duration;

use af_core::config::NotificationConfig;
use af_core::notification::{AlertChannel, AlertError, Notification};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Pause after every delivery.
    pub spacing: Duration,
    pub max_retries: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(100),
            max_retries: 3,
        }
    }
}

impl From<&NotificationConfig> for NotifierConfig {
    fn from(cfg: &NotificationConfig) -> Self {
        Self {
            spacing: Duration::from_millis(cfg.spacing_ms),
            max_retries: cfg.max_retries,
        }
    }
}

/// Sending half. Cheap to clone; the worker stops once every clone is dropped
/// and the backlog is delivered.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: flume::Sender<Notification>,
}

impl Notifier {
    pub fn spawn(channel: Arc<dyn AlertChannel>, cfg: NotifierConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = flume::unbounded();
        let handle = tokio::spawn(run_worker(channel, cfg, rx));
        (Self { tx }, handle)
    }

    /// Queue a notification. Never blocks and never fails.
    pub fn send(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            warn!(kind = %e.into_inner().kind, "notifier worker gone, notification dropped");
        }
    }
}

async fn run_worker(
    channel: Arc<dyn AlertChannel>,
    cfg: NotifierConfig,
    rx: flume::Receiver<Notification>,
) {
    debug!(channel = channel.name(), "notifier worker started");
    while let Ok(notification) = rx.recv_async().await {
        deliver_with_retry(channel.as_ref(), &cfg, &notification).await;
        tokio::time::sleep(cfg.spacing).await;
    }
    debug!(channel = channel.name(), "notifier worker stopped");
}

async fn deliver_with_retry(channel: &dyn AlertChannel, cfg: &NotifierConfig, n: &Notification) {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match channel.deliver(n).await {
            Ok(()) => return,
            Err(e) => e,
        };

        if attempt > cfg.max_retries {
            error!(
                channel = channel.name(),
                kind = %n.kind,
                attempts = attempt,
                error = %err,
                "notification dropped after max retries"
            );
            return;
        }

        let wait = match err {
            AlertError::RateLimited { retry_after } => {
                warn!(channel = channel.name(), ?retry_after, "alert channel rate limited");
                retry_after
            }
            ref other => {
                warn!(channel = channel.name(), attempt, error = %other, "notification delivery failed");
                cfg.spacing
            }
        };
        tokio::time::sleep(wait).await;
    }
}
