use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Priority;

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FeatureStarted,
    FeatureCompleted,
    FeatureBlocked,
    AgentFailure,
    CostAlert,
    RegressionWarning,
    Deployment,
    DailySummary,
    QueueStatus,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::FeatureStarted => "feature_started",
            NotificationKind::FeatureCompleted => "feature_completed",
            NotificationKind::FeatureBlocked => "feature_blocked",
            NotificationKind::AgentFailure => "agent_failure",
            NotificationKind::CostAlert => "cost_alert",
            NotificationKind::RegressionWarning => "regression_warning",
            NotificationKind::Deployment => "deployment",
            NotificationKind::DailySummary => "daily_summary",
            NotificationKind::QueueStatus => "queue_status",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound alert. `details` keeps insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub details: Vec<(String, String)>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        priority: Priority,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            priority,
            title: title.into(),
            message: message.into(),
            details: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.details.push((key.into(), value.to_string()));
        self
    }

    pub fn detail_value(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// AlertChannel
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by channel: {0}")]
    Rejected(String),
}

/// Outbound delivery of a single notification.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), AlertError>;

    fn name(&self) -> &str;
}

/// Channel used when no external alerting is configured: every notification
/// becomes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    async fn deliver(&self, n: &Notification) -> Result<(), AlertError> {
        tracing::info!(
            kind = %n.kind,
            priority = %n.priority,
            title = %n.title,
            details = ?n.details,
            "{}",
            n.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
