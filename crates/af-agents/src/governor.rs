//! Monthly spend tracking shared by every dispatch of every feature.

use std::sync::Arc;

use af_core::config::BudgetConfig;
use af_core::pattern_store::SessionState;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of adding one dispatch's cost to the monthly total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpendUpdate {
    pub monthly_spend: f64,
    /// This update moved spend from below the alert threshold to at or above it.
    pub crossed_alert: bool,
    pub exhausted: bool,
}

#[derive(Debug)]
struct BudgetState {
    monthly_spend: f64,
    feature_count: u64,
    last_feature_at: Option<DateTime<Utc>>,
    billing_period: String,
}

impl BudgetState {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            monthly_spend: 0.0,
            feature_count: 0,
            last_feature_at: None,
            billing_period: SessionState::billing_period_of(now),
        }
    }

    /// Start a new billing month when `now` has moved past the current one.
    fn roll_period(&mut self, now: DateTime<Utc>) {
        let period = SessionState::billing_period_of(now);
        if period != self.billing_period {
            info!(
                from = %self.billing_period,
                to = %period,
                previous_spend = self.monthly_spend,
                "new billing period, spend reset"
            );
            self.billing_period = period;
            self.monthly_spend = 0.0;
        }
    }
}

/// Guards the monthly budget.
///
/// Cloning shares the same totals. Spend only grows within a billing period
/// and is the only input to the exhausted check.
#[derive(Debug, Clone)]
pub struct BudgetGovernor {
    monthly_limit: f64,
    alert_threshold: f64,
    state: Arc<Mutex<BudgetState>>,
}

impl BudgetGovernor {
    pub fn new(cfg: &BudgetConfig) -> Self {
        Self {
            monthly_limit: cfg.monthly_limit,
            alert_threshold: cfg.alert_threshold,
            state: Arc::new(Mutex::new(BudgetState::fresh(Utc::now()))),
        }
    }

    pub fn monthly_limit(&self) -> f64 {
        self.monthly_limit
    }

    pub fn alert_threshold(&self) -> f64 {
        self.alert_threshold
    }

    /// Load totals from a persisted snapshot. A snapshot from an earlier
    /// billing month restores the feature count only.
    pub async fn restore(&self, snapshot: &SessionState) {
        self.restore_at(snapshot, Utc::now()).await
    }

    pub async fn restore_at(&self, snapshot: &SessionState, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.feature_count = snapshot.feature_count;
        state.last_feature_at = snapshot.last_feature_at;
        state.billing_period = snapshot.billing_period.clone();
        state.monthly_spend = snapshot.monthly_spend.max(0.0);
        state.roll_period(now);
        info!(
            monthly_spend = state.monthly_spend,
            feature_count = state.feature_count,
            period = %state.billing_period,
            "budget state restored"
        );
    }

    pub async fn snapshot(&self) -> SessionState {
        let state = self.state.lock().await;
        SessionState {
            monthly_spend: state.monthly_spend,
            feature_count: state.feature_count,
            last_feature_at: state.last_feature_at,
            billing_period: state.billing_period.clone(),
        }
    }

    pub async fn monthly_spend(&self) -> f64 {
        self.state.lock().await.monthly_spend
    }

    /// Spend as a fraction of the monthly limit.
    pub async fn spend_ratio(&self) -> f64 {
        let spend = self.monthly_spend().await;
        if self.monthly_limit > 0.0 {
            spend / self.monthly_limit
        } else {
            1.0
        }
    }

    pub async fn is_exhausted(&self) -> bool {
        let mut state = self.state.lock().await;
        state.roll_period(Utc::now());
        state.monthly_spend >= self.monthly_limit
    }

    /// Add a dispatch's cost. Negative or NaN costs are ignored.
    pub async fn record_spend(&self, cost: f64) -> SpendUpdate {
        let mut state = self.state.lock().await;
        state.roll_period(Utc::now());
        let before = state.monthly_spend;
        if cost.is_finite() && cost > 0.0 {
            state.monthly_spend += cost;
        }
        let after = state.monthly_spend;
        let crossed_alert = before < self.alert_threshold && after >= self.alert_threshold;
        let exhausted = after >= self.monthly_limit;
        if crossed_alert {
            warn!(
                monthly_spend = after,
                threshold = self.alert_threshold,
                "budget alert threshold reached"
            );
        }
        SpendUpdate {
            monthly_spend: after,
            crossed_alert,
            exhausted,
        }
    }

    /// Count a finished feature run.
    pub async fn record_feature(&self) {
        let mut state = self.state.lock().await;
        state.feature_count += 1;
        state.last_feature_at = Some(Utc::now());
    }
}
