//! Durable, prioritized feature queue and its single worker.
//!
//! The [`JobStore`] owns every bit of job state; this module only decides
//! when to claim, how to record the outcome and when to retry. A restart
//! loses nothing but the in-memory rate-limit window.

use std::sync::Arc;
use std::time::Duration;

use af_agents::{FeaturePipeline, PipelineError};
use af_core::config::QueueConfig;
use af_core::job_store::{EnqueueOutcome, JobStore, QueueCounts, Retention, StoreError};
use af_core::types::{ExecutionMetrics, FeatureRequest, QueuedFeature};
use af_harness::rate_limiter::{RateLimitConfig, RateLimiter};
use af_harness::shutdown::ShutdownSignal;
use async_trait::async_trait;
use chrono::{DateTime, Days, TimeZone, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const LIMITER_KEY: &str = "feature-starts";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Why a job attempt did not produce metrics.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Anything worth another attempt.
    #[error("{0}")]
    Transient(String),
}

impl JobError {
    /// Fatal errors fail the job without using its remaining attempts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobError::Pipeline(PipelineError::BudgetExhausted { .. }))
    }
}

// ---------------------------------------------------------------------------
// Processor seam
// ---------------------------------------------------------------------------

/// Runs one feature to completion for the worker.
#[async_trait]
pub trait FeatureProcessor: Send + Sync {
    async fn process(&self, feature: FeatureRequest)
        -> std::result::Result<ExecutionMetrics, JobError>;
}

#[async_trait]
impl FeatureProcessor for FeaturePipeline {
    async fn process(
        &self,
        feature: FeatureRequest,
    ) -> std::result::Result<ExecutionMetrics, JobError> {
        Ok(self.process_feature(feature).await?)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub rate_limit: RateLimitConfig,
    /// Attempts for jobs enqueued with `retry_on_fail`.
    pub attempts: u32,
    pub backoff_base: Duration,
    pub off_peak_hour: u32,
    /// How long an idle or paused worker sleeps before looking again.
    pub poll_interval: Duration,
    /// Pause after every processed job.
    pub idle_pause: Duration,
    pub retention: Retention,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            rate_limit: RateLimitConfig::per_hour(cfg.rate_limit_per_hour),
            attempts: cfg.attempts.max(1),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            off_peak_hour: cfg.off_peak_hour.min(23),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            idle_pause: Duration::from_millis(cfg.idle_pause_ms),
            retention: Retention {
                completed_age: chrono::Duration::seconds(cfg.completed_retention_secs as i64),
                completed_keep: cfg.completed_keep,
                failed_age: chrono::Duration::seconds(cfg.failed_retention_secs as i64),
            },
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// Delay before attempt `failed_attempts + 1`: `base * 2^(failed_attempts - 1)`.
pub fn backoff_delay(base: Duration, failed_attempts: u32) -> Duration {
    let exp = failed_attempts.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

/// The next occurrence of `hour:00` in `now`'s time zone, strictly after
/// `now`.
pub fn next_off_peak<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Utc> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..3u64 {
        let Some(day) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let Some(naive) = day.and_hms_opt(hour.min(23), 0, 0) else {
            break;
        };
        // A DST gap has no such local time; the next day will.
        if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
            if candidate > *now {
                return candidate.with_timezone(&Utc);
            }
        }
    }
    now.with_timezone(&Utc) + chrono::Duration::days(1)
}

/// What the store keeps for a completed job.
pub fn job_result(metrics: &ExecutionMetrics) -> serde_json::Value {
    json!({
        "feature_id": metrics.feature_id,
        "cost": metrics.total_cost,
        "success_rate": metrics.success_rate,
        "ready_for_production": metrics.ready_for_production,
        "regression_detected": metrics.regression_detected,
    })
}

/// When queued features become eligible to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Schedule {
    #[default]
    Now,
    /// The next occurrence of the configured off-peak hour, local time.
    OffPeak,
    At(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct EnqueuePlan {
    pub batch_group: Option<String>,
    pub schedule: Schedule,
    pub retry_on_fail: bool,
}

impl Default for EnqueuePlan {
    fn default() -> Self {
        Self {
            batch_group: None,
            schedule: Schedule::Now,
            retry_on_fail: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedBatch {
    /// Resolved eligibility time; `None` means immediately.
    pub run_at: Option<DateTime<Utc>>,
    /// Feature id and outcome, in input order.
    pub outcomes: Vec<(String, EnqueueOutcome)>,
}

impl QueuedBatch {
    pub fn created(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == EnqueueOutcome::Created)
            .count()
    }
}

// ---------------------------------------------------------------------------
// FeatureQueue
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FeatureQueue {
    store: JobStore,
    settings: QueueSettings,
    limiter: Arc<RateLimiter>,
}

impl FeatureQueue {
    pub fn new(store: JobStore, settings: QueueSettings) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));
        Self {
            store,
            settings,
            limiter,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Enqueue
    // -----------------------------------------------------------------------

    /// Queue one feature. Re-adding an id that is still waiting or active is
    /// a no-op reported as [`EnqueueOutcome::Duplicate`].
    pub async fn add(&self, queued: QueuedFeature) -> Result<EnqueueOutcome> {
        let attempts = if queued.retry_on_fail {
            self.settings.attempts
        } else {
            1
        };
        let run_at = queued.scheduled_at.unwrap_or_else(Utc::now);
        let outcome = self.store.enqueue(&queued, attempts, run_at).await?;

        let feature = &queued.feature;
        match outcome {
            EnqueueOutcome::Created => info!(
                feature_id = %feature.id,
                priority = %feature.priority,
                run_at = %run_at,
                "feature queued"
            ),
            EnqueueOutcome::Duplicate => {
                debug!(feature_id = %feature.id, "feature already queued, ignoring")
            }
        }
        Ok(outcome)
    }

    pub async fn add_feature(&self, feature: FeatureRequest) -> Result<EnqueueOutcome> {
        self.add(QueuedFeature::new(feature)).await
    }

    /// Queue several features in order under one plan: shared batch group,
    /// shared eligibility time and retry policy.
    pub async fn add_all(
        &self,
        features: Vec<FeatureRequest>,
        plan: &EnqueuePlan,
    ) -> Result<QueuedBatch> {
        let run_at = match plan.schedule {
            Schedule::Now => None,
            Schedule::OffPeak => Some(next_off_peak(
                &chrono::Local::now(),
                self.settings.off_peak_hour,
            )),
            Schedule::At(at) => Some(at),
        };

        let count = features.len();
        let mut outcomes = Vec::with_capacity(count);
        for mut feature in features {
            if let Some(group) = &plan.batch_group {
                feature.batch_group = Some(group.clone());
            }
            let id = feature.id.clone();
            let mut queued = QueuedFeature::new(feature);
            queued.retry_on_fail = plan.retry_on_fail;
            if let Some(at) = run_at {
                queued = queued.scheduled_at(at);
            }
            outcomes.push((id, self.add(queued).await?));
        }
        info!(
            count,
            batch_group = plan.batch_group.as_deref(),
            scheduled_for = ?run_at,
            "features queued"
        );
        Ok(QueuedBatch { run_at, outcomes })
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    pub async fn stats(&self) -> Result<QueueCounts> {
        Ok(self.store.counts(Utc::now()).await?)
    }

    /// Stop claiming new jobs. The active one, if any, finishes.
    pub async fn pause(&self) -> Result<()> {
        self.store.set_paused(true).await?;
        info!("queue paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.store.set_paused(false).await?;
        info!("queue resumed");
        Ok(())
    }

    /// Remove every waiting and delayed job.
    pub async fn drain(&self) -> Result<u64> {
        let removed = self.store.drain().await?;
        info!(removed, "queue drained");
        Ok(removed)
    }

    pub async fn prune(&self) -> Result<u64> {
        let removed = self
            .store
            .prune_finished(Utc::now(), self.settings.retention)
            .await?;
        if removed > 0 {
            debug!(removed, "pruned finished jobs");
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Worker
    // -----------------------------------------------------------------------

    /// Process jobs one at a time until `shutdown` fires. A job that is
    /// running when shutdown fires is finished first.
    pub async fn run_worker(&self, processor: Arc<dyn FeatureProcessor>, shutdown: ShutdownSignal) {
        let _guard = shutdown.guard();

        match self.store.recover_active().await {
            Ok(0) => {}
            Ok(n) => warn!(recovered = n, "re-queued jobs left active by a previous run"),
            Err(e) => error!(error = %e, "active job recovery failed"),
        }
        info!("queue worker started");

        while !shutdown.is_shutting_down() {
            match self.store.is_paused().await {
                Ok(false) => {}
                Ok(true) => {
                    if sleep_or_shutdown(&shutdown, self.settings.poll_interval).await {
                        break;
                    }
                    continue;
                }
                Err(e) => warn!(error = %e, "pause flag unreadable, assuming running"),
            }

            if self.limiter.remaining(LIMITER_KEY) == 0 {
                debug!("hourly start limit reached, waiting");
                if sleep_or_shutdown(&shutdown, self.settings.poll_interval).await {
                    break;
                }
                continue;
            }

            let job = match self.store.claim_next(Utc::now()).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    if sleep_or_shutdown(&shutdown, self.idle_wait().await).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "job claim failed");
                    if sleep_or_shutdown(&shutdown, self.settings.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.limiter.check(LIMITER_KEY) {
                warn!(error = %e, "start admitted over the hourly limit");
            }
            self.process_job(processor.as_ref(), job).await;

            if let Err(e) = self.prune().await {
                warn!(error = %e, "job retention failed");
            }
            if sleep_or_shutdown(&shutdown, self.settings.idle_pause).await {
                break;
            }
        }

        info!("queue worker stopped");
    }

    /// Sleep until the next delayed job is due, capped at the poll interval.
    async fn idle_wait(&self) -> Duration {
        let poll = self.settings.poll_interval;
        match self.store.next_run_at().await {
            Ok(Some(at)) => (at - Utc::now())
                .to_std()
                .map(|d| d.min(poll))
                .unwrap_or(Duration::from_millis(1)),
            _ => poll,
        }
    }

    async fn process_job(&self, processor: &dyn FeatureProcessor, job: af_core::job_store::Job) {
        let feature = job.payload.feature.clone();
        info!(
            feature_id = %feature.id,
            title = %feature.title,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "processing queued feature"
        );

        let outcome = processor.process(feature).await;
        let recorded = match outcome {
            Ok(metrics) => {
                info!(
                    feature_id = %job.id,
                    cost = metrics.total_cost,
                    success_rate = metrics.success_rate,
                    ready = metrics.ready_for_production,
                    "feature completed in queue"
                );
                self.store.complete(&job.id, &job_result(&metrics)).await
            }
            Err(e) if e.is_fatal() || job.attempts >= job.max_attempts => {
                error!(
                    feature_id = %job.id,
                    attempt = job.attempts,
                    error = %e,
                    "feature failed in queue"
                );
                self.store.fail(&job.id, &e.to_string(), None).await
            }
            Err(e) => {
                let delay = backoff_delay(self.settings.backoff_base, job.attempts);
                warn!(
                    feature_id = %job.id,
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "feature attempt failed, will retry"
                );
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                self.store.fail(&job.id, &e.to_string(), Some(retry_at)).await
            }
        };
        if let Err(e) = recorded {
            error!(feature_id = %job.id, error = %e, "job outcome not recorded");
        }
    }
}

/// Returns true when shutdown fired first.
async fn sleep_or_shutdown(shutdown: &ShutdownSignal, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.wait() => true,
        _ = tokio::time::sleep(duration) => shutdown.is_shutting_down(),
    }
}
