use std::sync::Arc;
use std::time::Duration;

use af_agents::{
    BudgetGovernor, Dispatcher, FeaturePipeline, Notifier, NotifierConfig, PipelineConfig,
};
use af_core::config::{Config, CredentialProvider};
use af_core::job_store::JobStore;
use af_core::notification::{AlertChannel, LogChannel, Notification, NotificationKind};
use af_core::pattern_store::{PatternStore, SqlitePatternStore};
use af_core::types::Priority;
use af_harness::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use af_harness::retry::RetryPolicy;
use af_harness::shutdown::ShutdownSignal;
use af_harness::tools::ToolRegistry;
use af_integrations::TelegramChannel;
use af_intelligence::Providers;
use anyhow::{Context, Result};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::queue::{FeatureProcessor, FeatureQueue, QueueSettings};

/// Configuration for daemon loop intervals.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// Retention pass over checkpoints and finished jobs (default: 1h).
    pub maintenance: Duration,
    /// Daily summary notification (default: 24h).
    pub summary: Duration,
    /// How long shutdown waits for the active feature before logging again.
    pub drain_notice: Duration,
    /// Upper bound on flushing queued notifications at exit.
    pub notifier_flush: Duration,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            maintenance: Duration::from_secs(3600),
            summary: Duration::from_secs(86_400),
            drain_notice: Duration::from_secs(30),
            notifier_flush: Duration::from_secs(10),
        }
    }
}

/// The long-running feature worker.
///
/// Owns the queue worker, the pipeline it drives and the notifier. Shuts
/// down gracefully when the `ShutdownSignal` is triggered (e.g. via ctrl-c):
/// the active feature finishes, the governor session is saved, queued
/// notifications are flushed and both stores are closed.
pub struct Daemon {
    config: Config,
    queue: FeatureQueue,
    pipeline: Arc<FeaturePipeline>,
    patterns: Arc<dyn PatternStore>,
    notifier: Notifier,
    notifier_task: JoinHandle<()>,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Resolve credentials, open both stores and wire the real providers.
    pub async fn new(config: Config) -> Result<Self> {
        let creds = CredentialProvider::resolve(&config).context("failed to resolve credentials")?;
        let providers = Providers::from_config(&config.providers, &creds);

        let channel: Arc<dyn AlertChannel> = match &creds.telegram {
            Some(telegram) => Arc::new(
                TelegramChannel::from_credentials(telegram)
                    .context("invalid Telegram credentials")?,
            ),
            None => {
                info!("Telegram not configured, notifications go to the log");
                Arc::new(LogChannel)
            }
        };

        let jobs = JobStore::new(&config.queue.store_path)
            .await
            .with_context(|| format!("failed to open queue store {}", config.queue.store_path))?;
        let patterns = SqlitePatternStore::new(&config.patterns.store_path)
            .await
            .with_context(|| {
                format!("failed to open pattern store {}", config.patterns.store_path)
            })?;

        Ok(Self::from_parts(
            config,
            providers,
            channel,
            jobs,
            Arc::new(patterns),
        ))
    }

    /// Assemble a daemon from already-opened collaborators. Must be called
    /// inside a Tokio runtime: the notifier worker is spawned here.
    pub fn from_parts(
        config: Config,
        providers: Providers,
        channel: Arc<dyn AlertChannel>,
        jobs: JobStore,
        patterns: Arc<dyn PatternStore>,
    ) -> Self {
        let (notifier, notifier_task) =
            Notifier::spawn(channel, NotifierConfig::from(&config.notifications));

        let dispatcher = Dispatcher::new(
            providers,
            Arc::new(ToolRegistry::with_defaults()),
            CircuitBreaker::new(CircuitBreakerConfig::from(&config.breaker)),
            BudgetGovernor::new(&config.budget),
            RetryPolicy::from(&config.retry),
            notifier.clone(),
        )
        .with_secondary_model(config.providers.secondary_model.clone());

        let pipeline = FeaturePipeline::new(
            dispatcher,
            patterns.clone(),
            notifier.clone(),
            PipelineConfig {
                similar_count: config.patterns.similar_count,
                ..PipelineConfig::default()
            },
        );
        let queue = FeatureQueue::new(jobs, QueueSettings::from(&config.queue));

        Self {
            config,
            queue,
            pipeline: Arc::new(pipeline),
            patterns,
            notifier,
            notifier_task,
            intervals: DaemonIntervals::default(),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Override the default loop intervals.
    pub fn set_intervals(&mut self, intervals: DaemonIntervals) {
        self.intervals = intervals;
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn queue(&self) -> &FeatureQueue {
        &self.queue
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run until shutdown. Blocks the caller.
    pub async fn run(self) -> Result<()> {
        self.pipeline.restore_session().await;

        self.send_queue_status("Queue Worker Started").await;
        let worker = {
            let queue = self.queue.clone();
            let processor: Arc<dyn FeatureProcessor> = self.pipeline.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { queue.run_worker(processor, shutdown).await })
        };

        info!(
            maintenance_secs = self.intervals.maintenance.as_secs(),
            summary_secs = self.intervals.summary.as_secs(),
            "daemon starting event loop"
        );
        self.run_loops().await;

        // Shutdown: the worker finishes its active feature first.
        let drained = self
            .shutdown
            .wait_for_drain(1, self.intervals.drain_notice)
            .await;
        if !drained.is_complete() {
            info!("waiting for the active feature to finish");
        }
        if let Err(e) = worker.await {
            error!(error = %e, "queue worker task failed");
        }

        self.pipeline.save_session().await;
        self.send_queue_status("Queue Worker Stopped").await;
        self.close().await;
        Ok(())
    }

    async fn run_loops(&self) {
        let mut maintenance = tokio::time::interval(self.intervals.maintenance);
        let mut summary = tokio::time::interval(self.intervals.summary);

        // Consume the first immediate tick so loops don't all fire at t=0.
        maintenance.tick().await;
        summary.tick().await;

        loop {
            tokio::select! {
                _ = maintenance.tick() => self.maintenance().await,
                _ = summary.tick() => self.send_daily_summary().await,
                _ = self.shutdown.wait() => {
                    info!("shutdown signal received, stopping background loops");
                    break;
                }
            }
        }
    }

    /// Checkpoint and job retention.
    async fn maintenance(&self) {
        let days = i64::from(self.config.patterns.checkpoint_retention_days);
        let cutoff = Utc::now() - chrono::Duration::days(days);
        match self.patterns.prune_checkpoints(cutoff).await {
            Ok(removed) => info!(removed, "checkpoint retention completed"),
            Err(e) => warn!(error = %e, "checkpoint retention failed"),
        }
        if let Err(e) = self.queue.prune().await {
            warn!(error = %e, "job retention failed");
        }
    }

    async fn send_daily_summary(&self) {
        let snapshot = self.pipeline.governor().snapshot().await;
        let mut n = Notification::new(
            NotificationKind::DailySummary,
            Priority::Low,
            "Daily Summary",
            format!(
                "Monthly spend ${:.2} / ${:.2}",
                snapshot.monthly_spend,
                self.pipeline.governor().monthly_limit()
            ),
        )
        .detail("features", snapshot.feature_count);
        match self.queue.stats().await {
            Ok(c) => {
                n = n
                    .detail("waiting", c.waiting)
                    .detail("delayed", c.delayed)
                    .detail("completed", c.completed)
                    .detail("failed", c.failed);
            }
            Err(e) => warn!(error = %e, "queue stats unavailable for summary"),
        }
        self.notifier.send(n);
    }

    async fn send_queue_status(&self, title: &str) {
        let message = match self.queue.stats().await {
            Ok(c) => format!(
                "waiting {} | active {} | delayed {} | completed {} | failed {}",
                c.waiting, c.active, c.delayed, c.completed, c.failed
            ),
            Err(e) => {
                warn!(error = %e, "queue stats unavailable");
                "stats unavailable".to_string()
            }
        };
        info!(%message, "{title}");
        self.notifier
            .send(Notification::new(NotificationKind::QueueStatus, Priority::Low, title, message));
    }

    /// Drop every sender so the notifier drains, then release the stores.
    async fn close(self) {
        let Daemon {
            pipeline,
            notifier,
            notifier_task,
            queue,
            patterns,
            intervals,
            ..
        } = self;
        drop(pipeline);
        drop(notifier);

        match tokio::time::timeout(intervals.notifier_flush, notifier_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "notifier task failed"),
            Err(_) => warn!("notifier flush timed out, pending notifications dropped"),
        }

        drop(queue);
        drop(patterns);
        info!("daemon stopped");
    }
}
