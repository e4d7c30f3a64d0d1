use std::sync::{Arc, Mutex};
use std::time::Duration;

use af_agents::PipelineError;
use af_core::job_store::{EnqueueOutcome, JobStatus, JobStore, QueueCounts};
use af_core::types::{Complexity, ExecutionMetrics, FeatureRequest, Priority, QueuedFeature};
use af_daemon::queue::{
    EnqueuePlan, FeatureProcessor, FeatureQueue, JobError, QueueSettings, Schedule,
};
use af_harness::rate_limiter::RateLimitConfig;
use af_harness::shutdown::ShutdownSignal;
use async_trait::async_trait;
use chrono::Utc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Script = Box<dyn Fn(&FeatureRequest, usize) -> Result<ExecutionMetrics, JobError> + Send + Sync>;

/// Records every feature it is handed; `script` sees the feature and how
/// many times it was handed over before.
struct Recording {
    seen: Mutex<Vec<String>>,
    script: Script,
}

impl Recording {
    fn new(
        script: impl Fn(&FeatureRequest, usize) -> Result<ExecutionMetrics, JobError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            script: Box::new(script),
        })
    }

    fn succeeding() -> Arc<Self> {
        Self::new(|f, _| Ok(metrics(f)))
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeatureProcessor for Recording {
    async fn process(&self, feature: FeatureRequest) -> Result<ExecutionMetrics, JobError> {
        let previous = {
            let mut seen = self.seen.lock().unwrap();
            let previous = seen.iter().filter(|id| **id == feature.id).count();
            seen.push(feature.id.clone());
            previous
        };
        (self.script)(&feature, previous)
    }
}

fn metrics(feature: &FeatureRequest) -> ExecutionMetrics {
    let mut m = ExecutionMetrics::new(feature.id.clone(), 0.2);
    m.total_cost = 0.15;
    m.success_rate = 1.0;
    m.ready_for_production = true;
    m
}

fn feature(id: &str, priority: Priority) -> FeatureRequest {
    FeatureRequest::new(id, format!("Feature {id}"), Complexity::Simple, priority)
}

fn fast_settings() -> QueueSettings {
    QueueSettings {
        rate_limit: RateLimitConfig::per_hour(100),
        attempts: 3,
        backoff_base: Duration::from_millis(1),
        poll_interval: Duration::from_millis(5),
        idle_pause: Duration::from_millis(1),
        ..QueueSettings::default()
    }
}

async fn queue_with(settings: QueueSettings) -> FeatureQueue {
    FeatureQueue::new(JobStore::new_in_memory().await.unwrap(), settings)
}

/// Run the worker until `done` holds for the queue counts, then shut it down.
async fn run_until(
    queue: &FeatureQueue,
    processor: Arc<Recording>,
    done: impl Fn(&QueueCounts) -> bool,
) {
    let shutdown = ShutdownSignal::new();
    let worker = {
        let queue = queue.clone();
        let processor: Arc<dyn FeatureProcessor> = processor;
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.run_worker(processor, shutdown).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if done(&queue.stats().await.unwrap()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not settle");

    shutdown.trigger();
    worker.await.unwrap();
}

/// Run the worker for a fixed time.
async fn run_for(queue: &FeatureQueue, processor: Arc<Recording>, duration: Duration) {
    let shutdown = ShutdownSignal::new();
    let worker = {
        let queue = queue.clone();
        let processor: Arc<dyn FeatureProcessor> = processor;
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.run_worker(processor, shutdown).await })
    };
    tokio::time::sleep(duration).await;
    shutdown.trigger();
    worker.await.unwrap();
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn re_enqueue_is_noop() {
    let queue = queue_with(fast_settings()).await;
    let f = feature("FEAT-1", Priority::High);
    assert_eq!(queue.add_feature(f.clone()).await.unwrap(), EnqueueOutcome::Created);
    assert_eq!(queue.add_feature(f).await.unwrap(), EnqueueOutcome::Duplicate);
    assert_eq!(queue.stats().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn batch_tags_every_feature() {
    let queue = queue_with(fast_settings()).await;
    let plan = EnqueuePlan {
        batch_group: Some("auth".into()),
        ..EnqueuePlan::default()
    };
    let batch = queue
        .add_all(
            vec![
                feature("A", Priority::Low),
                feature("B", Priority::Low),
                feature("A", Priority::Low),
            ],
            &plan,
        )
        .await
        .unwrap();
    assert_eq!(batch.run_at, None);
    assert_eq!(
        batch.outcomes,
        vec![
            ("A".to_string(), EnqueueOutcome::Created),
            ("B".to_string(), EnqueueOutcome::Created),
            ("A".to_string(), EnqueueOutcome::Duplicate),
        ]
    );
    assert_eq!(batch.created(), 2);

    let job = queue.store().get("B").await.unwrap().unwrap();
    assert_eq!(job.payload.feature.batch_group.as_deref(), Some("auth"));
    assert!(job.payload.retry_on_fail);
}

#[tokio::test]
async fn off_peak_jobs_are_delayed() {
    let queue = queue_with(fast_settings()).await;
    let before = Utc::now();
    let plan = EnqueuePlan {
        schedule: Schedule::OffPeak,
        ..EnqueuePlan::default()
    };
    let batch = queue
        .add_all(vec![feature("NIGHT", Priority::Medium)], &plan)
        .await
        .unwrap();
    let at = batch.run_at.unwrap();
    assert!(at > before);
    assert!(at <= before + chrono::Duration::hours(25));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.waiting, 0);
}

#[tokio::test]
async fn explicit_time_and_single_attempt_apply_to_all() {
    let queue = queue_with(fast_settings()).await;
    let at = Utc::now() + chrono::Duration::hours(3);
    let plan = EnqueuePlan {
        schedule: Schedule::At(at),
        retry_on_fail: false,
        ..EnqueuePlan::default()
    };
    let batch = queue
        .add_all(
            vec![feature("X", Priority::High), feature("Y", Priority::Low)],
            &plan,
        )
        .await
        .unwrap();
    assert_eq!(batch.run_at, Some(at));

    let job = queue.store().get("Y").await.unwrap().unwrap();
    assert!(!job.payload.retry_on_fail);
    assert_eq!(job.max_attempts, 1);
    assert_eq!(queue.stats().await.unwrap().delayed, 2);
}

#[tokio::test]
async fn drain_removes_waiting_and_delayed() {
    let queue = queue_with(fast_settings()).await;
    queue.add_feature(feature("A", Priority::High)).await.unwrap();
    queue.add_feature(feature("B", Priority::Low)).await.unwrap();
    queue
        .add(
            QueuedFeature::new(feature("C", Priority::Low))
                .scheduled_at(Utc::now() + chrono::Duration::hours(1)),
        )
        .await
        .unwrap();

    assert_eq!(queue.drain().await.unwrap(), 3);
    assert_eq!(queue.stats().await.unwrap(), QueueCounts::default());
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn processes_by_priority_then_fifo() {
    let queue = queue_with(fast_settings()).await;
    for (id, p) in [
        ("low", Priority::Low),
        ("med-1", Priority::Medium),
        ("crit", Priority::Critical),
        ("med-2", Priority::Medium),
        ("high", Priority::High),
    ] {
        queue.add_feature(feature(id, p)).await.unwrap();
    }

    let processor = Recording::succeeding();
    run_until(&queue, processor.clone(), |c| c.completed == 5).await;
    assert_eq!(processor.seen(), vec!["crit", "high", "med-1", "med-2", "low"]);

    let job = queue.store().get("crit").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["feature_id"], "crit");
    assert_eq!(result["ready_for_production"], true);
    assert_eq!(result["cost"], 0.15);
}

#[tokio::test]
async fn delayed_job_waits_for_its_time() {
    let queue = queue_with(fast_settings()).await;
    queue
        .add(
            QueuedFeature::new(feature("later", Priority::Critical))
                .scheduled_at(Utc::now() + chrono::Duration::milliseconds(150)),
        )
        .await
        .unwrap();
    queue.add_feature(feature("now", Priority::Low)).await.unwrap();

    let processor = Recording::succeeding();
    run_until(&queue, processor.clone(), |c| c.completed == 2).await;
    assert_eq!(processor.seen(), vec!["now", "later"]);
}

#[tokio::test]
async fn transient_failures_retry_with_backoff() {
    let queue = queue_with(fast_settings()).await;
    queue.add_feature(feature("FLAKY", Priority::Medium)).await.unwrap();

    let processor = Recording::new(|f, previous| {
        if previous < 2 {
            Err(JobError::Transient("provider hiccup".into()))
        } else {
            Ok(metrics(f))
        }
    });
    run_until(&queue, processor.clone(), |c| c.completed == 1).await;

    assert_eq!(processor.seen().len(), 3);
    let job = queue.store().get("FLAKY").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 3);
}

#[tokio::test]
async fn job_fails_after_last_attempt() {
    let queue = queue_with(fast_settings()).await;
    queue.add_feature(feature("BROKEN", Priority::Medium)).await.unwrap();

    let processor = Recording::new(|_, _| Err(JobError::Transient("still down".into())));
    run_until(&queue, processor.clone(), |c| c.failed == 1).await;

    assert_eq!(processor.seen().len(), 3);
    let job = queue.store().get("BROKEN").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("still down"));
}

#[tokio::test]
async fn no_retry_when_disabled() {
    let queue = queue_with(fast_settings()).await;
    let mut queued = QueuedFeature::new(feature("ONCE", Priority::Medium));
    queued.retry_on_fail = false;
    queue.add(queued).await.unwrap();

    let processor = Recording::new(|_, _| Err(JobError::Transient("nope".into())));
    run_until(&queue, processor.clone(), |c| c.failed == 1).await;
    assert_eq!(processor.seen().len(), 1);
}

#[tokio::test]
async fn budget_exhaustion_fails_without_retry() {
    let queue = queue_with(fast_settings()).await;
    queue.add_feature(feature("COSTLY", Priority::High)).await.unwrap();
    queue.add_feature(feature("NEXT", Priority::Low)).await.unwrap();

    let processor = Recording::new(|f, _| {
        if f.id == "COSTLY" {
            Err(PipelineError::BudgetExhausted {
                spent: 20.0,
                limit: 20.0,
            }
            .into())
        } else {
            Ok(metrics(f))
        }
    });
    run_until(&queue, processor.clone(), |c| c.failed == 1 && c.completed == 1).await;

    assert_eq!(processor.seen(), vec!["COSTLY", "NEXT"]);
    let job = queue.store().get("COSTLY").await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("budget exhausted"));
}

#[tokio::test]
async fn paused_queue_claims_nothing() {
    let queue = queue_with(fast_settings()).await;
    queue.add_feature(feature("HOLD", Priority::High)).await.unwrap();
    queue.pause().await.unwrap();

    let processor = Recording::succeeding();
    run_for(&queue, processor.clone(), Duration::from_millis(60)).await;
    assert!(processor.seen().is_empty());
    assert_eq!(queue.stats().await.unwrap().waiting, 1);

    queue.resume().await.unwrap();
    run_until(&queue, processor.clone(), |c| c.completed == 1).await;
    assert_eq!(processor.seen(), vec!["HOLD"]);
}

#[tokio::test]
async fn hourly_limit_caps_starts() {
    let queue = queue_with(QueueSettings {
        rate_limit: RateLimitConfig::per_hour(2),
        ..fast_settings()
    })
    .await;
    for id in ["A", "B", "C"] {
        queue.add_feature(feature(id, Priority::Medium)).await.unwrap();
    }

    let processor = Recording::succeeding();
    let shutdown = ShutdownSignal::new();
    let worker = {
        let queue = queue.clone();
        let processor: Arc<dyn FeatureProcessor> = processor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { queue.run_worker(processor, shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.trigger();
    worker.await.unwrap();

    assert_eq!(processor.seen(), vec!["A", "B"]);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.waiting, 1);
}

#[tokio::test]
async fn interrupted_job_is_recovered() {
    let queue = queue_with(fast_settings()).await;
    queue.add_feature(feature("CRASHED", Priority::High)).await.unwrap();

    // A previous process claimed it and died.
    let claimed = queue.store().claim_next(Utc::now()).await.unwrap().unwrap();
    assert_eq!(claimed.id, "CRASHED");
    assert_eq!(queue.stats().await.unwrap().active, 1);

    let processor = Recording::succeeding();
    run_until(&queue, processor.clone(), |c| c.completed == 1).await;

    let job = queue.store().get("CRASHED").await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(processor.seen(), vec!["CRASHED"]);
}
