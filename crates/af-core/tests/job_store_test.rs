//! Durable job store: ordering, idempotency, delays, retries and retention.

use af_core::job_store::{EnqueueOutcome, JobStatus, JobStore, Retention};
use af_core::types::{Complexity, FeatureRequest, Priority, QueuedFeature};
use chrono::{Duration, Utc};

fn queued(id: &str, priority: Priority) -> QueuedFeature {
    QueuedFeature::new(FeatureRequest::new(id, id, Complexity::Simple, priority))
}

#[tokio::test]
async fn claims_by_priority_then_fifo() {
    let store = JobStore::new_in_memory().await.unwrap();
    let now = Utc::now();
    store.enqueue(&queued("low", Priority::Low), 3, now).await.unwrap();
    store.enqueue(&queued("high-1", Priority::High), 3, now).await.unwrap();
    store.enqueue(&queued("crit", Priority::Critical), 3, now).await.unwrap();
    store.enqueue(&queued("high-2", Priority::High), 3, now).await.unwrap();

    let mut order = Vec::new();
    while let Some(job) = store.claim_next(Utc::now()).await.unwrap() {
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempts, 1);
        order.push(job.id.clone());
        store.complete(&job.id, &serde_json::json!({})).await.unwrap();
    }
    assert_eq!(order, vec!["crit", "high-1", "high-2", "low"]);
}

#[tokio::test]
async fn duplicate_enqueue_is_noop() {
    let store = JobStore::new_in_memory().await.unwrap();
    let now = Utc::now();
    let first = store.enqueue(&queued("F-1", Priority::Low), 3, now).await.unwrap();
    let mut again = queued("F-1", Priority::Critical);
    again.feature.title = "changed".into();
    let second = store.enqueue(&again, 3, now).await.unwrap();

    assert_eq!(first, EnqueueOutcome::Created);
    assert_eq!(second, EnqueueOutcome::Duplicate);
    let job = store.get("F-1").await.unwrap().unwrap();
    assert_eq!(job.payload.feature.title, "F-1");
    assert_eq!(job.priority, 4);
    assert_eq!(store.counts(now).await.unwrap().waiting, 1);
}

#[tokio::test]
async fn duplicate_while_active_is_noop() {
    let store = JobStore::new_in_memory().await.unwrap();
    store.enqueue(&queued("F-1", Priority::Low), 3, Utc::now()).await.unwrap();
    let _claimed = store.claim_next(Utc::now()).await.unwrap().unwrap();
    let outcome = store
        .enqueue(&queued("F-1", Priority::Low), 3, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Duplicate);
}

#[tokio::test]
async fn finished_job_can_be_requeued() {
    let store = JobStore::new_in_memory().await.unwrap();
    store.enqueue(&queued("F-1", Priority::Low), 3, Utc::now()).await.unwrap();
    let job = store.claim_next(Utc::now()).await.unwrap().unwrap();
    store.fail(&job.id, "boom", None).await.unwrap();

    let outcome = store
        .enqueue(&queued("F-1", Priority::Low), 3, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Created);
    let job = store.get("F-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn delayed_jobs_wait_for_their_time() {
    let store = JobStore::new_in_memory().await.unwrap();
    let now = Utc::now();
    let later = now + Duration::hours(1);
    store.enqueue(&queued("later", Priority::Critical), 3, later).await.unwrap();

    assert!(store.claim_next(now).await.unwrap().is_none());
    let counts = store.counts(now).await.unwrap();
    assert_eq!(counts.delayed, 1);
    assert_eq!(counts.waiting, 0);
    assert_eq!(
        store.next_run_at().await.unwrap().map(|t| t.timestamp_millis()),
        Some(later.timestamp_millis())
    );

    let job = store.claim_next(later + Duration::seconds(1)).await.unwrap();
    assert_eq!(job.map(|j| j.id), Some("later".to_string()));
}

#[tokio::test]
async fn retry_puts_job_back_with_attempts_counted() {
    let store = JobStore::new_in_memory().await.unwrap();
    let now = Utc::now();
    store.enqueue(&queued("F-1", Priority::Medium), 3, now).await.unwrap();

    let job = store.claim_next(now).await.unwrap().unwrap();
    let retry_at = now + Duration::seconds(5);
    store.fail(&job.id, "transient", Some(retry_at)).await.unwrap();

    assert!(store.claim_next(now).await.unwrap().is_none());
    let job = store.claim_next(retry_at).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("transient"));
}

#[tokio::test]
async fn complete_records_result() {
    let store = JobStore::new_in_memory().await.unwrap();
    store.enqueue(&queued("F-1", Priority::Medium), 3, Utc::now()).await.unwrap();
    let job = store.claim_next(Utc::now()).await.unwrap().unwrap();
    store
        .complete(&job.id, &serde_json::json!({"total_cost": 0.42}))
        .await
        .unwrap();

    let job = store.get("F-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result.unwrap()["total_cost"], 0.42);
    assert_eq!(store.counts(Utc::now()).await.unwrap().completed, 1);
}

#[tokio::test]
async fn recover_active_requeues_interrupted_jobs() {
    let store = JobStore::new_in_memory().await.unwrap();
    store.enqueue(&queued("F-1", Priority::Medium), 3, Utc::now()).await.unwrap();
    store.claim_next(Utc::now()).await.unwrap().unwrap();

    assert_eq!(store.recover_active().await.unwrap(), 1);
    let job = store.get("F-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn drain_removes_waiting_and_delayed_only() {
    let store = JobStore::new_in_memory().await.unwrap();
    let now = Utc::now();
    store.enqueue(&queued("a", Priority::Medium), 3, now).await.unwrap();
    store.enqueue(&queued("b", Priority::Low), 3, now).await.unwrap();
    store
        .enqueue(&queued("c", Priority::Low), 3, now + Duration::hours(2))
        .await
        .unwrap();
    let active = store.claim_next(now).await.unwrap().unwrap();

    assert_eq!(store.drain().await.unwrap(), 2);
    let counts = store.counts(now).await.unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.delayed, 0);
    assert_eq!(counts.active, 1);
    assert_eq!(active.id, "a");
}

#[tokio::test]
async fn prune_applies_retention() {
    let store = JobStore::new_in_memory().await.unwrap();
    for i in 0..4 {
        let id = format!("F-{i}");
        store.enqueue(&queued(&id, Priority::Medium), 3, Utc::now()).await.unwrap();
        let job = store.claim_next(Utc::now()).await.unwrap().unwrap();
        store.complete(&job.id, &serde_json::json!({})).await.unwrap();
    }
    let retention = Retention {
        completed_age: Duration::days(1),
        completed_keep: 2,
        failed_age: Duration::days(7),
    };
    assert_eq!(store.prune_finished(Utc::now(), retention).await.unwrap(), 2);
    assert_eq!(store.counts(Utc::now()).await.unwrap().completed, 2);

    // Everything is older than the cutoff a week from now.
    let removed = store
        .prune_finished(Utc::now() + Duration::days(7), retention)
        .await
        .unwrap();
    assert_eq!(removed, 2);
}

#[tokio::test]
async fn pause_flag_persists_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let store = JobStore::new(&path).await.unwrap();
    assert!(!store.is_paused().await.unwrap());
    store.set_paused(true).await.unwrap();

    let other = JobStore::new(&path).await.unwrap();
    assert!(other.is_paused().await.unwrap());
    other.set_paused(false).await.unwrap();
    assert!(!store.is_paused().await.unwrap());
}
