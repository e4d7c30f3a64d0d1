pub mod control;
pub mod enqueue;
pub mod estimate;

use std::path::Path;

use af_core::config::Config;
use af_core::job_store::JobStore;
use af_daemon::queue::{FeatureQueue, QueueSettings};
use anyhow::Context;

/// Load config from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::load_from(p).with_context(|| format!("failed to load {}", p.display())),
        None => Config::load().context("failed to load config"),
    }
}

/// Open the durable queue the daemon works from.
pub async fn open_queue(config_path: Option<&Path>) -> anyhow::Result<FeatureQueue> {
    let config = load_config(config_path)?;
    let store = JobStore::new(&config.queue.store_path)
        .await
        .with_context(|| {
            format!(
                "could not open the queue store at {}\n  \
                 (hint: set QUEUE_STORE or queue.store_path in the config)",
                config.queue.store_path
            )
        })?;
    Ok(FeatureQueue::new(store, QueueSettings::from(&config.queue)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_core::types::{Complexity, FeatureRequest, Priority};

    fn write_config(dir: &Path) -> std::path::PathBuf {
        let store = dir.join("queue.db");
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            format!("[queue]\nstore_path = {:?}\nattempts = 2\n", store.display().to_string()),
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn queue_persists_between_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());

        let queue = open_queue(Some(&config)).await.unwrap();
        assert_eq!(queue.settings().attempts, 2);
        queue
            .add_feature(FeatureRequest::new("FEAT-1", "Login", Complexity::Simple, Priority::Medium))
            .await
            .unwrap();
        queue.pause().await.unwrap();
        drop(queue);

        let reopened = open_queue(Some(&config)).await.unwrap();
        assert_eq!(reopened.stats().await.unwrap().waiting, 1);
        assert!(reopened.store().is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_file_lands_in_the_shared_queue() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_config(dir.path());
        let file = dir.path().join("features.json");
        std::fs::write(
            &file,
            r#"[
                {"id": "A", "title": "a", "description": "a", "complexity": "simple", "priority": "low"},
                {"id": "B", "title": "b", "description": "b", "complexity": "medium", "priority": "high"}
            ]"#,
        )
        .unwrap();

        let opts = enqueue::EnqueueOptions {
            off_peak: true,
            at: None,
            batch: Some("auth".into()),
            retry: false,
        };
        enqueue::run(Some(&config), &file, opts).await.unwrap();

        let queue = open_queue(Some(&config)).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().delayed, 2);
        let job = queue.store().get("B").await.unwrap().unwrap();
        assert_eq!(job.payload.feature.batch_group.as_deref(), Some("auth"));
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
