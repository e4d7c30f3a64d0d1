use std::path::Path;

use af_core::job_store::EnqueueOutcome;
use af_core::types::FeatureRequest;
use af_daemon::queue::{EnqueuePlan, Schedule};
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};

use super::open_queue;

pub struct EnqueueOptions {
    pub off_peak: bool,
    pub at: Option<String>,
    pub batch: Option<String>,
    pub retry: bool,
}

/// Run the `enqueue` subcommand.
pub async fn run(config: Option<&Path>, file: &Path, opts: EnqueueOptions) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let features = parse_features(&raw)
        .with_context(|| format!("{} is not a feature or a list of features", file.display()))?;
    if features.is_empty() {
        bail!("{} contains no features", file.display());
    }

    let schedule = match (&opts.at, opts.off_peak) {
        (Some(at), _) => Schedule::At(parse_time(at)?),
        (None, true) => Schedule::OffPeak,
        (None, false) => Schedule::Now,
    };
    let plan = EnqueuePlan {
        batch_group: opts.batch,
        schedule,
        retry_on_fail: opts.retry,
    };

    let queue = open_queue(config).await?;
    let batch = queue.add_all(features, &plan).await?;
    for (id, outcome) in &batch.outcomes {
        match outcome {
            EnqueueOutcome::Created => println!("queued     {id}"),
            EnqueueOutcome::Duplicate => println!("duplicate  {id} (already waiting or active)"),
        }
    }

    let created = batch.created();
    match batch.run_at {
        Some(at) => println!(
            "{created} feature(s) queued for {}",
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("{created} feature(s) queued"),
    }
    Ok(())
}

/// A feature file holds one feature object or an array of them.
fn parse_features(raw: &str) -> serde_json::Result<Vec<FeatureRequest>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|f| vec![f])
    }
}

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let at = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("--at expects an RFC 3339 time, got {raw:?}"))?;
    Ok(at.with_timezone(&Utc))
}
