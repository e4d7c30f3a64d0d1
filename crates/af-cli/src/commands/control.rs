use std::path::Path;

use af_core::job_store::QueueCounts;

use super::open_queue;

/// Run the `stats` subcommand: print queue counts and the pause flag.
pub async fn stats(config: Option<&Path>) -> anyhow::Result<()> {
    let queue = open_queue(config).await?;
    let counts = queue.stats().await?;
    let paused = queue.store().is_paused().await?;
    let next = queue.store().next_run_at().await?;

    println!("{}", render_stats(&counts, paused));
    if let Some(at) = next {
        println!("  next run   {}", at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}

pub async fn pause(config: Option<&Path>) -> anyhow::Result<()> {
    open_queue(config).await?.pause().await?;
    println!("queue paused; the active feature, if any, will finish");
    Ok(())
}

pub async fn resume(config: Option<&Path>) -> anyhow::Result<()> {
    open_queue(config).await?.resume().await?;
    println!("queue resumed");
    Ok(())
}

pub async fn drain(config: Option<&Path>) -> anyhow::Result<()> {
    let removed = open_queue(config).await?.drain().await?;
    println!("removed {removed} waiting feature(s)");
    Ok(())
}

fn render_stats(c: &QueueCounts, paused: bool) -> String {
    let state = if paused { "paused" } else { "running" };
    format!(
        "queue ({state})\n  \
         waiting    {}\n  \
         delayed    {}\n  \
         active     {}\n  \
         completed  {}\n  \
         failed     {}",
        c.waiting, c.delayed, c.active, c.completed, c.failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_table_lists_every_count() {
        let counts = QueueCounts {
            waiting: 2,
            active: 1,
            completed: 7,
            failed: 0,
            delayed: 3,
        };
        let out = render_stats(&counts, true);
        assert!(out.starts_with("queue (paused)"));
        assert!(out.contains("waiting    2"));
        assert!(out.contains("delayed    3"));
        assert!(out.contains("completed  7"));
    }
}
