//! agent-foundry daemon: processes queued features until interrupted.

use std::path::PathBuf;

use af_core::config::Config;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "af-daemon", version, about = "agent-foundry feature worker")]
struct Args {
    /// Config file (default: ~/.agent-foundry/config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    af_telemetry::init_from_config("af-daemon", &config.general);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "agent-foundry daemon starting"
    );

    let daemon = af_daemon::Daemon::new(config).await?;
    let shutdown = daemon.shutdown_handle();

    // Wire ctrl-c and SIGTERM to trigger graceful shutdown.
    tokio::spawn(async move {
        if !wait_for_signal().await {
            return;
        }
        info!("termination signal received, initiating shutdown");
        shutdown.trigger();
    });

    daemon.run().await
}

/// Resolves with `false` when no signal can be listened for.
async fn ctrl_c() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            false
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for SIGTERM");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        ok = ctrl_c() => ok,
        _ = term.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    ctrl_c().await
}
