mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use af_core::types::Complexity;
use af_intelligence::cost_model::TestingScope;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// agent-foundry CLI -- queue features for the agent swarm and control the worker.
#[derive(Parser)]
#[command(name = "af", version, about)]
struct Cli {
    /// Config file (default: ~/.agent-foundry/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue counts (default when no subcommand is given).
    Stats,

    /// Queue features from a JSON file (one feature or an array).
    Enqueue {
        file: PathBuf,
        /// Hold the features until the next off-peak hour.
        #[arg(long, conflicts_with = "at")]
        off_peak: bool,
        /// Hold the features until this RFC 3339 time.
        #[arg(long)]
        at: Option<String>,
        /// Tag every feature with a batch group.
        #[arg(long)]
        batch: Option<String>,
        /// Fail on the first error instead of retrying.
        #[arg(long)]
        no_retry: bool,
    },

    /// Stop the worker from starting new features.
    Pause,

    /// Let a paused worker continue.
    Resume,

    /// Remove every waiting and delayed feature.
    Drain,

    /// Print the pre-flight cost estimate for a feature.
    Estimate {
        #[arg(value_enum)]
        complexity: ComplexityArg,
        /// Include the database agent.
        #[arg(long)]
        database: bool,
        #[arg(long, value_enum, default_value = "unit")]
        testing: ScopeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ComplexityArg {
    Simple,
    Medium,
    Complex,
}

impl From<ComplexityArg> for Complexity {
    fn from(arg: ComplexityArg) -> Self {
        match arg {
            ComplexityArg::Simple => Complexity::Simple,
            ComplexityArg::Medium => Complexity::Medium,
            ComplexityArg::Complex => Complexity::Complex,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Unit,
    UnitE2e,
    Comprehensive,
}

impl From<ScopeArg> for TestingScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Unit => TestingScope::Unit,
            ScopeArg::UnitE2e => TestingScope::UnitAndE2e,
            ScopeArg::Comprehensive => TestingScope::Comprehensive,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    af_telemetry::init_logging("af", "warn");

    let config = cli.config.as_deref();
    match cli.command {
        None | Some(Commands::Stats) => commands::control::stats(config).await?,
        Some(Commands::Enqueue {
            file,
            off_peak,
            at,
            batch,
            no_retry,
        }) => {
            let opts = commands::enqueue::EnqueueOptions {
                off_peak,
                at,
                batch,
                retry: !no_retry,
            };
            commands::enqueue::run(config, &file, opts).await?;
        }
        Some(Commands::Pause) => commands::control::pause(config).await?,
        Some(Commands::Resume) => commands::control::resume(config).await?,
        Some(Commands::Drain) => commands::control::drain(config).await?,
        Some(Commands::Estimate {
            complexity,
            database,
            testing,
        }) => commands::estimate::run(complexity.into(), database, testing.into()),
    }

    Ok(())
}
