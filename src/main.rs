//! memscope: replay recorded memory profiler streams and check heap dump
//! budgets.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use memscope::capture::budget::{can_safely_load_hprof, MemoryFigures};
use memscope::config::ProfilerConfig;
use memscope::replay::{replay, ReplayFile};

#[derive(Debug, Parser)]
#[command(name = "memscope")]
#[command(about = "Memory profiler capture pipeline")]
#[command(version)]
struct Command {
    #[arg(short, long)]
    verbose: bool,
    /// JSON profiler configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Replay a recorded agent stream and print every capture it holds
    Replay {
        /// Path to the replay file
        file: PathBuf,
    },
    /// Report whether a heap dump of SIZE bytes can be loaded on this host
    CheckHprof { size: u64 },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

fn check_hprof(config: &ProfilerConfig, size: u64) {
    let figures = MemoryFigures::current();
    let fits = can_safely_load_hprof(
        size,
        &figures,
        config.hprof_safe_factor,
        config.hprof_leeway_bytes,
    );
    println!(
        "{} byte heap dump: {} (requestable {} bytes, safe factor {}, leeway {} bytes)",
        size,
        if fits { "can be loaded" } else { "too large" },
        figures.requestable(),
        config.hprof_safe_factor,
        config.hprof_leeway_bytes
    );
}

fn main() -> Result<()> {
    let opts = Command::parse();
    init_logging(opts.verbose);
    let config = ProfilerConfig::load(opts.config.as_deref())?;

    match opts.action {
        Action::Replay { file } => {
            let file = ReplayFile::load(&file)?;
            let mut stdout = io::stdout().lock();
            replay(file, config, &mut stdout)?;
        }
        Action::CheckHprof { size } => check_hprof(&config, size),
    }
    Ok(())
}
