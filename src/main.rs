//! # spsync CLI
//!
//! The `spsync` binary runs sync cycles against a SharePoint farm and
//! pushes the results to a search sink.
//!
//! ## Usage
//!
//! ```bash
//! spsync --config ./config/spsync.toml <mode> [--once]
//! ```
//!
//! | Mode | Description |
//! |------|-------------|
//! | `incremental` | Crawl each collection from its checkpoint to now |
//! | `full_sync` | Re-crawl everything from the configured start time |
//!
//! Without `--once` the chosen mode repeats on its configured interval.
//!
//! Credentials come from the environment: `SHAREPOINT_USERNAME` and
//! `SHAREPOINT_PASSWORD` for the source, `SPSYNC_SINK_TOKEN` for the
//! sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use spsync::checkpoint::SyncMode;
use spsync::config::{load_config, Config};
use spsync::coordinator::Coordinator;
use spsync::sink::SearchSink;
use spsync::source::HttpSource;

#[derive(Parser)]
#[command(
    name = "spsync",
    about = "spsync — an incremental SharePoint connector for a search index",
    version,
    long_about = "spsync crawls SharePoint site collections hierarchically, resolves role \
    assignments into document permission labels, and keeps a search index in step with the \
    source through windowed incremental cycles and periodic full re-syncs."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/spsync.toml`. Source, sink, scheduling,
    /// and field projection settings are all read from this file.
    #[arg(long, global = true, default_value = "./config/spsync.toml")]
    config: PathBuf,

    /// Which kind of cycle to run.
    mode: Mode,

    /// Run a single cycle and exit instead of looping on the interval.
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Crawl each collection from its last checkpoint to now.
    Incremental,
    /// Re-crawl everything and reconcile deletions.
    #[value(name = "full_sync")]
    FullSync,
}

impl From<Mode> for SyncMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Incremental => SyncMode::Incremental,
            Mode::FullSync => SyncMode::FullSync,
        }
    }
}

fn interval_for(mode: SyncMode, config: &Config) -> Duration {
    let minutes = match mode {
        SyncMode::Incremental => config.sync.incremental_interval_mins,
        SyncMode::FullSync => config.sync.full_sync_interval_mins,
    };
    Duration::from_secs(minutes * 60)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let mode = SyncMode::from(cli.mode);

    let source = Arc::new(HttpSource::from_config(&config.sharepoint)?);
    let sink = Arc::new(SearchSink::from_config(&config.sink)?);
    let interval = interval_for(mode, &config);
    let coordinator = Coordinator::new(config, source, sink);

    loop {
        let report = coordinator.run_cycle(mode, Utc::now()).await?;
        println!(
            "{} cycle: {} documents indexed, {} deleted, {} collection(s) failed",
            mode.as_str(),
            report.documents_indexed,
            report.documents_deleted,
            report.collections_failed.len()
        );
        if cli.once {
            break;
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}
