// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use bkd_config::{advisory_warnings, load_config, Mode};
use bkd_daemon::{store::InMemoryJobStore, Daemon};
use bkd_history::InMemoryHistoryStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bkd-daemon", version, about = "Backup execution core daemon")]
struct Args {
    /// Optional TOML config overlay, applied before environment overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug-level tracing for the `bkd` target family.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("bkd=debug")
    } else {
        EnvFilter::new("bkd=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(args.config.as_deref()).context("loading configuration")?;
    config.validate().context("validating configuration")?;
    for warning in advisory_warnings(&config) {
        warn!(target: "bkd.daemon", %warning, "configuration advisory");
    }

    let mode = config.mode();
    info!(target: "bkd.daemon", ?mode, "starting");
    if !mode.runs_workers() {
        info!(target: "bkd.daemon", "MODE does not run workers in this process, exiting");
        return Ok(());
    }

    // Standalone defaults: an empty in-memory job store and run history.
    // A deployment with a real job database wires its own `JobStore`/
    // `JobSource`/`RunHistoryStore` implementations in place of these
    // (spec.md §1: the SQL schema behind jobs/destinations/providers is
    // opaque to the core).
    let job_store = Arc::new(InMemoryJobStore::new());
    let history: Arc<dyn bkd_history::RunHistoryStore> = Arc::new(InMemoryHistoryStore::new());

    let daemon = Daemon::new(job_store, history, &config);
    daemon.run().await.map_err(|e| anyhow::anyhow!(e.to_string())).context("running daemon")
}
