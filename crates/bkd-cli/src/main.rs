// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `bkdctl` — a thin formatting layer over the admin operations
//! `bkd-daemon::AdminApi` exposes (spec.md §6). Outside the core's scope is
//! any real IPC to a *running* daemon process, since the work queue is an
//! in-memory, per-process structure; this CLI instead assembles its own
//! ephemeral daemon from the same job/destination/provider definitions an
//! operator would otherwise feed the long-running process, performs the
//! requested operation, and exits — the same shape an HTTP admin handler
//! would wrap, minus the transport.

use anyhow::{Context, Result};
use bkd_config::{load_config, BackupConfig};
use bkd_core::{BackupJob, CredentialProvider, Destination};
use bkd_daemon::{Daemon, InMemoryJobStore};
use bkd_queue::EntryState;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "bkdctl", version, about = "Backup execution core admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file containing a `BackupJob[]` array. Loaded into an ephemeral
    /// in-process job store before the command runs.
    #[arg(long, global = true)]
    jobs: Option<PathBuf>,

    /// JSON file containing a `Destination[]` array.
    #[arg(long, global = true)]
    destinations: Option<PathBuf>,

    /// JSON file containing a `CredentialProvider[]` array.
    #[arg(long, global = true)]
    providers: Option<PathBuf>,

    /// Optional TOML config overlay, same contract as `bkd-daemon --config`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of a human-readable summary.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue operations (spec.md §6 admin surface).
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Scheduled (repeatable) entry listing.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Worker pool occupancy.
    Workers {
        #[command(subcommand)]
        action: WorkersAction,
    },
    /// Parse and validate a cron expression without scheduling anything.
    ValidateCron {
        /// The expression to check.
        expr: String,
    },
    /// Run a single job's fan-out once, in-process, without going through
    /// the queue or scheduler.
    Run {
        /// The job id to execute (must be present in `--jobs`).
        job_id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Point-in-time counts for a channel.
    Stats {
        #[arg(long, default_value = "backup-jobs")]
        channel: String,
    },
    /// Page through entries across all channels in a given state, oldest
    /// first (the queue's `get_*` operations are not channel-scoped).
    List {
        #[arg(value_enum)]
        state: EntryStateArg,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Stop new pickups on a channel.
    Pause {
        #[arg(long, default_value = "backup-jobs")]
        channel: String,
    },
    /// Resume pickups on a channel.
    Resume {
        #[arg(long, default_value = "backup-jobs")]
        channel: String,
    },
    /// Drop all waiting entries on a channel.
    Drain {
        #[arg(long, default_value = "backup-jobs")]
        channel: String,
    },
    /// Remove terminal entries older than the given number of seconds.
    Clean {
        #[arg(value_enum)]
        state: EntryStateArg,
        #[arg(long, default_value_t = 86_400)]
        older_than_secs: i64,
    },
    /// Re-queue every failed entry on a channel.
    RetryFailed {
        #[arg(long, default_value = "backup-jobs")]
        channel: String,
    },
    /// Remove a single queue entry outright, in any state.
    RemoveJob {
        /// The queue entry id (not the `BackupJob` id).
        entry_id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
enum ScheduleAction {
    /// List every registered repeatable schedule.
    List,
}

#[derive(Subcommand, Debug)]
enum WorkersAction {
    /// Active-count for both worker pools.
    Info,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EntryStateArg {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl From<EntryStateArg> for EntryState {
    fn from(value: EntryStateArg) -> Self {
        match value {
            EntryStateArg::Waiting => EntryState::Waiting,
            EntryStateArg::Active => EntryState::Active,
            EntryStateArg::Completed => EntryState::Completed,
            EntryStateArg::Failed => EntryState::Failed,
            EntryStateArg::Delayed => EntryState::Delayed,
        }
    }
}

fn load_json_array<T: serde::de::DeserializeOwned>(path: &Option<PathBuf>) -> Result<Vec<T>> {
    match path {
        None => Ok(Vec::new()),
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
    }
}

async fn build_job_store(cli: &Cli) -> Result<Arc<InMemoryJobStore>> {
    let store = Arc::new(InMemoryJobStore::new());
    for job in load_json_array::<BackupJob>(&cli.jobs)? {
        store.put_job(job).await.context("loading job")?;
    }
    for destination in load_json_array::<Destination>(&cli.destinations)? {
        store.put_destination(destination).await.context("loading destination")?;
    }
    for provider in load_json_array::<CredentialProvider>(&cli.providers)? {
        store.put_credential_provider(provider).await;
    }
    Ok(store)
}

fn print_result(json_mode: bool, value: &serde_json::Value, human: impl FnOnce() -> String) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(value).expect("serializing admin result"));
    } else {
        println!("{}", human());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new("bkd=warn")).init();
    let cli = Cli::parse();

    if let Commands::ValidateCron { expr } = &cli.command {
        let schedule = bkd_queue::Schedule::Cron(expr.clone());
        if schedule.is_valid() {
            println!("valid");
            return Ok(());
        } else {
            anyhow::bail!("invalid cron expression: {expr}");
        }
    }

    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    if config.encryption_secret.is_none() {
        // bkdctl's admin/queue/schedule/workers surface never touches
        // credential decryption; only `run` does, and it will fail loudly
        // there if this is still unset.
        config.encryption_secret = Some("bkdctl-ephemeral-placeholder-0000000000".to_string());
    }

    let job_store = build_job_store(&cli).await?;
    let history: Arc<dyn bkd_history::RunHistoryStore> = Arc::new(bkd_history::InMemoryHistoryStore::new());
    let daemon = Daemon::new(job_store.clone(), history, &config);
    daemon.reconcile().await.context("reconciling schedules")?;

    match cli.command {
        Commands::ValidateCron { .. } => unreachable!("handled above"),
        Commands::Queue { action } => run_queue_action(&daemon, action, cli.json),
        Commands::Schedule { action: ScheduleAction::List } => run_schedule_list(&daemon, cli.json),
        Commands::Workers { action: WorkersAction::Info } => run_workers_info(&daemon, cli.json),
        Commands::Run { job_id } => run_once(&daemon, job_store, &config, job_id, cli.json).await?,
    }

    Ok(())
}

fn run_queue_action(daemon: &Daemon, action: QueueAction, json_mode: bool) {
    let admin = daemon.admin();
    match action {
        QueueAction::Stats { channel } => {
            let stats = admin.queue_stats(&channel);
            print_result(json_mode, &serde_json::to_value(stats).unwrap(), || {
                format!(
                    "{channel}: waiting={} active={} completed={} failed={} delayed={} paused={}",
                    stats.waiting, stats.active, stats.completed, stats.failed, stats.delayed, stats.paused
                )
            });
        }
        QueueAction::List { state, offset, limit } => {
            let entries = admin.queue_list(state.into(), offset, limit);
            print_result(json_mode, &serde_json::to_value(&entries).unwrap(), || {
                entries.iter().map(|e| format!("{}\t{}\t{}", e.id, e.channel, e.name)).collect::<Vec<_>>().join("\n")
            });
        }
        QueueAction::Pause { channel } => {
            admin.pause(&channel);
            print_result(json_mode, &serde_json::json!({"paused": channel}), || format!("paused {channel}"));
        }
        QueueAction::Resume { channel } => {
            admin.resume(&channel);
            print_result(json_mode, &serde_json::json!({"resumed": channel}), || format!("resumed {channel}"));
        }
        QueueAction::Drain { channel } => {
            let removed = admin.drain(&channel);
            print_result(json_mode, &serde_json::json!({"removed": removed}), || format!("drained {removed} waiting entries from {channel}"));
        }
        QueueAction::Clean { state, older_than_secs } => {
            let removed = admin.clean(state.into(), chrono::Duration::seconds(older_than_secs));
            print_result(json_mode, &serde_json::json!({"removed": removed}), || format!("cleaned {removed} entries"));
        }
        QueueAction::RetryFailed { channel } => {
            let retried = admin.retry_all_failed(&channel);
            print_result(json_mode, &serde_json::json!({"retried": retried}), || format!("retried {retried} failed entries on {channel}"));
        }
        QueueAction::RemoveJob { entry_id } => {
            let removed = admin.remove_entry(entry_id);
            print_result(json_mode, &serde_json::json!({"removed": removed}), || {
                if removed { format!("removed {entry_id}") } else { format!("{entry_id} not found") }
            });
        }
    }
}

fn run_schedule_list(daemon: &Daemon, json_mode: bool) {
    let admin = daemon.admin();
    let repeatables = admin.schedule_list();
    print_result(json_mode, &serde_json::to_value(&repeatables).unwrap(), || {
        repeatables.iter().map(|r| format!("{}\t{}\tnext={}", r.key, r.channel, r.next_at)).collect::<Vec<_>>().join("\n")
    });
}

fn run_workers_info(daemon: &Daemon, json_mode: bool) {
    let admin = daemon.admin();
    let info = admin.workers_info();
    print_result(json_mode, &serde_json::to_value(info.iter().map(|w| (w.channel.clone(), w.active)).collect::<std::collections::BTreeMap<_, _>>()).unwrap(), || {
        info.iter().map(|w| format!("{}: active={}", w.channel, w.active)).collect::<Vec<_>>().join("\n")
    });
}

async fn run_once(daemon: &Daemon, job_store: Arc<InMemoryJobStore>, config: &BackupConfig, job_id: Uuid, json_mode: bool) -> Result<()> {
    let executor_config = bkd_executor::ExecutorConfig {
        temp_dir: PathBuf::from(&config.temp_backup_dir),
        default_backup_dir: PathBuf::from(&config.backup_dir),
        heartbeat_interval: bkd_history::defaults::HEARTBEAT_INTERVAL,
    };
    let job_store: Arc<dyn bkd_executor::JobStore> = job_store;
    let executor = bkd_executor::Executor::new(
        job_store,
        daemon.history(),
        Arc::new(bkd_daemon::process::ProcessDumpTool::default()),
        Arc::new(bkd_daemon::object_store::UnconfiguredObjectStoreFactory),
        Arc::new(bkd_executor::LoggingSink),
        executor_config,
    );
    let summary = executor
        .execute_job(job_id, tokio_util::sync::CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .context("executing job")?;

    print_result(
        json_mode,
        &serde_json::json!({"run_id": summary.run_id, "has_failures": summary.has_failures}),
        || format!("run {} finished (has_failures={})", summary.run_id, summary.has_failures),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkd_core::{JobDestination, RedisConfig, SourceConfig, SourceType};
    use std::io::Write;

    #[test]
    fn entry_state_arg_maps_onto_every_entry_state() {
        assert_eq!(EntryState::from(EntryStateArg::Waiting), EntryState::Waiting);
        assert_eq!(EntryState::from(EntryStateArg::Failed), EntryState::Failed);
        assert_eq!(EntryState::from(EntryStateArg::Delayed), EntryState::Delayed);
    }

    #[test]
    fn load_json_array_with_no_path_is_empty() {
        let jobs: Vec<BackupJob> = load_json_array(&None).unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn build_job_store_loads_jobs_from_file() {
        let job = BackupJob {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            source_type: SourceType::Redis,
            config: SourceConfig::Redis(RedisConfig { host: "h".to_string(), port: 6379, password: None, database: 0 }),
            cron: Some("0 0 * * * *".to_string()),
            enabled: true,
            retention_days: 7,
            retry_count: 3,
            source_credential_provider_id: None,
            destinations: vec![JobDestination { destination_id: Uuid::new_v4(), notify_on_success: false, notify_on_failure: true }],
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&[job]).unwrap()).unwrap();

        let cli = Cli {
            command: Commands::Schedule { action: ScheduleAction::List },
            jobs: Some(file.path().to_path_buf()),
            destinations: None,
            providers: None,
            config: None,
            json: false,
        };
        let store = build_job_store(&cli).await.unwrap();
        assert_eq!(store.all_jobs().await.len(), 1);
    }
}
