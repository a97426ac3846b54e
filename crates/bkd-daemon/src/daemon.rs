// SPDX-License-Identifier: MIT OR Apache-2.0
//! Assembles the queue, worker pools, scheduler, and maintenance entry into
//! one running process (spec.md §2, §5, §6).

use crate::admin::AdminApi;
use crate::maintenance::{MaintenanceHandler, MAINTENANCE_CHANNEL, MAINTENANCE_KEY};
use crate::shutdown;
use async_trait::async_trait;
use bkd_config::BackupConfig;
use bkd_executor::{Executor, ExecutorConfig};
use bkd_history::RunHistoryStore;
use bkd_queue::{EnqueueOptions, QueueEntry, Schedule, WorkQueue};
use bkd_scheduler::{Scheduler, BACKUP_CHANNEL};
use bkd_worker::{JobHandler, WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Adapts the fan-out executor to the generic [`JobHandler`] seam
/// `bkd-worker` drives: pulls `job_id` back out of the advisory payload the
/// scheduler enqueued (spec.md §4.8 step 1) and hands it to [`Executor`].
pub struct BackupJobHandler {
    executor: Arc<Executor>,
    cancel: CancellationToken,
}

impl BackupJobHandler {
    /// Wrap `executor`; `cancel` is forwarded to every run for interface
    /// symmetry with the rest of spec.md §5's suspension points.
    pub fn new(executor: Arc<Executor>, cancel: CancellationToken) -> Self {
        Self { executor, cancel }
    }
}

#[async_trait]
impl JobHandler for BackupJobHandler {
    async fn handle(&self, entry: QueueEntry) -> Result<serde_json::Value, String> {
        let job_id = entry
            .payload
            .get("job_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| "queue entry payload missing a valid job_id".to_string())?;

        let summary = self
            .executor
            .execute_job(job_id, self.cancel.clone())
            .await
            .map_err(|e| e.to_string())?;

        if summary.has_failures {
            return Err(format!("run {} completed with at least one destination failure", summary.run_id));
        }
        Ok(serde_json::json!({ "run_id": summary.run_id }))
    }
}

/// The assembled process: queue, both worker pools, the scheduler, and the
/// admin surface over them.
pub struct Daemon {
    queue: Arc<WorkQueue>,
    scheduler: Arc<Scheduler<crate::store::InMemoryJobStore>>,
    backup_pool: Arc<WorkerPool<BackupJobHandler>>,
    system_pool: Arc<WorkerPool<MaintenanceHandler>>,
    history: Arc<dyn RunHistoryStore>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Wire every component per spec.md §4.3/§4.4/§4.5/§4.8, using
    /// in-process defaults (`InMemoryJobStore`, `ProcessDumpTool`,
    /// `UnconfiguredObjectStoreFactory`) for the seams a production
    /// deployment would supply its own implementations of.
    pub fn new(job_store: Arc<crate::store::InMemoryJobStore>, history: Arc<dyn RunHistoryStore>, config: &BackupConfig) -> Self {
        bkd_history::defaults::assert_consistent();

        let queue = Arc::new(WorkQueue::new([(BACKUP_CHANNEL, 2), (MAINTENANCE_CHANNEL, 1)]));
        let scheduler = Arc::new(Scheduler::new(queue.clone(), job_store.clone()));

        let executor_config = ExecutorConfig {
            temp_dir: std::path::PathBuf::from(&config.temp_backup_dir),
            default_backup_dir: std::path::PathBuf::from(&config.backup_dir),
            heartbeat_interval: bkd_history::defaults::HEARTBEAT_INTERVAL,
        };
        let executor = Arc::new(Executor::new(
            job_store.clone(),
            history.clone(),
            Arc::new(crate::process::ProcessDumpTool::default()),
            Arc::new(crate::object_store::UnconfiguredObjectStoreFactory),
            Arc::new(bkd_executor::LoggingSink),
            executor_config,
        ));

        let cancel = CancellationToken::new();
        let backup_handler = Arc::new(BackupJobHandler::new(executor, cancel.clone()));
        let backup_pool = Arc::new(WorkerPool::new(
            queue.clone(),
            backup_handler,
            WorkerPoolConfig { channel: BACKUP_CHANNEL.to_string(), poll_interval: Duration::from_secs(5) },
        ));

        let maintenance_handler = Arc::new(MaintenanceHandler::new(history.clone(), bkd_history::defaults::reap_threshold()));
        let system_pool = Arc::new(WorkerPool::new(
            queue.clone(),
            maintenance_handler,
            WorkerPoolConfig { channel: MAINTENANCE_CHANNEL.to_string(), poll_interval: Duration::from_secs(5) },
        ));

        Self { queue, scheduler, backup_pool, system_pool, history, cancel }
    }

    /// An admin surface over this daemon's queue and pools.
    pub fn admin(&self) -> AdminApi<BackupJobHandler, MaintenanceHandler> {
        AdminApi::new(self.queue.clone(), self.backup_pool.clone(), self.system_pool.clone())
    }

    /// The token every suspension point in this daemon selects on.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The run history store this daemon's executor and reaper share.
    pub fn history(&self) -> Arc<dyn RunHistoryStore> {
        self.history.clone()
    }

    /// Reconcile schedules from the current job set and register the
    /// maintenance repeatable (spec.md §4.4 startup reconciliation). Safe
    /// to call more than once; idempotent like `Scheduler::initialize_all`.
    pub async fn reconcile(&self) -> Result<bkd_scheduler::ReconcileSummary, bkd_core::error::BackupError> {
        let summary = self.scheduler.initialize_all().await?;
        info!(
            target: "bkd.daemon",
            scheduled = summary.scheduled,
            skipped = summary.skipped,
            "startup reconciliation complete"
        );

        self.queue
            .enqueue_repeatable(
                MAINTENANCE_CHANNEL,
                MAINTENANCE_KEY,
                Schedule::Interval(bkd_history::defaults::MAINTENANCE_LOOP_PERIOD.as_millis() as u64),
                serde_json::json!({}),
                EnqueueOptions { attempts: 1, ..EnqueueOptions::default() },
            )
            .map_err(|e| bkd_core::error::BackupError::SourceExecutionFailure {
                message: format!("failed to register maintenance schedule: {e}"),
                execution_log: None,
            })?;
        Ok(summary)
    }

    /// Reconcile, then run both worker pools until shutdown, draining
    /// in-flight work before returning (spec.md §5).
    pub async fn run(&self) -> Result<(), bkd_core::error::BackupError> {
        self.reconcile().await?;

        let signal_cancel = shutdown::install_signal_handler();
        let internal_cancel = self.cancel.clone();
        tokio::spawn({
            let signal_cancel = signal_cancel.clone();
            let internal_cancel = internal_cancel.clone();
            async move {
                signal_cancel.cancelled().await;
                internal_cancel.cancel();
            }
        });

        // Each pool's own `run` loop already waits for its in-flight tasks
        // to finish once `cancel` fires (spec.md §5 step 3); running them
        // concurrently here just lets both drain in parallel rather than
        // one after the other.
        tokio::join!(
            self.backup_pool.run(self.cancel.clone()),
            self.system_pool.run(self.cancel.clone()),
        );

        info!(target: "bkd.daemon", "all worker pools drained, shutting down");
        Ok(())
    }
}
