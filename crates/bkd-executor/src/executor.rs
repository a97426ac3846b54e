// SPDX-License-Identifier: MIT OR Apache-2.0
//! The fan-out algorithm (spec.md §4.8).

use crate::job_store::JobStore;
use crate::notification::{DestinationEvent, DestinationStatus, EventKind, NotificationEvent, NotificationSink};
use crate::object_store::{ObjectStoreClientFactory, UnusedObjectStore};
use bkd_core::error::BackupError;
use bkd_core::{BackupJob, Destination, DestinationConfig, SourceConfig, SourceType};
use bkd_source::{DestinationBundle, DumpTool, ObjectStoreClient, OutputTarget, TempFileArea};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Working directories and timing knobs the executor needs that aren't
/// part of the domain model (spec.md §6: `TEMP_BACKUP_DIR`, `BACKUP_DIR`).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Scratch area for the execute-once-copy-many temporary artifact.
    pub temp_dir: PathBuf,
    /// Default local destination for a zero-destination database job.
    pub default_backup_dir: PathBuf,
    /// Heartbeat cadence while an outcome is `running` (spec.md §4.8 step 6).
    pub heartbeat_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("bkd"),
            default_backup_dir: PathBuf::from("/var/backups/bkd"),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// What one queue pickup produced, handed back to the caller (typically a
/// `bkd-worker::JobHandler`) so it can decide the queue entry's outcome.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSummary {
    /// The run this pickup created.
    pub run_id: Uuid,
    /// `true` iff at least one destination outcome failed (spec.md §4.8
    /// step 7: drives whether the queue entry is failed for retry).
    pub has_failures: bool,
}

struct DestinationResult {
    name: String,
    success: bool,
    file_size: Option<u64>,
    file_path: Option<String>,
    error: Option<String>,
}

/// Fans a picked-up job out across its source strategy and destinations.
pub struct Executor {
    job_store: Arc<dyn JobStore>,
    history: Arc<dyn bkd_history::RunHistoryStore>,
    dump_tool: Arc<dyn DumpTool>,
    object_store_factory: Arc<dyn ObjectStoreClientFactory>,
    notifications: Arc<dyn NotificationSink>,
    config: ExecutorConfig,
}

impl Executor {
    /// Wire an executor from its collaborators.
    pub fn new(
        job_store: Arc<dyn JobStore>,
        history: Arc<dyn bkd_history::RunHistoryStore>,
        dump_tool: Arc<dyn DumpTool>,
        object_store_factory: Arc<dyn ObjectStoreClientFactory>,
        notifications: Arc<dyn NotificationSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self { job_store, history, dump_tool, object_store_factory, notifications, config }
    }

    /// Run the full fan-out for `job_id` (spec.md §4.8).
    ///
    /// Graceful shutdown is drain-based, matching `bkd-worker`'s pool: once
    /// a pickup starts, `cancel` firing mid-run does not abort it — the
    /// worker pool already waits for in-flight tasks before exiting. The
    /// token is accepted for interface symmetry with the other suspension
    /// points in spec.md §5 and so a future subprocess-level cancellation
    /// (sending the dump tool SIGTERM, per spec.md §9) has something to
    /// hook into; today it is not consulted mid-run.
    pub async fn execute_job(&self, job_id: Uuid, cancel: CancellationToken) -> Result<ExecutionSummary, BackupError> {
        let run_id = Uuid::new_v4();
        let start = Instant::now();

        let Some(mut job) = self.job_store.fetch_job(job_id).await? else {
            return Err(BackupError::JobMissing(job_id));
        };

        self.merge_source_credentials(&mut job).await?;

        let mut destinations = Vec::with_capacity(job.destinations.len());
        for jd in &job.destinations {
            match self.job_store.fetch_destination(jd.destination_id).await? {
                Some(dest) => destinations.push(dest),
                None => warn!(
                    target: "bkd.executor",
                    job_id = %job.id,
                    destination_id = %jd.destination_id,
                    "job references a destination that no longer exists, skipping"
                ),
            }
        }

        let results = if job.source_type == SourceType::S3 {
            if destinations.is_empty() {
                return Err(BackupError::SourceExecutionFailure {
                    message: "S3 backup requires at least one destination".to_string(),
                    execution_log: None,
                });
            }
            self.run_s3_per_destination(run_id, &job, &destinations, &cancel).await?
        } else if destinations.is_empty() {
            vec![self.run_database_zero_destinations(run_id, &job, &cancel).await?]
        } else {
            self.run_database_copy_many(run_id, &job, &destinations, &cancel).await?
        };

        let has_failures = results.iter().any(|r| !r.success);
        let event = build_notification(&job, &results, start.elapsed().as_secs_f64());
        self.notifications.notify(event).await;

        info!(
            target: "bkd.executor",
            job_id = %job.id,
            run_id = %run_id,
            has_failures,
            destinations = results.len(),
            "run finished"
        );

        Ok(ExecutionSummary { run_id, has_failures })
    }

    async fn merge_source_credentials(&self, job: &mut BackupJob) -> Result<(), BackupError> {
        if job.source_type != SourceType::S3 {
            return Ok(());
        }
        let Some(provider_id) = job.source_credential_provider_id else {
            return Ok(());
        };
        let provider = self
            .job_store
            .fetch_credential_provider(provider_id)
            .await?
            .ok_or(BackupError::CredentialMissing(provider_id))?;
        let creds = bkd_credential::resolve(&provider)?;

        let SourceConfig::S3(cfg) = &mut job.config else {
            return Ok(());
        };
        cfg.endpoint = creds.endpoint.clone();
        cfg.region = Some(creds.region.clone());
        cfg.access_key_id = Some(creds.access_key_id.to_string());
        cfg.secret_access_key = bkd_core::EncryptedString::new(creds.secret_access_key.to_string());
        Ok(())
    }

    async fn source_object_store(&self, job: &BackupJob) -> Result<Arc<dyn ObjectStoreClient>, BackupError> {
        let SourceConfig::S3(cfg) = &job.config else {
            return Err(BackupError::SourceExecutionFailure {
                message: "s3 strategy requires an s3 source config".to_string(),
                execution_log: None,
            });
        };
        let region = cfg.region.clone().unwrap_or_else(|| "auto".to_string());
        let access_key_id = cfg.access_key_id.clone().unwrap_or_default();
        Ok(self.object_store_factory.build(
            cfg.endpoint.as_deref(),
            &region,
            &access_key_id,
            cfg.secret_access_key.as_str(),
        ))
    }

    async fn destination_object_store(&self, destination: &Destination) -> Result<Arc<dyn ObjectStoreClient>, BackupError> {
        let DestinationConfig::S3(_) = &destination.config else {
            return Ok(Arc::new(UnusedObjectStore));
        };
        let provider_id = destination
            .credential_provider_id
            .ok_or_else(|| BackupError::CredentialMissing(destination.id))?;
        let provider = self
            .job_store
            .fetch_credential_provider(provider_id)
            .await?
            .ok_or(BackupError::CredentialMissing(provider_id))?;
        let creds = bkd_credential::resolve(&provider)?;
        Ok(self.object_store_factory.build(
            creds.endpoint.as_deref(),
            &creds.region,
            &creds.access_key_id,
            &creds.secret_access_key,
        ))
    }

    /// postgres/mysql/mongodb/redis with one or more destinations: produce
    /// one temporary artifact, then copy it to every destination in turn.
    async fn run_database_copy_many(
        &self,
        run_id: Uuid,
        job: &BackupJob,
        destinations: &[Destination],
        _cancel: &CancellationToken,
    ) -> Result<Vec<DestinationResult>, BackupError> {
        let run_dir = self.config.temp_dir.join(run_id.to_string());
        if let Err(err) = tokio::fs::create_dir_all(&run_dir).await {
            return Err(BackupError::SourceExecutionFailure {
                message: format!("failed to create temp dir {}: {err}", run_dir.display()),
                execution_log: None,
            });
        }
        let area = TempFileArea { dir: run_dir.clone() };
        let unused = UnusedObjectStore;
        let artifact = bkd_source::execute(&job.config, OutputTarget::TempFile(&area), self.dump_tool.as_ref(), &unused).await;

        let results = match artifact {
            Err(err) => {
                let (message, log) = extract_message_log(&err);
                let mut results = Vec::with_capacity(destinations.len());
                for dest in destinations {
                    let outcome_id = self.history.create_outcome(job.id, Some(dest.id), run_id).await?;
                    self.history.fail(outcome_id, message.clone(), log.clone()).await?;
                    results.push(DestinationResult {
                        name: dest.name.clone(),
                        success: false,
                        file_size: None,
                        file_path: None,
                        error: Some(message.clone()),
                    });
                }
                results
            }
            Ok(artifact) => {
                let mut results = Vec::with_capacity(destinations.len());
                for dest in destinations {
                    let outcome_id = self.history.create_outcome(job.id, Some(dest.id), run_id).await?;
                    let hb_cancel = CancellationToken::new();
                    let hb_task = spawn_heartbeat(
                        self.history.clone(),
                        outcome_id,
                        self.config.heartbeat_interval,
                        hb_cancel.clone(),
                    );

                    let object_store = self.destination_object_store(dest).await?;
                    let copy = bkd_destination::copy(&dest.config, std::path::Path::new(&artifact.file_path), object_store.as_ref()).await;

                    hb_cancel.cancel();
                    let _ = hb_task.await;

                    match copy {
                        Ok(copy) => {
                            let combined = combine_logs(&artifact.execution_log, Some(&copy.execution_log));
                            self.history
                                .complete(outcome_id, copy.file_size, copy.file_path.clone(), Some(artifact.metadata.clone()), Some(combined))
                                .await?;
                            results.push(DestinationResult {
                                name: dest.name.clone(),
                                success: true,
                                file_size: Some(copy.file_size),
                                file_path: Some(copy.file_path),
                                error: None,
                            });
                        }
                        Err(err) => {
                            let (message, copy_log) = extract_message_log(&err);
                            let combined = combine_logs(&artifact.execution_log, copy_log.as_deref());
                            self.history.fail(outcome_id, message.clone(), Some(combined)).await?;
                            results.push(DestinationResult {
                                name: dest.name.clone(),
                                success: false,
                                file_size: None,
                                file_path: None,
                                error: Some(message),
                            });
                        }
                    }
                }
                results
            }
        };

        if let Err(err) = tokio::fs::remove_dir_all(&run_dir).await {
            warn!(target: "bkd.executor", path = %run_dir.display(), error = %err, "failed to clean up temporary artifact directory");
        }

        Ok(results)
    }

    /// `s3` sync with one or more destinations: one execution per
    /// destination, each writing directly into that destination's bucket.
    async fn run_s3_per_destination(
        &self,
        run_id: Uuid,
        job: &BackupJob,
        destinations: &[Destination],
        _cancel: &CancellationToken,
    ) -> Result<Vec<DestinationResult>, BackupError> {
        let object_store = self.source_object_store(job).await?;
        let mut results = Vec::with_capacity(destinations.len());

        for dest in destinations {
            let bundle = match destination_bundle(dest) {
                Ok(bundle) => bundle,
                Err(err) => {
                    let (message, _) = extract_message_log(&err);
                    let outcome_id = self.history.create_outcome(job.id, Some(dest.id), run_id).await?;
                    self.history.fail(outcome_id, message.clone(), None).await?;
                    results.push(DestinationResult {
                        name: dest.name.clone(),
                        success: false,
                        file_size: None,
                        file_path: None,
                        error: Some(message),
                    });
                    continue;
                }
            };

            let outcome_id = self.history.create_outcome(job.id, Some(dest.id), run_id).await?;
            let hb_cancel = CancellationToken::new();
            let hb_task = spawn_heartbeat(self.history.clone(), outcome_id, self.config.heartbeat_interval, hb_cancel.clone());

            let result = bkd_source::execute(&job.config, OutputTarget::Destination(&bundle), self.dump_tool.as_ref(), object_store.as_ref()).await;

            hb_cancel.cancel();
            let _ = hb_task.await;

            match result {
                Ok(artifact) => {
                    self.history
                        .complete(outcome_id, artifact.file_size, artifact.file_path.clone(), Some(artifact.metadata), Some(artifact.execution_log))
                        .await?;
                    results.push(DestinationResult {
                        name: dest.name.clone(),
                        success: true,
                        file_size: Some(artifact.file_size),
                        file_path: Some(artifact.file_path),
                        error: None,
                    });
                }
                Err(err) => {
                    let (message, log) = extract_message_log(&err);
                    self.history.fail(outcome_id, message.clone(), log).await?;
                    results.push(DestinationResult {
                        name: dest.name.clone(),
                        success: false,
                        file_size: None,
                        file_path: None,
                        error: Some(message),
                    });
                }
            }
        }

        Ok(results)
    }

    /// Database-family job with zero destinations: write to `BACKUP_DIR`
    /// with `destination_id = None` (spec.md §9 Open Question 1).
    async fn run_database_zero_destinations(
        &self,
        run_id: Uuid,
        job: &BackupJob,
        _cancel: &CancellationToken,
    ) -> Result<DestinationResult, BackupError> {
        let outcome_id = self.history.create_outcome(job.id, None, run_id).await?;
        let hb_cancel = CancellationToken::new();
        let hb_task = spawn_heartbeat(self.history.clone(), outcome_id, self.config.heartbeat_interval, hb_cancel.clone());

        if let Err(err) = tokio::fs::create_dir_all(&self.config.default_backup_dir).await {
            hb_cancel.cancel();
            let _ = hb_task.await;
            let message = format!("failed to create {}: {err}", self.config.default_backup_dir.display());
            self.history.fail(outcome_id, message.clone(), None).await?;
            return Ok(DestinationResult {
                name: "default".to_string(),
                success: false,
                file_size: None,
                file_path: None,
                error: Some(message),
            });
        }

        let area = TempFileArea { dir: self.config.default_backup_dir.clone() };
        let unused = UnusedObjectStore;
        let result = bkd_source::execute(&job.config, OutputTarget::TempFile(&area), self.dump_tool.as_ref(), &unused).await;

        hb_cancel.cancel();
        let _ = hb_task.await;

        match result {
            Ok(artifact) => {
                self.history
                    .complete(outcome_id, artifact.file_size, artifact.file_path.clone(), Some(artifact.metadata), Some(artifact.execution_log))
                    .await?;
                Ok(DestinationResult {
                    name: "default".to_string(),
                    success: true,
                    file_size: Some(artifact.file_size),
                    file_path: Some(artifact.file_path),
                    error: None,
                })
            }
            Err(err) => {
                let (message, log) = extract_message_log(&err);
                self.history.fail(outcome_id, message.clone(), log).await?;
                Ok(DestinationResult {
                    name: "default".to_string(),
                    success: false,
                    file_size: None,
                    file_path: None,
                    error: Some(message),
                })
            }
        }
    }
}

fn destination_bundle(destination: &Destination) -> Result<DestinationBundle, BackupError> {
    match &destination.config {
        DestinationConfig::S3(cfg) => Ok(DestinationBundle {
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
            endpoint: cfg.endpoint.clone(),
            region: cfg.region.clone().unwrap_or_else(|| "auto".to_string()),
        }),
        DestinationConfig::Local(_) => Err(BackupError::DestinationCopyFailure {
            message: format!("destination {} is not an s3 bucket", destination.id),
            execution_log: None,
        }),
    }
}

fn extract_message_log(err: &BackupError) -> (String, Option<String>) {
    match err {
        BackupError::SourceExecutionFailure { message, execution_log } => (message.clone(), execution_log.clone()),
        BackupError::DestinationCopyFailure { message, execution_log } => (message.clone(), execution_log.clone()),
        other => (other.to_string(), None),
    }
}

fn combine_logs(source_log: &str, copy_log: Option<&str>) -> String {
    match copy_log {
        Some(copy_log) => format!("{source_log}\n{copy_log}"),
        None => source_log.to_string(),
    }
}

fn spawn_heartbeat(
    history: Arc<dyn bkd_history::RunHistoryStore>,
    outcome_id: Uuid,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = history.heartbeat(outcome_id).await {
                        warn!(target: "bkd.executor", outcome_id = %outcome_id, error = %err, "heartbeat failed");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

fn build_notification(job: &BackupJob, results: &[DestinationResult], duration_seconds: f64) -> NotificationEvent {
    let has_failures = results.iter().any(|r| !r.success);
    let (file_size, file_path, error) = match results {
        [only] => (only.file_size, only.file_path.clone(), only.error.clone()),
        _ => (None, None, None),
    };

    NotificationEvent {
        event: if has_failures { EventKind::Failure } else { EventKind::Success },
        job_name: job.name.clone(),
        job_type: job.source_type.to_string(),
        file_size,
        file_path,
        error,
        duration_seconds,
        destinations: results
            .iter()
            .map(|r| DestinationEvent {
                name: r.name.clone(),
                status: if r.success { DestinationStatus::Completed } else { DestinationStatus::Failed },
                file_size: r.file_size,
                file_path: r.file_path.clone(),
                error: r.error.clone(),
            })
            .collect(),
    }
}
