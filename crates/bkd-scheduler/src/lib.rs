// SPDX-License-Identifier: MIT OR Apache-2.0
//! The scheduler (spec.md §4.4): maps enabled, cron-scheduled jobs onto
//! repeatable `bkd-queue` entries keyed `backup-job-{id}`.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use bkd_core::error::BackupError;
use bkd_core::BackupJob;
use bkd_queue::{EnqueueOptions, Schedule, WorkQueue};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The channel repeatable backup-job triggers are enqueued onto.
pub const BACKUP_CHANNEL: &str = "backup-jobs";

const REPEATABLE_PREFIX: &str = "backup-job-";

/// Source of truth the scheduler reconciles against. The daemon wires a
/// concrete implementation backed by its job store; `bkd-core`/this crate
/// never assume a particular persistence layer (spec.md §1: job/destination
/// tables are opaque to the core).
#[async_trait]
pub trait JobSource: Send + Sync {
    /// All jobs currently enabled for scheduling consideration. A job with
    /// `enabled = false` or `cron = None` is simply not returned here, or
    /// is filtered by the scheduler — either is fine, [`Scheduler::schedule`]
    /// checks both regardless.
    async fn enabled_jobs(&self) -> Result<Vec<BackupJob>, BackupError>;
}

/// Why a job was not scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// `enabled` is `false`.
    Disabled,
    /// `cron` is `None`.
    NoCron,
    /// `cron` did not parse (spec.md §7 `InvalidCron`).
    InvalidCron(String),
}

/// Result of attempting to schedule one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A repeatable queue entry was registered (or re-registered).
    Scheduled,
    /// The job remains enabled but inactive; see spec.md §7 `InvalidCron`
    /// propagation policy: scheduling errors never terminate the scheduler.
    Skipped(SkipReason),
}

/// Summary counts from [`Scheduler::initialize_all`], logged as one line
/// for operability (SPEC_FULL.md §4.4).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Jobs successfully (re)scheduled.
    pub scheduled: usize,
    /// Jobs left unscheduled (disabled, no cron, or invalid cron).
    pub skipped: usize,
    /// Stale repeatable keys removed that no longer correspond to a
    /// current job.
    pub removed: usize,
}

/// Maps jobs to repeatable queue entries.
pub struct Scheduler<S: JobSource> {
    queue: Arc<WorkQueue>,
    job_source: Arc<S>,
}

impl<S: JobSource> Scheduler<S> {
    /// Build a scheduler driving `queue` from `job_source`.
    pub fn new(queue: Arc<WorkQueue>, job_source: Arc<S>) -> Self {
        Self { queue, job_source }
    }

    /// Register (or update) the repeatable entry for one job. Logs and
    /// returns [`ScheduleOutcome::Skipped`] rather than erroring when the
    /// job isn't schedulable (spec.md §4.4, §7).
    pub fn schedule(&self, job: &BackupJob) -> ScheduleOutcome {
        if !job.enabled {
            return ScheduleOutcome::Skipped(SkipReason::Disabled);
        }
        let Some(cron) = job.cron.as_deref() else {
            return ScheduleOutcome::Skipped(SkipReason::NoCron);
        };
        let schedule = Schedule::Cron(cron.to_string());
        if !schedule.is_valid() {
            warn!(
                target: "bkd.scheduler",
                job_id = %job.id,
                cron,
                "invalid cron expression, leaving job unscheduled"
            );
            return ScheduleOutcome::Skipped(SkipReason::InvalidCron(cron.to_string()));
        }

        let key = job.repeatable_key();
        let payload = serde_json::json!({ "job_id": job.id });
        let opts = EnqueueOptions {
            attempts: job.retry_count + 1,
            ..EnqueueOptions::default()
        };
        match self
            .queue
            .enqueue_repeatable(BACKUP_CHANNEL, &key, schedule, payload, opts)
        {
            Ok(()) => {
                info!(target: "bkd.scheduler", job_id = %job.id, cron, "scheduled");
                ScheduleOutcome::Scheduled
            }
            Err(err) => {
                warn!(target: "bkd.scheduler", job_id = %job.id, error = %err, "failed to schedule");
                ScheduleOutcome::Skipped(SkipReason::InvalidCron(err.to_string()))
            }
        }
    }

    /// Remove the repeatable entry for a job, if any.
    pub fn unschedule(&self, job_id: Uuid) -> bool {
        self.queue.remove_repeatable(&format!("{REPEATABLE_PREFIX}{job_id}"))
    }

    /// `unschedule` then `schedule`.
    pub fn reschedule(&self, job: &BackupJob) -> ScheduleOutcome {
        self.unschedule(job.id);
        self.schedule(job)
    }

    /// Reconcile the repeatable set with the current enabled/cron job set.
    /// Idempotent: running this twice in a row leaves the repeatable set
    /// unchanged (spec.md §8, invariant 6).
    pub async fn initialize_all(&self) -> Result<ReconcileSummary, BackupError> {
        let stale_keys: Vec<String> = self
            .queue
            .list_repeatable()
            .into_iter()
            .map(|def| def.key)
            .filter(|key| key.starts_with(REPEATABLE_PREFIX))
            .collect();
        let removed = stale_keys.len();
        for key in &stale_keys {
            self.queue.remove_repeatable(key);
        }

        let jobs = self.job_source.enabled_jobs().await?;
        let mut scheduled = 0usize;
        let mut skipped = 0usize;
        for job in &jobs {
            match self.schedule(job) {
                ScheduleOutcome::Scheduled => scheduled += 1,
                ScheduleOutcome::Skipped(_) => skipped += 1,
            }
        }

        let summary = ReconcileSummary { scheduled, skipped, removed };
        info!(
            target: "bkd.scheduler",
            scheduled = summary.scheduled,
            skipped = summary.skipped,
            removed = summary.removed,
            "reconciled schedules"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkd_core::{SourceConfig, SourceType};
    use std::sync::Mutex;

    struct FixedJobSource(Mutex<Vec<BackupJob>>);

    #[async_trait]
    impl JobSource for FixedJobSource {
        async fn enabled_jobs(&self) -> Result<Vec<BackupJob>, BackupError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    fn redis_job(id: Uuid, cron: Option<&str>, enabled: bool) -> BackupJob {
        BackupJob {
            id,
            name: "job".to_string(),
            source_type: SourceType::Redis,
            config: SourceConfig::Redis(bkd_core::RedisConfig {
                host: "h".to_string(),
                port: 6379,
                password: None,
                database: 0,
            }),
            cron: cron.map(str::to_string),
            enabled,
            retention_days: 7,
            retry_count: 3,
            source_credential_provider_id: None,
            destinations: vec![bkd_core::JobDestination {
                destination_id: Uuid::new_v4(),
                notify_on_success: false,
                notify_on_failure: true,
            }],
        }
    }

    #[tokio::test]
    async fn s5_scheduler_reconciliation() {
        let queue = Arc::new(WorkQueue::new([(BACKUP_CHANNEL, 2)]));
        // Pre-state: three stray repeatable keys, one of which is stale.
        for key in ["backup-job-1", "backup-job-2", "backup-job-stale"] {
            queue
                .enqueue_repeatable(
                    BACKUP_CHANNEL,
                    key,
                    Schedule::Cron("0 0 * * * *".to_string()),
                    serde_json::json!({}),
                    EnqueueOptions::default(),
                )
                .unwrap();
        }

        let job1 = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let job2 = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let source = Arc::new(FixedJobSource(Mutex::new(vec![
            redis_job(job1, Some("0 * * * *"), true),
            redis_job(job2, Some("INVALID"), true),
        ])));

        let scheduler = Scheduler::new(queue.clone(), source);
        let summary = scheduler.initialize_all().await.unwrap();
        assert_eq!(summary.scheduled, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.removed, 3);

        let mut keys: Vec<String> = queue.list_repeatable().into_iter().map(|d| d.key).collect();
        keys.sort();
        assert_eq!(keys, vec![format!("backup-job-{job1}")]);
    }

    #[tokio::test]
    async fn initialize_all_is_idempotent() {
        let queue = Arc::new(WorkQueue::new([(BACKUP_CHANNEL, 2)]));
        let job_id = Uuid::new_v4();
        let source = Arc::new(FixedJobSource(Mutex::new(vec![redis_job(
            job_id,
            Some("0 0 * * * *"),
            true,
        )])));
        let scheduler = Scheduler::new(queue.clone(), source);
        scheduler.initialize_all().await.unwrap();
        let first: Vec<String> = queue.list_repeatable().into_iter().map(|d| d.key).collect();
        scheduler.initialize_all().await.unwrap();
        let second: Vec<String> = queue.list_repeatable().into_iter().map(|d| d.key).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn disabled_job_is_skipped() {
        let queue = Arc::new(WorkQueue::new([(BACKUP_CHANNEL, 2)]));
        let source = Arc::new(FixedJobSource(Mutex::new(vec![])));
        let scheduler = Scheduler::new(queue, source);
        let job = redis_job(Uuid::new_v4(), Some("0 0 * * * *"), false);
        assert_eq!(
            scheduler.schedule(&job),
            ScheduleOutcome::Skipped(SkipReason::Disabled)
        );
    }

    #[test]
    fn job_without_cron_is_skipped() {
        let queue = Arc::new(WorkQueue::new([(BACKUP_CHANNEL, 2)]));
        let source = Arc::new(FixedJobSource(Mutex::new(vec![])));
        let scheduler = Scheduler::new(queue, source);
        let job = redis_job(Uuid::new_v4(), None, true);
        assert_eq!(scheduler.schedule(&job), ScheduleOutcome::Skipped(SkipReason::NoCron));
    }

    #[test]
    fn reschedule_replaces_existing_entry() {
        let queue = Arc::new(WorkQueue::new([(BACKUP_CHANNEL, 2)]));
        let source = Arc::new(FixedJobSource(Mutex::new(vec![])));
        let scheduler = Scheduler::new(queue.clone(), source);
        let job_id = Uuid::new_v4();
        let job = redis_job(job_id, Some("0 0 * * * *"), true);
        scheduler.schedule(&job);
        assert_eq!(queue.list_repeatable().len(), 1);
        scheduler.reschedule(&job);
        assert_eq!(queue.list_repeatable().len(), 1);
    }
}
