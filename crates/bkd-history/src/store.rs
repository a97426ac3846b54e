// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run history store trait and its in-memory implementation
//! (spec.md §4.5).

use async_trait::async_trait;
use bkd_core::error::BackupError;
use bkd_core::run::{aggregate, AggregatedRun};
use bkd_core::{OutcomeStatus, RunOutcome};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Rolled-up counters for one job across all of its runs (spec.md §4.5
/// `stats_batch`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct JobStats {
    /// Total outcome rows recorded for the job.
    pub total: usize,
    /// Outcomes that completed successfully.
    pub success: usize,
    /// Outcomes that failed.
    pub failed: usize,
    /// Most recent run's start time, across all outcomes.
    pub last_run: Option<DateTime<Utc>>,
    /// Most recent successful outcome's completion time.
    pub last_success: Option<DateTime<Utc>>,
    /// Average duration, in seconds, of terminal outcomes.
    pub avg_duration_sec: Option<f64>,
}

/// One run's summary, as used by `recent_statuses_batch` (spec.md §4.5).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunSummary {
    /// The run this summary describes.
    pub run_id: Uuid,
    /// Aggregated status across the run's outcomes.
    pub status: bkd_core::AggregatedStatus,
    /// Earliest `started_at` among the run's outcomes.
    pub started_at: DateTime<Utc>,
    /// Latest `completed_at`, once every outcome is terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Durable state machine of runs (spec.md §4.5).
///
/// All writes go through `create_outcome`/`heartbeat`/`complete`/`fail`/
/// `reap_stale` — reaping is the only path that transitions a row without
/// its owning executor (spec.md §4.5 invariant).
#[async_trait]
pub trait RunHistoryStore: Send + Sync {
    /// Open a new `running` outcome row.
    async fn create_outcome(
        &self,
        job_id: Uuid,
        destination_id: Option<Uuid>,
        run_id: Uuid,
    ) -> Result<Uuid, BackupError>;

    /// Advance `last_heartbeat_at`. A no-op if the outcome already reached a
    /// terminal status.
    async fn heartbeat(&self, outcome_id: Uuid) -> Result<(), BackupError>;

    /// Terminal transition to `completed`. Only valid from `running`.
    async fn complete(
        &self,
        outcome_id: Uuid,
        file_size: u64,
        file_path: String,
        metadata: Option<serde_json::Value>,
        execution_log: Option<String>,
    ) -> Result<(), BackupError>;

    /// Terminal transition to `failed`. Only valid from `running`.
    async fn fail(
        &self,
        outcome_id: Uuid,
        error_message: String,
        execution_log: Option<String>,
    ) -> Result<(), BackupError>;

    /// Transition every `running` outcome whose heartbeat is older than
    /// `heartbeat_age_threshold` to `failed`. Returns the count reaped.
    async fn reap_stale(&self, heartbeat_age_threshold: Duration) -> Result<usize, BackupError>;

    /// The most recent runs across all jobs, newest first.
    async fn recent_history(&self, limit: usize) -> Result<Vec<AggregatedRun>, BackupError>;

    /// A page of aggregated runs for one job, newest first.
    async fn runs_for_job(
        &self,
        job_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<Vec<AggregatedRun>, BackupError>;

    /// Rolled-up stats for each of `job_ids`.
    async fn stats_batch(&self, job_ids: &[Uuid]) -> Result<HashMap<Uuid, JobStats>, BackupError>;

    /// The most recent `k` run summaries for each of `job_ids`.
    async fn recent_statuses_batch(
        &self,
        job_ids: &[Uuid],
        k: usize,
    ) -> Result<HashMap<Uuid, Vec<RunSummary>>, BackupError>;
}

/// An in-memory [`RunHistoryStore`] (spec.md §1: the SQL schema is opaque
/// to this core; this implementation is what stands in for it in tests and
/// for standalone operation).
#[derive(Default)]
pub struct InMemoryHistoryStore {
    outcomes: RwLock<BTreeMap<Uuid, RunOutcome>>,
}

impl InMemoryHistoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every outcome currently recorded, in insertion order.
    pub async fn all_outcomes(&self) -> Vec<RunOutcome> {
        self.outcomes.read().await.values().cloned().collect()
    }

    fn runs_from(outcomes: &[RunOutcome], job_id: Option<Uuid>) -> Vec<AggregatedRun> {
        let mut by_run: BTreeMap<Uuid, Vec<RunOutcome>> = BTreeMap::new();
        for o in outcomes {
            if job_id.is_some_and(|j| o.job_id != j) {
                continue;
            }
            by_run.entry(o.run_id).or_default().push(o.clone());
        }
        let mut runs: Vec<(DateTime<Utc>, AggregatedRun)> = by_run
            .into_iter()
            .map(|(run_id, rows)| {
                let started_at = rows.iter().map(|r| r.started_at).min().unwrap_or_else(Utc::now);
                (started_at, aggregate(run_id, &rows))
            })
            .collect();
        runs.sort_by(|a, b| b.0.cmp(&a.0));
        runs.into_iter().map(|(_, run)| run).collect()
    }
}

#[async_trait]
impl RunHistoryStore for InMemoryHistoryStore {
    async fn create_outcome(
        &self,
        job_id: Uuid,
        destination_id: Option<Uuid>,
        run_id: Uuid,
    ) -> Result<Uuid, BackupError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut outcome = RunOutcome::start(id, job_id, run_id, now);
        outcome.destination_id = destination_id;
        self.outcomes.write().await.insert(id, outcome);
        Ok(id)
    }

    async fn heartbeat(&self, outcome_id: Uuid) -> Result<(), BackupError> {
        let mut guard = self.outcomes.write().await;
        if let Some(outcome) = guard.get_mut(&outcome_id) {
            if !outcome.status.is_terminal() {
                outcome.last_heartbeat_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn complete(
        &self,
        outcome_id: Uuid,
        file_size: u64,
        file_path: String,
        metadata: Option<serde_json::Value>,
        execution_log: Option<String>,
    ) -> Result<(), BackupError> {
        let mut guard = self.outcomes.write().await;
        let outcome = guard
            .get_mut(&outcome_id)
            .ok_or_else(|| BackupError::JobMissing(outcome_id))?;
        if outcome.status.is_terminal() {
            return Ok(());
        }
        outcome.status = OutcomeStatus::Completed;
        outcome.completed_at = Some(Utc::now());
        outcome.file_size = Some(file_size);
        outcome.file_path = Some(file_path);
        outcome.metadata = metadata;
        outcome.execution_log = execution_log;
        Ok(())
    }

    async fn fail(
        &self,
        outcome_id: Uuid,
        error_message: String,
        execution_log: Option<String>,
    ) -> Result<(), BackupError> {
        let mut guard = self.outcomes.write().await;
        let outcome = guard
            .get_mut(&outcome_id)
            .ok_or_else(|| BackupError::JobMissing(outcome_id))?;
        if outcome.status.is_terminal() {
            return Ok(());
        }
        outcome.status = OutcomeStatus::Failed;
        outcome.completed_at = Some(Utc::now());
        outcome.error_message = Some(error_message);
        outcome.execution_log = execution_log;
        Ok(())
    }

    async fn reap_stale(&self, heartbeat_age_threshold: Duration) -> Result<usize, BackupError> {
        let now = Utc::now();
        let mut guard = self.outcomes.write().await;
        let mut reaped = 0usize;
        for outcome in guard.values_mut() {
            if outcome.is_stale(now, heartbeat_age_threshold) {
                outcome.status = OutcomeStatus::Failed;
                outcome.completed_at = Some(now);
                outcome.error_message = Some("run orphaned (no heartbeat)".to_string());
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!(target: "bkd.history.reaper", reaped, "reaped stale outcomes");
        }
        Ok(reaped)
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<AggregatedRun>, BackupError> {
        let outcomes = self.outcomes.read().await;
        let rows: Vec<RunOutcome> = outcomes.values().cloned().collect();
        let mut runs = Self::runs_from(&rows, None);
        runs.truncate(limit);
        Ok(runs)
    }

    async fn runs_for_job(
        &self,
        job_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<Vec<AggregatedRun>, BackupError> {
        let outcomes = self.outcomes.read().await;
        let rows: Vec<RunOutcome> = outcomes.values().cloned().collect();
        let runs = Self::runs_from(&rows, Some(job_id));
        Ok(runs.into_iter().skip(page * limit).take(limit).collect())
    }

    async fn stats_batch(&self, job_ids: &[Uuid]) -> Result<HashMap<Uuid, JobStats>, BackupError> {
        let outcomes = self.outcomes.read().await;
        let mut result: HashMap<Uuid, JobStats> = job_ids.iter().map(|id| (*id, JobStats::default())).collect();
        let mut durations: HashMap<Uuid, Vec<f64>> = HashMap::new();

        for outcome in outcomes.values() {
            let Some(stats) = result.get_mut(&outcome.job_id) else {
                continue;
            };
            stats.total += 1;
            match outcome.status {
                OutcomeStatus::Completed => {
                    stats.success += 1;
                    if stats.last_success.is_none_or(|t| outcome.started_at > t) {
                        stats.last_success = outcome.completed_at;
                    }
                }
                OutcomeStatus::Failed => stats.failed += 1,
                OutcomeStatus::Running => {}
            }
            if stats.last_run.is_none_or(|t| outcome.started_at > t) {
                stats.last_run = Some(outcome.started_at);
            }
            if let Some(completed_at) = outcome.completed_at {
                let secs = (completed_at - outcome.started_at).num_milliseconds() as f64 / 1000.0;
                durations.entry(outcome.job_id).or_default().push(secs);
            }
        }

        for (job_id, stats) in result.iter_mut() {
            if let Some(values) = durations.get(job_id) {
                if !values.is_empty() {
                    stats.avg_duration_sec = Some(values.iter().sum::<f64>() / values.len() as f64);
                }
            }
        }

        Ok(result)
    }

    async fn recent_statuses_batch(
        &self,
        job_ids: &[Uuid],
        k: usize,
    ) -> Result<HashMap<Uuid, Vec<RunSummary>>, BackupError> {
        let outcomes = self.outcomes.read().await;
        let rows: Vec<RunOutcome> = outcomes.values().cloned().collect();
        let mut result = HashMap::new();
        for job_id in job_ids {
            let runs = Self::runs_from(&rows, Some(*job_id));
            let by_run: BTreeMap<Uuid, Vec<RunOutcome>> = {
                let mut map: BTreeMap<Uuid, Vec<RunOutcome>> = BTreeMap::new();
                for o in rows.iter().filter(|o| o.job_id == *job_id) {
                    map.entry(o.run_id).or_default().push(o.clone());
                }
                map
            };
            let summaries = runs
                .into_iter()
                .take(k)
                .map(|run| {
                    let rows = &by_run[&run.run_id];
                    let started_at = rows.iter().map(|r| r.started_at).min().unwrap_or_else(Utc::now);
                    let completed_at = if rows.iter().all(|r| r.status.is_terminal()) {
                        rows.iter().filter_map(|r| r.completed_at).max()
                    } else {
                        None
                    };
                    RunSummary {
                        run_id: run.run_id,
                        status: run.status,
                        started_at,
                        completed_at,
                    }
                })
                .collect();
            result.insert(*job_id, summaries);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_heartbeat_complete_round_trip() {
        let store = InMemoryHistoryStore::new();
        let job_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let outcome_id = store.create_outcome(job_id, None, run_id).await.unwrap();
        store.heartbeat(outcome_id).await.unwrap();
        store
            .complete(outcome_id, 1234, "/out/f.gz".to_string(), None, Some("log".to_string()))
            .await
            .unwrap();

        let runs = store.runs_for_job(job_id, 0, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, bkd_core::AggregatedStatus::Completed);
        assert_eq!(runs[0].total_size, 1234);
    }

    #[tokio::test]
    async fn heartbeat_is_noop_on_terminal_row() {
        let store = InMemoryHistoryStore::new();
        let outcome_id = store.create_outcome(Uuid::new_v4(), None, Uuid::new_v4()).await.unwrap();
        store.fail(outcome_id, "boom".to_string(), None).await.unwrap();
        store.heartbeat(outcome_id).await.unwrap();
        let all = store.all_outcomes().await;
        assert_eq!(all[0].status, OutcomeStatus::Failed);
    }

    #[tokio::test]
    async fn reap_stale_transitions_orphaned_rows() {
        let store = InMemoryHistoryStore::new();
        let outcome_id = store.create_outcome(Uuid::new_v4(), None, Uuid::new_v4()).await.unwrap();
        {
            let mut guard = store.outcomes.write().await;
            let o = guard.get_mut(&outcome_id).unwrap();
            o.last_heartbeat_at = Some(Utc::now() - Duration::minutes(10));
        }
        let reaped = store.reap_stale(Duration::minutes(5)).await.unwrap();
        assert_eq!(reaped, 1);
        let all = store.all_outcomes().await;
        assert_eq!(all[0].status, OutcomeStatus::Failed);
        assert!(all[0].error_message.as_ref().unwrap().contains("orphaned"));
    }

    #[tokio::test]
    async fn reap_stale_ignores_terminal_rows() {
        let store = InMemoryHistoryStore::new();
        let outcome_id = store.create_outcome(Uuid::new_v4(), None, Uuid::new_v4()).await.unwrap();
        store.complete(outcome_id, 1, "p".to_string(), None, None).await.unwrap();
        let reaped = store.reap_stale(Duration::seconds(0)).await.unwrap();
        assert_eq!(reaped, 0);
    }

    #[tokio::test]
    async fn aggregated_status_is_partial_with_mixed_outcomes() {
        let store = InMemoryHistoryStore::new();
        let job_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let ok_id = store.create_outcome(job_id, Some(Uuid::new_v4()), run_id).await.unwrap();
        let bad_id = store.create_outcome(job_id, Some(Uuid::new_v4()), run_id).await.unwrap();
        store.complete(ok_id, 10, "p1".to_string(), None, None).await.unwrap();
        store.fail(bad_id, "disk full".to_string(), None).await.unwrap();

        let runs = store.runs_for_job(job_id, 0, 10).await.unwrap();
        assert_eq!(runs[0].status, bkd_core::AggregatedStatus::Partial);
        assert_eq!(runs[0].total_destinations, 2);
    }

    #[tokio::test]
    async fn stats_batch_computes_counts_and_average_duration() {
        let store = InMemoryHistoryStore::new();
        let job_id = Uuid::new_v4();
        let a = store.create_outcome(job_id, None, Uuid::new_v4()).await.unwrap();
        store.complete(a, 1, "p".to_string(), None, None).await.unwrap();
        let b = store.create_outcome(job_id, None, Uuid::new_v4()).await.unwrap();
        store.fail(b, "err".to_string(), None).await.unwrap();

        let stats = store.stats_batch(&[job_id]).await.unwrap();
        let s = &stats[&job_id];
        assert_eq!(s.total, 2);
        assert_eq!(s.success, 1);
        assert_eq!(s.failed, 1);
        assert!(s.last_run.is_some());
        assert!(s.avg_duration_sec.is_some());
    }

    #[tokio::test]
    async fn recent_statuses_batch_returns_newest_first() {
        let store = InMemoryHistoryStore::new();
        let job_id = Uuid::new_v4();
        for _ in 0..3 {
            let id = store.create_outcome(job_id, None, Uuid::new_v4()).await.unwrap();
            store.complete(id, 1, "p".to_string(), None, None).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let summaries = store.recent_statuses_batch(&[job_id], 2).await.unwrap();
        assert_eq!(summaries[&job_id].len(), 2);
    }
}
