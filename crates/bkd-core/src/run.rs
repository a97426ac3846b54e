// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run / outcome state machine and aggregated run view (spec.md §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal/non-terminal status of a single [`RunOutcome`].
///
/// `running -> completed | failed` is the only legal transition; there is
/// no path back to `running` once a terminal status is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Execution is in progress; liveness is tracked via heartbeat.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl OutcomeStatus {
    /// `true` once the outcome can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutcomeStatus::Completed | OutcomeStatus::Failed)
    }
}

/// The record of one job execution against one destination (or, while the
/// source step alone is running, with `destination_id` unset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Stable identifier of this outcome row.
    pub id: Uuid,
    /// The job this outcome belongs to.
    pub job_id: Uuid,
    /// Groups every outcome produced by one trigger of the job (spec.md
    /// §3) — one run fans out into one outcome per destination.
    pub run_id: Uuid,
    /// The destination this outcome was written to, once known.
    #[serde(default)]
    pub destination_id: Option<Uuid>,
    /// Current status.
    pub status: OutcomeStatus,
    /// When this outcome began executing.
    pub started_at: DateTime<Utc>,
    /// When this outcome reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Size in bytes of the produced artifact, once known.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Path or key the artifact was written to, once known.
    #[serde(default)]
    pub file_path: Option<String>,
    /// Free-form structured metadata (row counts, dump tool version, …).
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Captured stdout/stderr tail for diagnostics.
    #[serde(default)]
    pub execution_log: Option<String>,
    /// Human-readable failure cause, set only when `status == failed`.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Last time the executing worker reported liveness (spec.md §4.5). A
    /// `running` outcome whose heartbeat is older than the staleness
    /// threshold is a candidate for reaping.
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl RunOutcome {
    /// Start a new `running` outcome.
    pub fn start(id: Uuid, job_id: Uuid, run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            job_id,
            run_id,
            destination_id: None,
            status: OutcomeStatus::Running,
            started_at,
            completed_at: None,
            file_size: None,
            file_path: None,
            metadata: None,
            execution_log: None,
            error_message: None,
            last_heartbeat_at: Some(started_at),
        }
    }

    /// Whether this outcome's heartbeat is older than `threshold` as of
    /// `now`. A `running` outcome with no heartbeat at all is treated as
    /// stale relative to its `started_at` instead.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let last_seen = self.last_heartbeat_at.unwrap_or(self.started_at);
        now - last_seen > threshold
    }
}

/// Overall status of a run derived from its outcomes (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatedStatus {
    /// Every outcome completed successfully.
    Completed,
    /// At least one outcome completed and at least one failed.
    Partial,
    /// Every terminal outcome failed (and none completed).
    Failed,
    /// At least one outcome is still running.
    Running,
}

/// A run's outcomes rolled up into one summary view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedRun {
    /// The run these outcomes belong to.
    pub run_id: Uuid,
    /// Total number of destination outcomes produced.
    pub total_destinations: usize,
    /// Outcomes that completed successfully.
    pub successful_destinations: usize,
    /// Outcomes that failed.
    pub failed_destinations: usize,
    /// Derived overall status.
    pub status: AggregatedStatus,
    /// Sum of `file_size` across completed outcomes.
    pub total_size: u64,
}

/// Roll a run's outcomes up into an [`AggregatedRun`] (spec.md §3).
///
/// Panics are avoided entirely by treating an empty slice as `running` with
/// zero counts — a run with no outcomes yet is, by construction, still
/// starting.
pub fn aggregate(run_id: Uuid, outcomes: &[RunOutcome]) -> AggregatedRun {
    let total_destinations = outcomes.len();
    let successful_destinations = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Completed)
        .count();
    let failed_destinations = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Failed)
        .count();
    let any_running = outcomes.iter().any(|o| o.status == OutcomeStatus::Running);
    let total_size = outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Completed)
        .filter_map(|o| o.file_size)
        .sum();

    let status = if any_running || total_destinations == 0 {
        AggregatedStatus::Running
    } else if failed_destinations == 0 {
        AggregatedStatus::Completed
    } else if successful_destinations == 0 {
        AggregatedStatus::Failed
    } else {
        AggregatedStatus::Partial
    };

    AggregatedRun {
        run_id,
        total_destinations,
        successful_destinations,
        failed_destinations,
        status,
        total_size,
    }
}
