// SPDX-License-Identifier: MIT OR Apache-2.0
//! The notification event contract (spec.md §6) and the default sink.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Whether the run, taken as a whole, is reported as a success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// No destination outcome failed.
    Success,
    /// At least one destination outcome failed.
    Failure,
}

/// Per-destination status within a [`NotificationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    /// The copy to this destination completed.
    Completed,
    /// The copy to this destination (or the shared artifact it depends on)
    /// failed.
    Failed,
}

/// One destination's contribution to a [`NotificationEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct DestinationEvent {
    /// Destination display name.
    pub name: String,
    /// Outcome status.
    pub status: DestinationStatus,
    /// Bytes written, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Final artifact path/URI, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Failure message, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Emitted exactly once per run, after every outcome has reached a
/// terminal state (spec.md §6, §4.8 step 7).
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    /// `"success"` or `"failure"`.
    pub event: EventKind,
    /// The job's display name.
    pub job_name: String,
    /// The job's source type, as its display string (`"postgres"`, …).
    pub job_type: String,
    /// Populated only when the run has exactly one destination outcome —
    /// with more than one, per-destination detail lives in `destinations`
    /// instead (spec.md §6 leaves this unspecified for the multi-destination
    /// case; this crate's choice is recorded in the top-level design notes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// See `file_size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// See `file_size`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the whole run.
    pub duration_seconds: f64,
    /// One entry per destination outcome (or one synthetic entry for a
    /// zero-destination database job).
    pub destinations: Vec<DestinationEvent>,
}

/// Delivers [`NotificationEvent`]s to whatever external notification
/// subsystem the deployment wires up (spec.md §6: out of scope for this
/// core beyond the contract itself).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one event. Implementations should not propagate transport
    /// errors into the run's own outcome.
    async fn notify(&self, event: NotificationEvent);
}

/// Default sink: logs the event as structured JSON. Stands in for a real
/// delivery channel (webhook, email, Slack, …) in standalone operation and
/// in tests.
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, event: NotificationEvent) {
        let body = serde_json::to_string(&event)
            .unwrap_or_else(|_| "<notification event failed to serialize>".to_string());
        info!(
            target: "bkd.executor.notify",
            job = %event.job_name,
            duration_seconds = event.duration_seconds,
            destinations = event.destinations.len(),
            "{body}"
        );
    }
}
