// SPDX-License-Identifier: MIT OR Apache-2.0
//! The system maintenance loop (spec.md §2, §4.5): periodically invokes the
//! stale-run reaper. Wired as a repeatable entry on the `system-jobs`
//! channel (concurrency 1) rather than a freestanding timer, so the same
//! `bkd-worker`/`bkd-queue` machinery that drives backup runs — pause,
//! drain, active-count introspection — also governs maintenance.

use async_trait::async_trait;
use bkd_history::RunHistoryStore;
use bkd_queue::QueueEntry;
use bkd_worker::JobHandler;
use std::sync::Arc;

/// The stable repeatable key the maintenance entry is registered under.
pub const MAINTENANCE_KEY: &str = "system-maintenance";

/// The channel maintenance entries run on (spec.md §4.3: `system-jobs`,
/// concurrency 1, sequential).
pub const MAINTENANCE_CHANNEL: &str = "system-jobs";

/// Invokes [`RunHistoryStore::reap_stale`] each time it is handed a queue
/// entry. Registered as a repeatable on [`MAINTENANCE_CHANNEL`]; the queue's
/// at-most-one-in-flight-per-key guarantee keeps reaps from overlapping.
pub struct MaintenanceHandler {
    history: Arc<dyn RunHistoryStore>,
    threshold: chrono::Duration,
}

impl MaintenanceHandler {
    /// Build a handler that reaps outcomes stale by more than `threshold`.
    pub fn new(history: Arc<dyn RunHistoryStore>, threshold: chrono::Duration) -> Self {
        Self { history, threshold }
    }
}

#[async_trait]
impl JobHandler for MaintenanceHandler {
    async fn handle(&self, _entry: QueueEntry) -> Result<serde_json::Value, String> {
        let reaped = self.history.reap_stale(self.threshold).await.map_err(|e| e.to_string())?;
        Ok(serde_json::json!({ "reaped": reaped }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkd_history::InMemoryHistoryStore;
    use bkd_queue::{EntryState, EnqueueOptions};
    use chrono::Utc;
    use uuid::Uuid;

    fn entry() -> QueueEntry {
        QueueEntry {
            id: Uuid::new_v4(),
            channel: MAINTENANCE_CHANNEL.to_string(),
            name: MAINTENANCE_KEY.to_string(),
            payload: serde_json::json!({}),
            state: EntryState::Active,
            attempts: 1,
            attempts_made: 1,
            backoff_base_ms: 0,
            remove_on_complete: false,
            remove_on_fail: false,
            enqueued_at: Utc::now(),
            next_run_at: None,
            finished_at: None,
            repeatable_key: Some(MAINTENANCE_KEY.to_string()),
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn reaps_stale_outcomes_on_handle() {
        let history: Arc<dyn RunHistoryStore> = Arc::new(InMemoryHistoryStore::new());
        history.create_outcome(Uuid::new_v4(), None, Uuid::new_v4()).await.unwrap();
        let handler = MaintenanceHandler::new(history, chrono::Duration::seconds(0));
        let result = handler.handle(entry()).await.unwrap();
        assert_eq!(result["reaped"], 1);
    }

    #[test]
    fn default_enqueue_options_allow_unlimited_retries_in_practice() {
        // Maintenance entries never fail in a way that should exhaust
        // retries silently; attempts is set generously by the daemon at
        // registration time, not defaulted here.
        let opts = EnqueueOptions::default();
        assert_eq!(opts.attempts, 1);
    }
}
