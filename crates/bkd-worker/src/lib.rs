// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bounded-concurrency worker pool that drains one `bkd-queue` channel
//! (spec.md §5).
//!
//! A pool repeatedly ticks its queue, picks up eligible entries up to the
//! channel's concurrency limit, and runs each through a [`JobHandler`] on
//! its own task. On cancellation it stops admitting new pickups but lets
//! in-flight tasks finish (spec.md §5, graceful shutdown step 3: "wait for
//! active runs to drain by polling active counts").
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use bkd_queue::{EntryState, QueueEntry, WorkQueue};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handles a single picked-up [`QueueEntry`] to completion.
///
/// Implementations re-fetch authoritative state rather than trusting the
/// advisory payload (spec.md §4.3) — that re-fetch happens inside the
/// handler, not in this crate.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one entry. `Ok` marks the entry completed with the returned
    /// result payload; `Err` marks it failed (which may re-queue with
    /// backoff, per the queue's retry policy) with the returned message.
    async fn handle(&self, entry: QueueEntry) -> Result<serde_json::Value, String>;
}

/// Runtime knobs for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Channel this pool drains.
    pub channel: String,
    /// How often to re-tick the queue when nothing is immediately pickable.
    pub poll_interval: Duration,
}

/// Drives one channel's worker pool.
pub struct WorkerPool<H: JobHandler + 'static> {
    queue: Arc<WorkQueue>,
    handler: Arc<H>,
    config: WorkerPoolConfig,
}

impl<H: JobHandler + 'static> WorkerPool<H> {
    /// Build a pool over `queue`'s `config.channel`.
    pub fn new(queue: Arc<WorkQueue>, handler: Arc<H>, config: WorkerPoolConfig) -> Self {
        Self { queue, handler, config }
    }

    /// Run until `cancel` fires, then drain in-flight work before
    /// returning.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.queue.tick(Utc::now());

            match self.queue.try_pick(&self.config.channel) {
                Some(entry) => {
                    debug!(
                        target: "bkd.worker",
                        channel = %self.config.channel,
                        entry_id = %entry.id,
                        name = %entry.name,
                        "picked up queue entry"
                    );
                    let queue = self.queue.clone();
                    let handler = self.handler.clone();
                    tasks.spawn(async move { run_one(queue, handler, entry).await });
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel.cancelled() => break,
                        joined = tasks.join_next(), if !tasks.is_empty() => {
                            if let Some(Err(err)) = joined {
                                warn!(target: "bkd.worker", error = %err, "job task panicked");
                            }
                        }
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(target: "bkd.worker", error = %err, "job task panicked during drain");
            }
        }
    }

    /// Number of entries currently `Active` on this pool's channel —
    /// polled by the graceful-shutdown drain loop (spec.md §5).
    pub fn active_count(&self) -> usize {
        self.queue.stats(&self.config.channel).active
    }
}

async fn run_one<H: JobHandler + 'static>(queue: Arc<WorkQueue>, handler: Arc<H>, entry: QueueEntry) {
    let id = entry.id;
    let name = entry.name.clone();
    match handler.handle(entry).await {
        Ok(result) => {
            if let Err(err) = queue.complete(id, result) {
                warn!(target: "bkd.worker", entry_id = %id, name = %name, error = %err, "failed to record completion");
            }
        }
        Err(message) => match queue.fail(id, message.clone()) {
            Ok(will_retry) => {
                if will_retry {
                    debug!(target: "bkd.worker", entry_id = %id, name = %name, error = %message, "job failed, will retry");
                } else {
                    warn!(target: "bkd.worker", entry_id = %id, name = %name, error = %message, "job failed, attempts exhausted");
                }
            }
            Err(err) => {
                warn!(target: "bkd.worker", entry_id = %id, name = %name, error = %err, "failed to record failure");
            }
        },
    }
}

/// `true` for an entry state a worker pool would never be handed directly
/// (defensive assertion helper for tests).
pub fn is_pickable(state: EntryState) -> bool {
    matches!(state, EntryState::Waiting)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _entry: QueueEntry) -> Result<serde_json::Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                Err("boom".to_string())
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }

    #[tokio::test]
    async fn drains_waiting_entries_then_stops_on_cancel() {
        let queue = StdArc::new(WorkQueue::new([("backup-jobs", 2)]));
        queue.enqueue(
            "backup-jobs",
            "job-a",
            serde_json::json!({}),
            bkd_queue::EnqueueOptions::default(),
        );
        let handler = StdArc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let pool = WorkerPool::new(
            queue.clone(),
            handler.clone(),
            WorkerPoolConfig {
                channel: "backup-jobs".to_string(),
                poll_interval: Duration::from_millis(10),
            },
        );
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        pool.run(cancel).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats("backup-jobs").completed, 1);
    }

    #[tokio::test]
    async fn failed_entry_reenters_as_delayed() {
        let queue = StdArc::new(WorkQueue::new([("backup-jobs", 2)]));
        queue.enqueue(
            "backup-jobs",
            "job-a",
            serde_json::json!({}),
            bkd_queue::EnqueueOptions { attempts: 2, backoff_base_ms: 10, ..Default::default() },
        );
        let handler = StdArc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        let pool = WorkerPool::new(
            queue.clone(),
            handler.clone(),
            WorkerPoolConfig {
                channel: "backup-jobs".to_string(),
                poll_interval: Duration::from_millis(5),
            },
        );
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel_clone.cancel();
        });
        pool.run(cancel).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats("backup-jobs").completed, 1);
    }
}
