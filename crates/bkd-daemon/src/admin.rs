// SPDX-License-Identifier: MIT OR Apache-2.0
//! The admin surface (spec.md §6): the set of operations an operator (or a
//! thin formatting layer, such as `bkdctl`) drives against a running daemon.
//! Deliberately process-local and transport-agnostic — it hands back plain
//! data, leaving HTTP/CLI presentation to the caller.

use bkd_queue::{EntryState, QueueEntry, QueueStats, RepeatableDef, WorkQueue};
use bkd_worker::WorkerPool;
use std::sync::Arc;
use uuid::Uuid;

/// A minimal view of one worker pool's occupancy, named by its channel.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// Channel this pool drains.
    pub channel: String,
    /// Currently active (running) entries.
    pub active: usize,
}

/// Backs the admin operations listed in spec.md §6 against a live
/// [`WorkQueue`] and the worker pools draining it.
///
/// Holds no state of its own beyond `Arc` handles; cheap to clone and safe
/// to share across an in-process CLI invocation or an (out-of-scope) HTTP
/// handler.
pub struct AdminApi<H1, H2>
where
    H1: bkd_worker::JobHandler + 'static,
    H2: bkd_worker::JobHandler + 'static,
{
    queue: Arc<WorkQueue>,
    backup_pool: Arc<WorkerPool<H1>>,
    system_pool: Arc<WorkerPool<H2>>,
}

impl<H1, H2> AdminApi<H1, H2>
where
    H1: bkd_worker::JobHandler + 'static,
    H2: bkd_worker::JobHandler + 'static,
{
    /// Build an admin surface over the daemon's queue and its two worker
    /// pools (`backup-jobs`, `system-jobs`; spec.md §4.3).
    pub fn new(queue: Arc<WorkQueue>, backup_pool: Arc<WorkerPool<H1>>, system_pool: Arc<WorkerPool<H2>>) -> Self {
        Self { queue, backup_pool, system_pool }
    }

    /// Point-in-time counts for `channel`.
    pub fn queue_stats(&self, channel: &str) -> QueueStats {
        self.queue.stats(channel)
    }

    /// Page through entries on `channel` (or every channel, if `None`) in
    /// `state`, oldest first.
    pub fn queue_list(&self, state: EntryState, offset: usize, limit: usize) -> Vec<QueueEntry> {
        match state {
            EntryState::Waiting => self.queue.get_waiting(offset, limit),
            EntryState::Active => self.queue.get_active(offset, limit),
            EntryState::Completed => self.queue.get_completed(offset, limit),
            EntryState::Failed => self.queue.get_failed(offset, limit),
            EntryState::Delayed => self.queue.get_delayed(offset, limit),
        }
    }

    /// Stop new pickups on `channel`; entries already active keep running.
    pub fn pause(&self, channel: &str) {
        self.queue.pause(channel);
    }

    /// Resume pickups on `channel`.
    pub fn resume(&self, channel: &str) {
        self.queue.resume(channel);
    }

    /// Drop every `Waiting` entry on `channel`. Repeatable schedules remain
    /// registered and will refire on their own cadence.
    pub fn drain(&self, channel: &str) -> usize {
        self.queue.drain(channel)
    }

    /// Remove terminal entries in `state` (`Completed`/`Failed`) older than
    /// `older_than`. Passing any other state removes nothing.
    pub fn clean(&self, state: EntryState, older_than: chrono::Duration) -> usize {
        match state {
            EntryState::Completed | EntryState::Failed => self.queue.clean(state, older_than),
            _ => 0,
        }
    }

    /// Re-queue a specific `Failed` entry immediately, with a fresh attempt
    /// budget.
    pub fn retry(&self, entry_id: Uuid) -> Result<(), bkd_error::BkdError> {
        self.queue.retry(entry_id)
    }

    /// Re-queue every currently `Failed` entry on `channel`. Returns how
    /// many were retried.
    pub fn retry_all_failed(&self, channel: &str) -> usize {
        let failed = self.queue.get_failed(0, usize::MAX);
        let mut retried = 0;
        for entry in failed.into_iter().filter(|e| e.channel == channel) {
            if self.queue.retry(entry.id).is_ok() {
                retried += 1;
            }
        }
        retried
    }

    /// Remove a queue entry outright, in any state.
    pub fn remove_entry(&self, entry_id: Uuid) -> bool {
        self.queue.remove(entry_id)
    }

    /// List every registered repeatable (scheduled) entry.
    pub fn schedule_list(&self) -> Vec<RepeatableDef> {
        self.queue.list_repeatable()
    }

    /// Occupancy of both worker pools.
    pub fn workers_info(&self) -> Vec<WorkerInfo> {
        vec![
            WorkerInfo { channel: "backup-jobs".to_string(), active: self.backup_pool.active_count() },
            WorkerInfo { channel: "system-jobs".to_string(), active: self.system_pool.active_count() },
        ]
    }
}
