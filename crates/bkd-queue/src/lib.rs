// SPDX-License-Identifier: MIT OR Apache-2.0
//! The durable, per-channel work queue (spec.md §4.3).
//!
//! A FIFO queue per named channel, with a concurrency limit, per-entry
//! retry/backoff, delayed (backed-off) entries, and repeatable entries keyed
//! by a stable string (cron- or interval-driven). The queue is in-memory
//! (`std::sync::Mutex`-guarded) — per SPEC_FULL.md §4.3, the real broker
//! behind this API is opaque at this layer; a production deployment backs
//! it with Redis, matching the teacher's own broker-abstraction pattern.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use bkd_error::{BkdError, ErrorCode};
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use uuid::Uuid;

/// Lifecycle state of a single [`QueueEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Eligible for pickup, ordered by `enqueued_at`.
    Waiting,
    /// Currently being processed by a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Exhausted its retry budget (or a non-retryable failure).
    Failed,
    /// Waiting for `next_run_at` before becoming eligible again (a
    /// backed-off retry).
    Delayed,
}

/// A repeat schedule for a [`RepeatableDef`] (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Schedule {
    /// Standard five/six-field cron expression.
    Cron(String),
    /// Fixed interval in milliseconds.
    Interval(u64),
}

impl Schedule {
    /// Validate the schedule and compute the next fire time strictly after
    /// `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, BkdError> {
        match self {
            Schedule::Cron(expr) => {
                let schedule = CronSchedule::from_str(&normalize_cron(expr)).map_err(|e| {
                    BkdError::new(ErrorCode::ConfigInvalid, format!("invalid cron expression: {e}"))
                })?;
                schedule.after(&after).next().ok_or_else(|| {
                    BkdError::new(ErrorCode::ConfigInvalid, "cron expression has no future occurrence")
                })
            }
            Schedule::Interval(ms) => Ok(after + chrono::Duration::milliseconds(*ms as i64)),
        }
    }

    /// `true` if this schedule is syntactically valid.
    pub fn is_valid(&self) -> bool {
        match self {
            Schedule::Cron(expr) => CronSchedule::from_str(&normalize_cron(expr)).is_ok(),
            Schedule::Interval(_) => true,
        }
    }
}

/// `cron` (0.15) requires a leading seconds field (6 or 7 fields); the
/// conventional crontab form used throughout spec.md is 5 fields
/// (minute hour day-of-month month day-of-week), with seconds implied as
/// `0`. Prepend that column so the standard form parses; 6/7-field input
/// and anything else malformed is passed through untouched and left for
/// `cron` itself to accept or reject.
fn normalize_cron(expr: &str) -> String {
    match expr.split_whitespace().count() {
        5 => format!("0 {expr}"),
        _ => expr.to_string(),
    }
}

/// Per-entry admission options (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Maximum attempts, including the first (1..=n). Must be >= 1.
    pub attempts: u32,
    /// Base delay in milliseconds for exponential backoff:
    /// `base_ms * 2^(attempts_made - 1)`.
    pub backoff_base_ms: u64,
    /// Drop the entry entirely on successful completion.
    pub remove_on_complete: bool,
    /// Drop the entry entirely on terminal failure.
    pub remove_on_fail: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_base_ms: 1_000,
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

/// A registered repeatable schedule (spec.md §4.3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatableDef {
    /// Stable key identifying this repeatable schedule (`backup-job-{id}`).
    pub key: String,
    /// Channel new instances are enqueued onto.
    pub channel: String,
    /// The repeat schedule.
    pub schedule: Schedule,
    /// Payload template for each new instance.
    pub payload: serde_json::Value,
    /// Admission options for each new instance.
    pub opts: EnqueueOptions,
    /// Next time this schedule is due to fire.
    pub next_at: DateTime<Utc>,
}

/// A single queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Stable identifier.
    pub id: Uuid,
    /// Channel this entry belongs to.
    pub channel: String,
    /// Human-readable name (usually the job name).
    pub name: String,
    /// Advisory payload; the executor re-fetches authoritative state on
    /// pickup (spec.md §4.3).
    pub payload: serde_json::Value,
    /// Current state.
    pub state: EntryState,
    /// Maximum attempts.
    pub attempts: u32,
    /// Attempts made so far (including the current/most recent one).
    pub attempts_made: u32,
    /// Backoff base, milliseconds.
    pub backoff_base_ms: u64,
    /// Drop on completion.
    pub remove_on_complete: bool,
    /// Drop on terminal failure.
    pub remove_on_fail: bool,
    /// When this entry was originally admitted.
    pub enqueued_at: DateTime<Utc>,
    /// When a delayed entry becomes eligible again.
    pub next_run_at: Option<DateTime<Utc>>,
    /// When this entry reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when produced by a repeatable schedule.
    pub repeatable_key: Option<String>,
    /// Result payload, once completed.
    pub result: Option<serde_json::Value>,
    /// Error message, once failed.
    pub error: Option<String>,
}

/// Point-in-time counts for one channel (spec.md §4.3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries eligible for pickup.
    pub waiting: usize,
    /// Entries currently being processed.
    pub active: usize,
    /// Entries that completed successfully (and were not removed).
    pub completed: usize,
    /// Entries that exhausted retries.
    pub failed: usize,
    /// Entries backed off, awaiting `next_run_at`.
    pub delayed: usize,
    /// Whether the channel currently accepts new pickups.
    pub paused: bool,
}

struct Inner {
    channel_concurrency: BTreeMap<String, usize>,
    entries: BTreeMap<Uuid, QueueEntry>,
    paused: BTreeSet<String>,
    repeatables: BTreeMap<String, RepeatableDef>,
}

/// The durable work queue.
pub struct WorkQueue {
    inner: Mutex<Inner>,
}

impl WorkQueue {
    /// Create a queue with the given channels and their concurrency limits
    /// (spec.md §4.3: `backup-jobs` = 2, `system-jobs` = 1).
    pub fn new<'a>(channels: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
        let channel_concurrency = channels
            .into_iter()
            .map(|(name, limit)| (name.to_string(), limit))
            .collect();
        Self {
            inner: Mutex::new(Inner {
                channel_concurrency,
                entries: BTreeMap::new(),
                paused: BTreeSet::new(),
                repeatables: BTreeMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("work queue lock poisoned")
    }

    /// Admit a new entry onto `channel` (spec.md §4.3).
    pub fn enqueue(
        &self,
        channel: &str,
        name: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut inner = self.lock();
        inner.entries.insert(
            id,
            QueueEntry {
                id,
                channel: channel.to_string(),
                name: name.to_string(),
                payload,
                state: EntryState::Waiting,
                attempts: opts.attempts.max(1),
                attempts_made: 0,
                backoff_base_ms: opts.backoff_base_ms,
                remove_on_complete: opts.remove_on_complete,
                remove_on_fail: opts.remove_on_fail,
                enqueued_at: now,
                next_run_at: None,
                finished_at: None,
                repeatable_key: None,
                result: None,
                error: None,
            },
        );
        id
    }

    /// Register (or overwrite) a repeatable schedule keyed by `key`
    /// (spec.md §4.3/§4.4). Re-registering an existing key resets its next
    /// fire time.
    pub fn enqueue_repeatable(
        &self,
        channel: &str,
        key: &str,
        schedule: Schedule,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<(), BkdError> {
        let now = Utc::now();
        let next_at = schedule.next_after(now)?;
        let mut inner = self.lock();
        inner.repeatables.insert(
            key.to_string(),
            RepeatableDef {
                key: key.to_string(),
                channel: channel.to_string(),
                schedule,
                payload,
                opts,
                next_at,
            },
        );
        Ok(())
    }

    /// Remove a repeatable schedule. Returns `true` if it existed. Does not
    /// touch any already-enqueued instance.
    pub fn remove_repeatable(&self, key: &str) -> bool {
        self.lock().repeatables.remove(key).is_some()
    }

    /// List all registered repeatable schedules.
    pub fn list_repeatable(&self) -> Vec<RepeatableDef> {
        self.lock().repeatables.values().cloned().collect()
    }

    /// Stop new pickups on `channel`. Active entries continue to completion.
    pub fn pause(&self, channel: &str) {
        self.lock().paused.insert(channel.to_string());
    }

    /// Resume pickups on `channel`.
    pub fn resume(&self, channel: &str) {
        self.lock().paused.remove(channel);
    }

    /// Whether `channel` is currently paused.
    pub fn is_paused(&self, channel: &str) -> bool {
        self.lock().paused.contains(channel)
    }

    /// Remove all `Waiting` entries on `channel`. Active entries are left
    /// running; repeatable schedules remain registered (spec.md §4.3).
    pub fn drain(&self, channel: &str) -> usize {
        let mut inner = self.lock();
        let to_remove: Vec<Uuid> = inner
            .entries
            .values()
            .filter(|e| e.channel == channel && e.state == EntryState::Waiting)
            .map(|e| e.id)
            .collect();
        for id in &to_remove {
            inner.entries.remove(id);
        }
        to_remove.len()
    }

    /// Remove terminal entries (`Completed`/`Failed`) in `state` whose
    /// `finished_at` is older than `older_than`.
    pub fn clean(&self, state: EntryState, older_than: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut inner = self.lock();
        let to_remove: Vec<Uuid> = inner
            .entries
            .values()
            .filter(|e| {
                e.state == state
                    && e.finished_at
                        .is_some_and(|finished| now - finished > older_than)
            })
            .map(|e| e.id)
            .collect();
        for id in &to_remove {
            inner.entries.remove(id);
        }
        to_remove.len()
    }

    fn filtered_page(
        &self,
        channel: Option<&str>,
        state: EntryState,
        offset: usize,
        limit: usize,
    ) -> Vec<QueueEntry> {
        let inner = self.lock();
        let mut matching: Vec<&QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.state == state && channel.is_none_or(|c| e.channel == c))
            .collect();
        matching.sort_by_key(|e| e.enqueued_at);
        matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Page through `Waiting` entries, oldest first.
    pub fn get_waiting(&self, offset: usize, limit: usize) -> Vec<QueueEntry> {
        self.filtered_page(None, EntryState::Waiting, offset, limit)
    }

    /// Page through `Active` entries, oldest first.
    pub fn get_active(&self, offset: usize, limit: usize) -> Vec<QueueEntry> {
        self.filtered_page(None, EntryState::Active, offset, limit)
    }

    /// Page through `Completed` entries, oldest first.
    pub fn get_completed(&self, offset: usize, limit: usize) -> Vec<QueueEntry> {
        self.filtered_page(None, EntryState::Completed, offset, limit)
    }

    /// Page through `Failed` entries, oldest first.
    pub fn get_failed(&self, offset: usize, limit: usize) -> Vec<QueueEntry> {
        self.filtered_page(None, EntryState::Failed, offset, limit)
    }

    /// Page through `Delayed` entries, oldest first.
    pub fn get_delayed(&self, offset: usize, limit: usize) -> Vec<QueueEntry> {
        self.filtered_page(None, EntryState::Delayed, offset, limit)
    }

    /// Re-queue a `Failed` entry immediately, as a fresh attempt budget
    /// (admin `retry-failed`, spec.md §6).
    pub fn retry(&self, job_id: Uuid) -> Result<(), BkdError> {
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(&job_id).ok_or_else(|| {
            BkdError::new(ErrorCode::QueueChannelNotFound, format!("no such queue entry: {job_id}"))
        })?;
        if entry.state != EntryState::Failed {
            return Err(BkdError::new(
                ErrorCode::QueueChannelNotFound,
                format!("entry {job_id} is not in the failed state"),
            ));
        }
        entry.state = EntryState::Waiting;
        entry.attempts_made = 0;
        entry.finished_at = None;
        entry.next_run_at = None;
        entry.error = None;
        Ok(())
    }

    /// Remove an entry outright, in any state.
    pub fn remove(&self, job_id: Uuid) -> bool {
        self.lock().entries.remove(&job_id).is_some()
    }

    /// Snapshot counts for `channel`.
    pub fn stats(&self, channel: &str) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            paused: inner.paused.contains(channel),
            ..Default::default()
        };
        for entry in inner.entries.values().filter(|e| e.channel == channel) {
            match entry.state {
                EntryState::Waiting => stats.waiting += 1,
                EntryState::Active => stats.active += 1,
                EntryState::Completed => stats.completed += 1,
                EntryState::Failed => stats.failed += 1,
                EntryState::Delayed => stats.delayed += 1,
            }
        }
        stats
    }

    /// Advance queue time: promote due `Delayed` entries to `Waiting`, and
    /// fire any due repeatable schedule that has no in-flight instance
    /// (spec.md §4.3: "at-most-one in-flight execution per repeatable key").
    ///
    /// Returns the ids of newly-enqueued repeatable instances.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut inner = self.lock();

        let due: Vec<Uuid> = inner
            .entries
            .values()
            .filter(|e| {
                e.state == EntryState::Delayed
                    && e.next_run_at.is_some_and(|next| next <= now)
            })
            .map(|e| e.id)
            .collect();
        for id in due {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.state = EntryState::Waiting;
                entry.next_run_at = None;
            }
        }

        let mut fired = Vec::new();
        let due_keys: Vec<String> = inner
            .repeatables
            .values()
            .filter(|def| def.next_at <= now)
            .map(|def| def.key.clone())
            .collect();
        for key in due_keys {
            let in_flight = inner.entries.values().any(|e| {
                e.repeatable_key.as_deref() == Some(key.as_str())
                    && matches!(e.state, EntryState::Waiting | EntryState::Active | EntryState::Delayed)
            });
            if in_flight {
                continue;
            }
            let Some(def) = inner.repeatables.get(&key).cloned() else {
                continue;
            };
            let id = Uuid::new_v4();
            inner.entries.insert(
                id,
                QueueEntry {
                    id,
                    channel: def.channel.clone(),
                    name: key.clone(),
                    payload: def.payload.clone(),
                    state: EntryState::Waiting,
                    attempts: def.opts.attempts.max(1),
                    attempts_made: 0,
                    backoff_base_ms: def.opts.backoff_base_ms,
                    remove_on_complete: def.opts.remove_on_complete,
                    remove_on_fail: def.opts.remove_on_fail,
                    enqueued_at: now,
                    next_run_at: None,
                    finished_at: None,
                    repeatable_key: Some(key.clone()),
                    result: None,
                    error: None,
                },
            );
            fired.push(id);
            if let Ok(next_at) = def.schedule.next_after(now) {
                if let Some(def) = inner.repeatables.get_mut(&key) {
                    def.next_at = next_at;
                }
            }
        }

        fired
    }

    /// Pick the next eligible `Waiting` entry on `channel`, respecting the
    /// channel's concurrency limit, pause state, and the at-most-one-
    /// in-flight-per-repeatable-key invariant. Marks it `Active`.
    pub fn try_pick(&self, channel: &str) -> Option<QueueEntry> {
        let mut inner = self.lock();
        if inner.paused.contains(channel) {
            return None;
        }
        let limit = *inner.channel_concurrency.get(channel).unwrap_or(&1);
        let active = inner
            .entries
            .values()
            .filter(|e| e.channel == channel && e.state == EntryState::Active)
            .count();
        if active >= limit {
            return None;
        }

        let active_keys: BTreeSet<String> = inner
            .entries
            .values()
            .filter(|e| e.channel == channel && e.state == EntryState::Active)
            .filter_map(|e| e.repeatable_key.clone())
            .collect();

        let candidate_id = inner
            .entries
            .values()
            .filter(|e| {
                e.channel == channel
                    && e.state == EntryState::Waiting
                    && e.repeatable_key
                        .as_ref()
                        .is_none_or(|k| !active_keys.contains(k))
            })
            .min_by_key(|e| e.enqueued_at)
            .map(|e| e.id)?;

        let entry = inner.entries.get_mut(&candidate_id)?;
        entry.state = EntryState::Active;
        entry.attempts_made += 1;
        Some(entry.clone())
    }

    /// Record a successful completion (spec.md §4.3).
    pub fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<(), BkdError> {
        let mut inner = self.lock();
        let remove = {
            let entry = inner.entries.get_mut(&job_id).ok_or_else(|| {
                BkdError::new(ErrorCode::QueueChannelNotFound, format!("no such queue entry: {job_id}"))
            })?;
            entry.state = EntryState::Completed;
            entry.finished_at = Some(Utc::now());
            entry.result = Some(result);
            entry.remove_on_complete
        };
        if remove {
            inner.entries.remove(&job_id);
        }
        Ok(())
    }

    /// Record a failed attempt. Re-enters the queue as `Delayed` with
    /// exponential backoff while attempts remain, otherwise transitions to
    /// `Failed` (spec.md §4.3). Returns `true` if the entry will retry.
    pub fn fail(&self, job_id: Uuid, error: impl Into<String>) -> Result<bool, BkdError> {
        let mut inner = self.lock();
        let (will_retry, remove) = {
            let entry = inner.entries.get_mut(&job_id).ok_or_else(|| {
                BkdError::new(ErrorCode::QueueChannelNotFound, format!("no such queue entry: {job_id}"))
            })?;
            entry.error = Some(error.into());
            if entry.attempts_made < entry.attempts {
                let exp = 2u64.saturating_pow(entry.attempts_made.saturating_sub(1));
                let delay_ms = entry.backoff_base_ms.saturating_mul(exp);
                entry.state = EntryState::Delayed;
                entry.next_run_at = Some(Utc::now() + chrono::Duration::milliseconds(delay_ms as i64));
                (true, false)
            } else {
                entry.state = EntryState::Failed;
                entry.finished_at = Some(Utc::now());
                (false, entry.remove_on_fail)
            }
        };
        if remove {
            inner.entries.remove(&job_id);
        }
        Ok(will_retry)
    }
}

/// Poll interval the daemon's dispatcher uses between [`WorkQueue::tick`]
/// calls, as a convenience constant for callers that don't have a better
/// cadence (spec.md §4.3 imposes no specific cadence; this matches the
/// heartbeat interval for operability).
pub const DEFAULT_TICK_INTERVAL: StdDuration = StdDuration::from_secs(30);
