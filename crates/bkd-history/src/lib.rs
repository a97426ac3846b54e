// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run history store (spec.md §4.5): outcome state machine,
//! heartbeats, stale-run reaper, and aggregated read views.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Recommended timing constants and their consistency check.
pub mod defaults;
/// The [`RunHistoryStore`] trait and its in-memory implementation.
pub mod store;

pub use store::{InMemoryHistoryStore, JobStats, RunHistoryStore, RunSummary};
