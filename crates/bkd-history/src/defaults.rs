// SPDX-License-Identifier: MIT OR Apache-2.0
//! The timing constants spec.md §4.5 recommends, and requires to be
//! mutually consistent: the reaper threshold must be strictly greater than
//! the heartbeat interval plus a safety margin.

use chrono::Duration;
use std::time::Duration as StdDuration;

/// How often a running outcome's owning executor advances its heartbeat.
pub const HEARTBEAT_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// How stale a heartbeat must be before [`super::RunHistoryStore::reap_stale`]
/// considers the outcome orphaned.
pub fn reap_threshold() -> Duration {
    Duration::minutes(5)
}

/// How often the system maintenance loop invokes the reaper.
pub const MAINTENANCE_LOOP_PERIOD: StdDuration = StdDuration::from_secs(120);

/// Panics if the configured constants violate spec.md §4.5's ordering
/// requirement (threshold > heartbeat interval + safety margin). Intended
/// to run once at daemon startup as a fast-fail sanity check.
pub fn assert_consistent() {
    let heartbeat_secs = HEARTBEAT_INTERVAL.as_secs() as i64;
    let threshold_secs = reap_threshold().num_seconds();
    assert!(
        threshold_secs > heartbeat_secs,
        "reap threshold ({threshold_secs}s) must exceed the heartbeat interval ({heartbeat_secs}s)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert_consistent();
    }

    #[test]
    fn recommended_values_match_spec() {
        assert_eq!(HEARTBEAT_INTERVAL, StdDuration::from_secs(30));
        assert_eq!(reap_threshold(), Duration::minutes(5));
        assert_eq!(MAINTENANCE_LOOP_PERIOD, StdDuration::from_secs(120));
    }
}
