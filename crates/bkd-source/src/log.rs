// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution log composition (spec.md §4.6: "Starting {type} backup" ...
//! a terminal success/failure line).

use chrono::Utc;

/// Append-only, timestamped transcript of one strategy's run. Joined into
/// a single string for storage on the [`crate::ExecutionResult`] or inside
/// a [`bkd_core::BackupError`] on failure.
pub struct ExecutionLog {
    lines: Vec<String>,
}

impl ExecutionLog {
    /// Start a fresh log.
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Append one timestamped line.
    pub fn push(&mut self, message: impl std::fmt::Display) {
        self.lines.push(format!("[{}] {}", Utc::now().to_rfc3339(), message));
    }

    /// Join into the stored transcript.
    pub fn finish(self) -> String {
        self.lines.join("\n")
    }
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}
