// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain-level error taxonomy (spec.md §7).
//!
//! These are the errors a caller of `bkd-core`/`bkd-executor`/`bkd-scheduler`
//! reasons about as outcomes of backup operations. They are distinct from
//! `bkd-error::ErrorCode`, which is the ambient taxonomy used for
//! infrastructure-level failures (config, queue transport, secret envelope).
//! The two never overlap: a `BackupError` never wraps an `ErrorCode` and
//! vice versa.

use thiserror::Error;
use uuid::Uuid;

/// Failure modes of the backup execution core.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The job's `cron` field does not parse as a valid cron expression.
    #[error("job {job_id} has an invalid cron expression: {cron}")]
    InvalidCron {
        /// The offending job.
        job_id: Uuid,
        /// The expression that failed to parse.
        cron: String,
    },

    /// A job referenced by id does not exist.
    #[error("backup job {0} not found")]
    JobMissing(Uuid),

    /// A credential provider referenced by id does not exist.
    #[error("credential provider {0} not found")]
    CredentialMissing(Uuid),

    /// A secret envelope token failed to decrypt (bad key, corrupt token,
    /// or tampered ciphertext — the AEAD tag does not verify).
    #[error("failed to decrypt credential material: {0}")]
    DecryptFailure(String),

    /// The source executor (dump tool or sync client) failed.
    #[error("source execution failed: {message}")]
    SourceExecutionFailure {
        /// Human-readable cause.
        message: String,
        /// Captured stdout/stderr tail, if any was collected before failure.
        execution_log: Option<String>,
    },

    /// Copying a produced artifact to a destination failed.
    #[error("destination copy failed: {message}")]
    DestinationCopyFailure {
        /// Human-readable cause.
        message: String,
        /// Captured transfer log, if any was collected before failure.
        execution_log: Option<String>,
    },

    /// A run was reaped because its heartbeat went stale (spec.md §4.5).
    #[error("run {0} orphaned: no heartbeat received within the liveness threshold")]
    RunOrphaned(Uuid),
}
