// SPDX-License-Identifier: MIT OR Apache-2.0
//! Destination handlers (spec.md §4.7): copy one produced artifact to a
//! `local` directory or an `s3` bucket, returning its final size, path,
//! and a timestamped execution log.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The `local` filesystem handler.
pub mod local;
/// The `s3` handler, built on [`bkd_source::ObjectStoreClient`].
pub mod s3;

use bkd_core::error::BackupError;
use bkd_core::DestinationConfig;
use bkd_source::ObjectStoreClient;
use std::path::Path;

/// What one destination handler produced.
pub struct CopyResult {
    /// Where the artifact landed — a local path, or an `s3://bucket/key`
    /// URI.
    pub file_path: String,
    /// Bytes written.
    pub file_size: u64,
    /// The timestamped transcript of this copy.
    pub execution_log: String,
}

/// Copy `source_file_path` to the destination described by `config`.
///
/// `object_store` is only consulted for `s3` destinations; it is expected
/// to already be scoped to the resolved destination credentials (spec.md
/// §4.8 step 3 — credential resolution happens once per execution, in the
/// executor, not here).
pub async fn copy(
    config: &DestinationConfig,
    source_file_path: &Path,
    object_store: &dyn ObjectStoreClient,
) -> Result<CopyResult, BackupError> {
    match config {
        DestinationConfig::Local(cfg) => local::copy_local(source_file_path, cfg).await,
        DestinationConfig::S3(cfg) => s3::copy_s3(source_file_path, cfg, object_store).await,
    }
}
