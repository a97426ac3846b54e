// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `s3` destination handler (spec.md §4.7), built on the same
//! [`ObjectStoreClient`] seam the `s3` source sync strategy uses.

use crate::CopyResult;
use bkd_core::error::BackupError;
use bkd_core::S3DestinationConfig;
use bkd_source::log::ExecutionLog;
use bkd_source::ObjectStoreClient;
use std::path::Path;
use tracing::{info, warn};

fn fail(log: ExecutionLog, message: impl Into<String>) -> BackupError {
    BackupError::DestinationCopyFailure {
        message: message.into(),
        execution_log: Some(log.finish()),
    }
}

fn join_key(prefix: Option<&str>, filename: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}/{}", p.trim_matches('/'), filename),
        _ => filename.to_string(),
    }
}

/// Upload `source_file_path` to `config.bucket`/`config.prefix`.
pub async fn copy_s3(
    source_file_path: &Path,
    config: &S3DestinationConfig,
    object_store: &dyn ObjectStoreClient,
) -> Result<CopyResult, BackupError> {
    let mut log = ExecutionLog::new();
    log.push("Starting s3 copy");

    let Some(filename) = source_file_path.file_name().and_then(|f| f.to_str()) else {
        log.push(format!("source path {} has no file name", source_file_path.display()));
        return Err(fail(log, "source artifact path has no file name"));
    };
    let key = join_key(config.prefix.as_deref(), filename);

    match object_store.put_file(&config.bucket, &key, source_file_path).await {
        Ok(bytes) => {
            log.push(format!("s3 copy to {}/{key} completed: {bytes} bytes", config.bucket));
            info!(target: "bkd.destination", bucket = %config.bucket, key = %key, bytes, "s3 copy completed");
            Ok(CopyResult {
                file_path: format!("s3://{}/{key}", config.bucket),
                file_size: bytes,
                execution_log: log.finish(),
            })
        }
        Err(err) => {
            log.push(format!("s3 copy to {}/{key} failed: {err}", config.bucket));
            warn!(target: "bkd.destination", bucket = %config.bucket, key = %key, error = %err, "s3 copy failed");
            Err(fail(log, err))
        }
    }
}
