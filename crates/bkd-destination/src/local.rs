// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `local` destination handler (spec.md §4.7).

use crate::CopyResult;
use bkd_core::error::BackupError;
use bkd_core::LocalConfig;
use bkd_source::log::ExecutionLog;
use std::path::Path;
use tracing::{info, warn};

fn fail(log: ExecutionLog, message: impl Into<String>) -> BackupError {
    BackupError::DestinationCopyFailure {
        message: message.into(),
        execution_log: Some(log.finish()),
    }
}

/// Copy `source_file_path` into `config.path`, creating it if absent.
pub async fn copy_local(source_file_path: &Path, config: &LocalConfig) -> Result<CopyResult, BackupError> {
    let mut log = ExecutionLog::new();
    log.push("Starting local copy");

    let dest_dir = Path::new(&config.path);
    if let Err(err) = tokio::fs::create_dir_all(dest_dir).await {
        log.push(format!("failed to create {}: {err}", config.path));
        return Err(fail(log, err.to_string()));
    }

    let Some(filename) = source_file_path.file_name() else {
        log.push(format!("source path {} has no file name", source_file_path.display()));
        return Err(fail(log, "source artifact path has no file name"));
    };
    let dest_path = dest_dir.join(filename);

    match tokio::fs::copy(source_file_path, &dest_path).await {
        Ok(bytes) => {
            log.push(format!("local copy completed: {bytes} bytes"));
            info!(target: "bkd.destination", path = %dest_path.display(), bytes, "local copy completed");
            Ok(CopyResult {
                file_path: dest_path.display().to_string(),
                file_size: bytes,
                execution_log: log.finish(),
            })
        }
        Err(err) => {
            log.push(format!("local copy failed: {err}"));
            warn!(target: "bkd.destination", error = %err, "local copy failed");
            Err(fail(log, err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_file_into_destination_directory() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let src_path = src_dir.path().join("postgres_appdb_20260101T000000Z.sql.gz");
        tokio::fs::write(&src_path, b"dump-contents").await.unwrap();

        let config = LocalConfig { path: dest_dir.path().join("nested").display().to_string() };
        let result = copy_local(&src_path, &config).await.unwrap();

        assert_eq!(result.file_size, "dump-contents".len() as u64);
        assert!(std::path::Path::new(&result.file_path).exists());
        assert!(result.execution_log.contains("Starting local copy"));
    }

    #[tokio::test]
    async fn missing_source_file_fails_with_log() {
        let dest_dir = tempfile::tempdir().unwrap();
        let config = LocalConfig { path: dest_dir.path().display().to_string() };
        let err = copy_local(Path::new("/nonexistent/source.sql.gz"), &config)
            .await
            .unwrap_err();
        match err {
            BackupError::DestinationCopyFailure { execution_log, .. } => {
                assert!(execution_log.unwrap().contains("local copy failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
