// SPDX-License-Identifier: MIT OR Apache-2.0
//! Strategy dispatch (spec.md §4.6).

use crate::log::ExecutionLog;
use crate::traits::{DumpTool, ObjectStoreClient};
use bkd_core::error::BackupError;
use bkd_core::SourceConfig;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A scratch directory a database-family strategy writes its single
/// artifact file into.
pub struct TempFileArea {
    /// Directory the artifact is written under. Created by the caller.
    pub dir: PathBuf,
}

/// Where a completed backup should land: either a single local artifact
/// (database-family sources) or an already-resolved destination bucket the
/// `s3` sync strategy mirrors into directly (spec.md §4.8 step 5, §4.6).
pub struct DestinationBundle {
    /// Destination bucket.
    pub bucket: String,
    /// Key prefix to write under.
    pub prefix: Option<String>,
    /// Endpoint override, if any.
    pub endpoint: Option<String>,
    /// Region.
    pub region: String,
}

/// Where [`execute`] should send its output.
pub enum OutputTarget<'a> {
    /// Write one file under this directory (database-family sources).
    TempFile(&'a TempFileArea),
    /// Mirror directly into this destination (the `s3` sync source).
    Destination(&'a DestinationBundle),
}

/// What one strategy produced.
pub struct ExecutionResult {
    /// Where the artifact landed — a local path for database-family
    /// sources, an `s3://bucket/prefix/` URI for the sync source.
    pub file_path: String,
    /// Total bytes written/transferred.
    pub file_size: u64,
    /// Source-type-specific metadata (spec.md §4.6).
    pub metadata: serde_json::Value,
    /// The timestamped transcript of this run.
    pub execution_log: String,
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

fn mismatch(expected: &str) -> BackupError {
    BackupError::SourceExecutionFailure {
        message: format!("source strategy requires a {expected} output target"),
        execution_log: None,
    }
}

fn fail(log: ExecutionLog, message: impl Into<String>) -> BackupError {
    let message = message.into();
    BackupError::SourceExecutionFailure {
        message,
        execution_log: Some(log.finish()),
    }
}

/// Run the strategy matching `config`'s variant, writing to `target`.
pub async fn execute(
    config: &SourceConfig,
    target: OutputTarget<'_>,
    dump_tool: &dyn DumpTool,
    object_store: &dyn ObjectStoreClient,
) -> Result<ExecutionResult, BackupError> {
    match config {
        SourceConfig::Postgres(cfg) => {
            let OutputTarget::TempFile(area) = target else { return Err(mismatch("temp file")) };
            let mut log = ExecutionLog::new();
            log.push("Starting postgres backup");
            let password = match bkd_secret::decrypt(cfg.password.as_str()) {
                Ok(p) => p,
                Err(e) => {
                    log.push(format!("decrypt failed: {e}"));
                    return Err(fail(log, format!("decrypt failed: {e}")));
                }
            };
            let filename = format!("postgres_{}_{}.sql.gz", cfg.database, timestamp());
            let output_path = area.dir.join(&filename);
            match dump_tool
                .pg_dump(&cfg.host, cfg.port, &cfg.database, &cfg.username, &password, &output_path)
                .await
            {
                Ok(size) => {
                    log.push(format!("postgres backup of {} completed: {size} bytes", cfg.database));
                    info!(target: "bkd.source", database = %cfg.database, size, "postgres backup completed");
                    Ok(ExecutionResult {
                        file_path: output_path.display().to_string(),
                        file_size: size,
                        metadata: serde_json::json!({
                            "database": cfg.database,
                            "host": cfg.host,
                            "format": "sql",
                            "compressed": true,
                        }),
                        execution_log: log.finish(),
                    })
                }
                Err(err) => {
                    log.push(format!("postgres backup of {} failed: {err}", cfg.database));
                    warn!(target: "bkd.source", database = %cfg.database, error = %err, "postgres backup failed");
                    Err(fail(log, err))
                }
            }
        }
        SourceConfig::Mysql(cfg) => {
            let OutputTarget::TempFile(area) = target else { return Err(mismatch("temp file")) };
            let mut log = ExecutionLog::new();
            log.push("Starting mysql backup");
            let password = match bkd_secret::decrypt(cfg.password.as_str()) {
                Ok(p) => p,
                Err(e) => {
                    log.push(format!("decrypt failed: {e}"));
                    return Err(fail(log, format!("decrypt failed: {e}")));
                }
            };
            let filename = format!("mysql_{}_{}.sql.gz", cfg.database, timestamp());
            let output_path = area.dir.join(&filename);
            match dump_tool
                .mysqldump(&cfg.host, cfg.port, &cfg.database, &cfg.username, &password, &output_path)
                .await
            {
                Ok(size) => {
                    log.push(format!("mysql backup of {} completed: {size} bytes", cfg.database));
                    info!(target: "bkd.source", database = %cfg.database, size, "mysql backup completed");
                    Ok(ExecutionResult {
                        file_path: output_path.display().to_string(),
                        file_size: size,
                        metadata: serde_json::json!({
                            "database": cfg.database,
                            "host": cfg.host,
                            "format": "sql",
                            "compressed": true,
                        }),
                        execution_log: log.finish(),
                    })
                }
                Err(err) => {
                    log.push(format!("mysql backup of {} failed: {err}", cfg.database));
                    warn!(target: "bkd.source", database = %cfg.database, error = %err, "mysql backup failed");
                    Err(fail(log, err))
                }
            }
        }
        SourceConfig::Mongodb(cfg) => {
            let OutputTarget::TempFile(area) = target else { return Err(mismatch("temp file")) };
            let mut log = ExecutionLog::new();
            log.push("Starting mongodb backup");
            let connection_string = match bkd_secret::decrypt(cfg.connection_string.as_str()) {
                Ok(c) => c,
                Err(e) => {
                    log.push(format!("decrypt failed: {e}"));
                    return Err(fail(log, format!("decrypt failed: {e}")));
                }
            };
            let database = parse_mongo_database(&connection_string);
            let filename = format!("mongodb_{}_{}.archive.gz", database, timestamp());
            let output_path = area.dir.join(&filename);
            match dump_tool.mongodump(&connection_string, &output_path).await {
                Ok(size) => {
                    log.push(format!("mongodb backup of {database} completed: {size} bytes"));
                    info!(target: "bkd.source", database = %database, size, "mongodb backup completed");
                    Ok(ExecutionResult {
                        file_path: output_path.display().to_string(),
                        file_size: size,
                        metadata: serde_json::json!({
                            "database": database,
                            "format": "archive",
                            "compressed": true,
                        }),
                        execution_log: log.finish(),
                    })
                }
                Err(err) => {
                    log.push(format!("mongodb backup of {database} failed: {err}"));
                    warn!(target: "bkd.source", database = %database, error = %err, "mongodb backup failed");
                    Err(fail(log, err))
                }
            }
        }
        SourceConfig::Redis(cfg) => {
            let OutputTarget::TempFile(area) = target else { return Err(mismatch("temp file")) };
            let mut log = ExecutionLog::new();
            log.push("Starting redis backup");
            let password = match &cfg.password {
                Some(enc) => match bkd_secret::decrypt(enc.as_str()) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        log.push(format!("decrypt failed: {e}"));
                        return Err(fail(log, format!("decrypt failed: {e}")));
                    }
                },
                None => None,
            };
            let filename = format!("redis_{}_{}.rdb.gz", cfg.database, timestamp());
            let output_path = area.dir.join(&filename);
            match dump_tool
                .redis_dump(&cfg.host, cfg.port, password.as_deref(), cfg.database, &output_path)
                .await
            {
                Ok(size) => {
                    log.push(format!("redis backup of db {} completed: {size} bytes", cfg.database));
                    info!(target: "bkd.source", database = cfg.database, size, "redis backup completed");
                    Ok(ExecutionResult {
                        file_path: output_path.display().to_string(),
                        file_size: size,
                        metadata: serde_json::json!({
                            "database": cfg.database,
                            "format": "rdb",
                            "compressed": true,
                        }),
                        execution_log: log.finish(),
                    })
                }
                Err(err) => {
                    log.push(format!("redis backup of db {} failed: {err}", cfg.database));
                    warn!(target: "bkd.source", database = cfg.database, error = %err, "redis backup failed");
                    Err(fail(log, err))
                }
            }
        }
        SourceConfig::S3(cfg) => {
            let OutputTarget::Destination(bundle) = target else { return Err(mismatch("destination bundle")) };
            let mut log = ExecutionLog::new();
            log.push("Starting s3 backup");
            let entries = match object_store.list_objects(&cfg.bucket, cfg.prefix.as_deref()).await {
                Ok(e) => e,
                Err(err) => {
                    log.push(format!("listing {} failed: {err}", cfg.bucket));
                    return Err(fail(log, err));
                }
            };
            let run_prefix = s3_join(&[bundle.prefix.as_deref(), Some(&timestamp())]);
            let source_prefix = cfg.prefix.clone().unwrap_or_default();
            let mut total_bytes = 0u64;
            let mut copied = 0usize;
            for entry in &entries {
                let relative = entry.key.strip_prefix(&source_prefix).unwrap_or(&entry.key);
                let relative = relative.trim_start_matches('/');
                let dest_key = s3_join(&[Some(run_prefix.as_str()), Some(relative)]);
                match object_store
                    .copy_object(&cfg.bucket, &entry.key, &bundle.bucket, &dest_key)
                    .await
                {
                    Ok(size) => {
                        total_bytes += size;
                        copied += 1;
                    }
                    Err(err) => {
                        log.push(format!("copy of {} failed: {err}", entry.key));
                        return Err(fail(log, err));
                    }
                }
            }
            log.push(format!(
                "s3 backup of {} objects from {} completed: {total_bytes} bytes",
                copied, cfg.bucket
            ));
            info!(target: "bkd.source", bucket = %cfg.bucket, copied, total_bytes, "s3 backup completed");
            Ok(ExecutionResult {
                file_path: format!("s3://{}/{}/", bundle.bucket, run_prefix),
                file_size: total_bytes,
                metadata: serde_json::json!({
                    "source_bucket": cfg.bucket,
                    "object_count": copied,
                }),
                execution_log: log.finish(),
            })
        }
    }
}

fn parse_mongo_database(connection_string: &str) -> String {
    let without_query = connection_string.split('?').next().unwrap_or(connection_string);
    match without_query.rsplit_once('/') {
        Some((_, db)) if !db.is_empty() => db.to_string(),
        _ => "mongodb".to_string(),
    }
}

fn s3_join(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .filter_map(|p| *p)
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
