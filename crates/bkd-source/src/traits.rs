// SPDX-License-Identifier: MIT OR Apache-2.0
//! The seams a strategy calls through. Production implementations shell out
//! to `pg_dump`/`mysqldump`/`mongodump`/`redis-cli` or talk to an S3-style
//! API; tests substitute fakes (spec.md §4.6: strategies must be testable
//! without real external services).

use async_trait::async_trait;
use std::path::Path;

/// Runs the per-source-type dump command and writes the artifact to
/// `output_path`. Returns the number of bytes written.
#[async_trait]
pub trait DumpTool: Send + Sync {
    /// `pg_dump` equivalent, writing a compressed SQL dump.
    async fn pg_dump(
        &self,
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
        output_path: &Path,
    ) -> Result<u64, String>;

    /// `mysqldump` equivalent, writing a compressed SQL dump.
    async fn mysqldump(
        &self,
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
        output_path: &Path,
    ) -> Result<u64, String>;

    /// `mongodump --archive --gzip` equivalent.
    async fn mongodump(&self, connection_string: &str, output_path: &Path) -> Result<u64, String>;

    /// `redis-cli --rdb` equivalent, writing a compressed RDB snapshot.
    async fn redis_dump(
        &self,
        host: &str,
        port: u16,
        password: Option<&str>,
        database: u8,
        output_path: &Path,
    ) -> Result<u64, String>;
}

/// One listed object in an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    /// Full object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
}

/// Minimal S3-compatible object store surface, shared by the `s3` source
/// sync strategy and `bkd-destination`'s `s3` handler (spec.md §4.6, §4.7).
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// List objects in `bucket` under `prefix` (non-recursive prefix match,
    /// as S3 list APIs behave).
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectEntry>, String>;

    /// Server-side (or streamed) copy of one object between buckets/keys.
    /// Returns the number of bytes copied.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<u64, String>;

    /// Upload a local file to `bucket`/`key`. Returns the number of bytes
    /// uploaded.
    async fn put_file(&self, bucket: &str, key: &str, local_path: &Path) -> Result<u64, String>;
}
