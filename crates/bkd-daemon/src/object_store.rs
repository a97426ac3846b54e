// SPDX-License-Identifier: MIT OR Apache-2.0
//! The default [`ObjectStoreClientFactory`]: a client that reports itself
//! unconfigured. Talking to a real S3-compatible endpoint is, like vendor
//! dump tool syntax, outside this core's contract (spec.md §1) — a
//! deployment that runs `s3` source/destination jobs wires its own
//! `ObjectStoreClient` (backed by whatever SDK it prefers) through this
//! seam instead of using this default.

use async_trait::async_trait;
use bkd_executor::ObjectStoreClientFactory;
use bkd_source::{ObjectEntry, ObjectStoreClient};
use std::path::Path;
use std::sync::Arc;

const UNCONFIGURED: &str = "no ObjectStoreClient wired for this deployment; s3 source/destination \
jobs require a production ObjectStoreClientFactory to be supplied to the daemon";

struct UnconfiguredObjectStore;

#[async_trait]
impl ObjectStoreClient for UnconfiguredObjectStore {
    async fn list_objects(&self, _bucket: &str, _prefix: Option<&str>) -> Result<Vec<ObjectEntry>, String> {
        Err(UNCONFIGURED.to_string())
    }

    async fn copy_object(&self, _src_bucket: &str, _src_key: &str, _dest_bucket: &str, _dest_key: &str) -> Result<u64, String> {
        Err(UNCONFIGURED.to_string())
    }

    async fn put_file(&self, _bucket: &str, _key: &str, _local_path: &Path) -> Result<u64, String> {
        Err(UNCONFIGURED.to_string())
    }
}

/// Always produces an [`UnconfiguredObjectStore`]. The default for a
/// standalone daemon that runs no `s3` jobs; swap in a real factory to
/// enable them.
pub struct UnconfiguredObjectStoreFactory;

impl ObjectStoreClientFactory for UnconfiguredObjectStoreFactory {
    fn build(&self, _endpoint: Option<&str>, _region: &str, _access_key_id: &str, _secret_access_key: &str) -> Arc<dyn ObjectStoreClient> {
        Arc::new(UnconfiguredObjectStore)
    }
}
