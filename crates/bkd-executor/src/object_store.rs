// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builds a credential-scoped [`ObjectStoreClient`] for one execution
//! (spec.md §4.2, §4.8 step 3). The concrete client (talking to AWS S3 or
//! an S3-compatible store) is supplied by the daemon; this crate only
//! depends on the seam.

use bkd_source::ObjectStoreClient;
use std::sync::Arc;

/// Produces a short-lived [`ObjectStoreClient`] scoped to one resolved
/// credentials bundle. A fresh client is requested per execution rather
/// than cached, mirroring the credential resolver's own no-caching policy.
pub trait ObjectStoreClientFactory: Send + Sync {
    /// Build a client authenticated with the given (already-decrypted)
    /// credentials.
    fn build(
        &self,
        endpoint: Option<&str>,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Arc<dyn ObjectStoreClient>;
}

/// An [`ObjectStoreClient`] that is never expected to be called — used as
/// the placeholder passed to [`bkd_source::execute`] for strategies that
/// ignore it (every source type except `s3`).
pub struct UnusedObjectStore;

#[async_trait::async_trait]
impl ObjectStoreClient for UnusedObjectStore {
    async fn list_objects(
        &self,
        _bucket: &str,
        _prefix: Option<&str>,
    ) -> Result<Vec<bkd_source::ObjectEntry>, String> {
        unreachable!("database-family strategies never call ObjectStoreClient")
    }

    async fn copy_object(
        &self,
        _src_bucket: &str,
        _src_key: &str,
        _dest_bucket: &str,
        _dest_key: &str,
    ) -> Result<u64, String> {
        unreachable!("database-family strategies never call ObjectStoreClient")
    }

    async fn put_file(&self, _bucket: &str, _key: &str, _local_path: &std::path::Path) -> Result<u64, String> {
        unreachable!("local destinations never call ObjectStoreClient")
    }
}
