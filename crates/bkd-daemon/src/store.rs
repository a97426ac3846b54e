// SPDX-License-Identifier: MIT OR Apache-2.0
//! The in-memory job/destination/credential-provider store the daemon wires
//! the executor and scheduler against (spec.md §1: the actual SQL schema is
//! opaque to the core; this stands in for it in standalone operation and
//! tests, matching `bkd-history::InMemoryHistoryStore`'s role).

use async_trait::async_trait;
use bkd_core::error::BackupError;
use bkd_core::{BackupJob, CredentialProvider, Destination};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Holds the current set of jobs, destinations, and credential providers.
///
/// Reads and writes go through an `RwLock` rather than a `Mutex` since the
/// executor's re-fetch (spec.md §4.8 step 2/4) is far more frequent than
/// admin mutation.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, BackupJob>>,
    destinations: RwLock<HashMap<Uuid, Destination>>,
    providers: RwLock<HashMap<Uuid, CredentialProvider>>,
}

impl InMemoryJobStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job definition.
    pub async fn put_job(&self, job: BackupJob) -> Result<(), BackupError> {
        job.validate()?;
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    /// Remove a job definition. Returns `true` if it existed. Does not
    /// touch any scheduled repeatable entry — callers pair this with
    /// `Scheduler::unschedule`.
    pub async fn remove_job(&self, job_id: Uuid) -> bool {
        self.jobs.write().await.remove(&job_id).is_some()
    }

    /// List every job currently known to the store, regardless of
    /// `enabled`/`cron` — used by admin listings, not the scheduler (which
    /// goes through `enabled_jobs`).
    pub async fn all_jobs(&self) -> Vec<BackupJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Insert or replace a destination definition.
    pub async fn put_destination(&self, destination: Destination) -> Result<(), BackupError> {
        destination.validate()?;
        self.destinations.write().await.insert(destination.id, destination);
        Ok(())
    }

    /// Insert or replace a credential provider definition.
    pub async fn put_credential_provider(&self, provider: CredentialProvider) {
        self.providers.write().await.insert(provider.id, provider);
    }
}

#[async_trait]
impl bkd_executor::JobStore for InMemoryJobStore {
    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<BackupJob>, BackupError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn fetch_destination(&self, destination_id: Uuid) -> Result<Option<Destination>, BackupError> {
        Ok(self.destinations.read().await.get(&destination_id).cloned())
    }

    async fn fetch_credential_provider(&self, provider_id: Uuid) -> Result<Option<CredentialProvider>, BackupError> {
        Ok(self.providers.read().await.get(&provider_id).cloned())
    }
}

#[async_trait]
impl bkd_scheduler::JobSource for InMemoryJobStore {
    async fn enabled_jobs(&self) -> Result<Vec<BackupJob>, BackupError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.enabled && j.cron.is_some())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkd_core::{JobDestination, RedisConfig, SourceConfig, SourceType};
    use bkd_executor::JobStore as _;
    use bkd_scheduler::JobSource as _;

    fn job(id: Uuid, enabled: bool, cron: Option<&str>) -> BackupJob {
        BackupJob {
            id,
            name: "nightly".to_string(),
            source_type: SourceType::Redis,
            config: SourceConfig::Redis(RedisConfig { host: "h".to_string(), port: 6379, password: None, database: 0 }),
            cron: cron.map(str::to_string),
            enabled,
            retention_days: 7,
            retry_count: 3,
            source_credential_provider_id: None,
            destinations: vec![JobDestination { destination_id: Uuid::new_v4(), notify_on_success: false, notify_on_failure: true }],
        }
    }

    #[tokio::test]
    async fn round_trips_a_job() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.put_job(job(id, true, Some("0 * * * *"))).await.unwrap();
        let fetched = store.fetch_job(id).await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(store.all_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn enabled_jobs_filters_disabled_and_cronless() {
        let store = InMemoryJobStore::new();
        store.put_job(job(Uuid::new_v4(), true, Some("0 * * * *"))).await.unwrap();
        store.put_job(job(Uuid::new_v4(), false, Some("0 * * * *"))).await.unwrap();
        store.put_job(job(Uuid::new_v4(), true, None)).await.unwrap();
        assert_eq!(store.enabled_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_job_drops_it() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.put_job(job(id, true, Some("0 * * * *"))).await.unwrap();
        assert!(store.remove_job(id).await);
        assert!(store.fetch_job(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_job_rejects_enabled_without_destinations() {
        let store = InMemoryJobStore::new();
        let mut j = job(Uuid::new_v4(), true, Some("0 * * * *"));
        j.destinations.clear();
        assert!(store.put_job(j).await.is_err());
    }
}
