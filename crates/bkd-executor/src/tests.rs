// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end fan-out scenarios, mirroring spec.md §8's S1/S2/S3/S6.

use crate::job_store::JobStore;
use crate::notification::{DestinationStatus, NotificationEvent, NotificationSink};
use crate::object_store::ObjectStoreClientFactory;
use crate::{ExecutorConfig, Executor};
use async_trait::async_trait;
use bkd_core::error::BackupError;
use bkd_core::*;
use bkd_history::{InMemoryHistoryStore, RunHistoryStore};
use bkd_source::{DumpTool, ObjectEntry, ObjectStoreClient};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn lock_secret() -> MutexGuard<'static, ()> {
    let guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        std::env::set_var("ENCRYPTION_SECRET", "executor scenario test secret, 32+ bytes long");
    }
    bkd_secret::reset_key_cache_for_tests();
    guard
}

struct FakeJobStore {
    jobs: HashMap<Uuid, BackupJob>,
    destinations: HashMap<Uuid, Destination>,
    providers: HashMap<Uuid, CredentialProvider>,
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<BackupJob>, BackupError> {
        Ok(self.jobs.get(&job_id).cloned())
    }

    async fn fetch_destination(&self, destination_id: Uuid) -> Result<Option<Destination>, BackupError> {
        Ok(self.destinations.get(&destination_id).cloned())
    }

    async fn fetch_credential_provider(&self, provider_id: Uuid) -> Result<Option<CredentialProvider>, BackupError> {
        Ok(self.providers.get(&provider_id).cloned())
    }
}

struct FakeDumpTool;

#[async_trait]
impl DumpTool for FakeDumpTool {
    async fn pg_dump(
        &self,
        _host: &str,
        _port: u16,
        _database: &str,
        _username: &str,
        _password: &str,
        output_path: &Path,
    ) -> Result<u64, String> {
        tokio::fs::write(output_path, b"pg-dump-bytes").await.map_err(|e| e.to_string())?;
        Ok(13)
    }

    async fn mysqldump(
        &self,
        _host: &str,
        _port: u16,
        _database: &str,
        _username: &str,
        _password: &str,
        output_path: &Path,
    ) -> Result<u64, String> {
        tokio::fs::write(output_path, b"mysql-dump").await.map_err(|e| e.to_string())?;
        Ok(10)
    }

    async fn mongodump(&self, _connection_string: &str, output_path: &Path) -> Result<u64, String> {
        tokio::fs::write(output_path, b"mongo-archive").await.map_err(|e| e.to_string())?;
        Ok(13)
    }

    async fn redis_dump(
        &self,
        _host: &str,
        _port: u16,
        _password: Option<&str>,
        _database: u8,
        output_path: &Path,
    ) -> Result<u64, String> {
        tokio::fs::write(output_path, b"rdb-bytes").await.map_err(|e| e.to_string())?;
        Ok(9)
    }
}

struct RecordingObjectStore {
    entries: Vec<ObjectEntry>,
}

#[async_trait]
impl ObjectStoreClient for RecordingObjectStore {
    async fn list_objects(&self, _bucket: &str, _prefix: Option<&str>) -> Result<Vec<ObjectEntry>, String> {
        Ok(self.entries.clone())
    }

    async fn copy_object(
        &self,
        _src_bucket: &str,
        src_key: &str,
        _dest_bucket: &str,
        _dest_key: &str,
    ) -> Result<u64, String> {
        Ok(self.entries.iter().find(|e| e.key == src_key).map(|e| e.size).unwrap_or(0))
    }

    async fn put_file(&self, _bucket: &str, _key: &str, local_path: &Path) -> Result<u64, String> {
        Ok(std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0))
    }
}

struct RecordingObjectStoreFactory {
    entries: Vec<ObjectEntry>,
    calls: Mutex<Vec<(Option<String>, String, String, String)>>,
}

impl ObjectStoreClientFactory for RecordingObjectStoreFactory {
    fn build(
        &self,
        endpoint: Option<&str>,
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Arc<dyn ObjectStoreClient> {
        self.calls.lock().unwrap().push((
            endpoint.map(str::to_string),
            region.to_string(),
            access_key_id.to_string(),
            secret_access_key.to_string(),
        ));
        Arc::new(RecordingObjectStore { entries: self.entries.clone() })
    }
}

struct RecordingSink {
    events: Mutex<Vec<NotificationEvent>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: NotificationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn postgres_job(id: Uuid, destinations: Vec<JobDestination>) -> BackupJob {
    let password = bkd_secret::encrypt("hunter2").unwrap();
    BackupJob {
        id,
        name: "nightly-appdb".to_string(),
        source_type: SourceType::Postgres,
        config: SourceConfig::Postgres(PostgresConfig {
            host: "db.internal".to_string(),
            port: 5432,
            database: "appdb".to_string(),
            username: "admin".to_string(),
            password: password.into(),
        }),
        cron: Some("0 0 * * * *".to_string()),
        enabled: true,
        retention_days: 7,
        retry_count: 3,
        source_credential_provider_id: None,
        destinations,
    }
}

fn local_destination(id: Uuid, name: &str, path: impl Into<String>) -> Destination {
    Destination {
        id,
        name: name.to_string(),
        destination_type: DestinationType::Local,
        config: DestinationConfig::Local(LocalConfig { path: path.into() }),
        credential_provider_id: None,
    }
}

fn s3_destination(id: Uuid, name: &str, bucket: impl Into<String>, prefix: Option<&str>) -> Destination {
    Destination {
        id,
        name: name.to_string(),
        destination_type: DestinationType::S3,
        config: DestinationConfig::S3(S3DestinationConfig {
            bucket: bucket.into(),
            prefix: prefix.map(str::to_string),
            endpoint: None,
            region: None,
        }),
        credential_provider_id: None,
    }
}

fn empty_factory() -> Arc<RecordingObjectStoreFactory> {
    Arc::new(RecordingObjectStoreFactory { entries: vec![], calls: Mutex::new(vec![]) })
}

#[tokio::test]
async fn s1_postgres_single_destination_happy_path() {
    let _guard = lock_secret();
    let out_dir = tempfile::tempdir().unwrap();
    let temp_dir = tempfile::tempdir().unwrap();

    let job_id = Uuid::new_v4();
    let dest_id = Uuid::new_v4();
    let job = postgres_job(
        job_id,
        vec![JobDestination { destination_id: dest_id, notify_on_success: true, notify_on_failure: true }],
    );
    let destination = local_destination(dest_id, "primary", out_dir.path().display().to_string());

    let job_store = Arc::new(FakeJobStore {
        jobs: HashMap::from([(job_id, job)]),
        destinations: HashMap::from([(dest_id, destination)]),
        providers: HashMap::new(),
    });
    let history = Arc::new(InMemoryHistoryStore::new());
    let sink = Arc::new(RecordingSink { events: Mutex::new(vec![]) });

    let executor = Executor::new(
        job_store,
        history.clone(),
        Arc::new(FakeDumpTool),
        empty_factory(),
        sink.clone(),
        ExecutorConfig { temp_dir: temp_dir.path().to_path_buf(), ..ExecutorConfig::default() },
    );

    let summary = executor.execute_job(job_id, CancellationToken::new()).await.unwrap();
    assert!(!summary.has_failures);

    let outcomes = history.all_outcomes().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Completed);
    assert!(outcomes[0].file_path.as_ref().unwrap().contains("postgres_appdb_"));
    assert_eq!(outcomes[0].file_size, Some(13));

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].destinations.len(), 1);
    assert_eq!(events[0].destinations[0].status, DestinationStatus::Completed);
}

#[tokio::test]
async fn s2_three_destinations_middle_one_fails() {
    let _guard = lock_secret();
    let temp_dir = tempfile::tempdir().unwrap();
    let good_a = tempfile::tempdir().unwrap();
    let good_b = tempfile::tempdir().unwrap();
    let blocked_parent = tempfile::tempdir().unwrap();
    // A regular file where the destination expects a directory: create_dir_all fails.
    let blocked_path = blocked_parent.path().join("not-a-dir");
    std::fs::write(&blocked_path, b"occupied").unwrap();

    let job_id = Uuid::new_v4();
    let dest_a = Uuid::new_v4();
    let dest_b = Uuid::new_v4();
    let dest_c = Uuid::new_v4();
    let job = postgres_job(
        job_id,
        vec![
            JobDestination { destination_id: dest_a, notify_on_success: true, notify_on_failure: true },
            JobDestination { destination_id: dest_b, notify_on_success: true, notify_on_failure: true },
            JobDestination { destination_id: dest_c, notify_on_success: true, notify_on_failure: true },
        ],
    );

    let job_store = Arc::new(FakeJobStore {
        jobs: HashMap::from([(job_id, job)]),
        destinations: HashMap::from([
            (dest_a, local_destination(dest_a, "a", good_a.path().display().to_string())),
            (dest_b, local_destination(dest_b, "b", blocked_path.display().to_string())),
            (dest_c, local_destination(dest_c, "c", good_b.path().display().to_string())),
        ]),
        providers: HashMap::new(),
    });
    let history = Arc::new(InMemoryHistoryStore::new());
    let sink = Arc::new(RecordingSink { events: Mutex::new(vec![]) });

    let executor = Executor::new(
        job_store,
        history.clone(),
        Arc::new(FakeDumpTool),
        empty_factory(),
        sink,
        ExecutorConfig { temp_dir: temp_dir.path().to_path_buf(), ..ExecutorConfig::default() },
    );

    let summary = executor.execute_job(job_id, CancellationToken::new()).await.unwrap();
    assert!(summary.has_failures);

    let outcomes = history.all_outcomes().await;
    assert_eq!(outcomes.len(), 3);
    let statuses: Vec<OutcomeStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(statuses.iter().filter(|s| **s == OutcomeStatus::Completed).count(), 2);
    assert_eq!(statuses.iter().filter(|s| **s == OutcomeStatus::Failed).count(), 1);

    let run = bkd_core::run::aggregate(summary.run_id, &outcomes);
    assert_eq!(run.status, AggregatedStatus::Partial);

    // The temp artifact directory is cleaned up after every destination is attempted.
    assert!(!temp_dir.path().join(summary.run_id.to_string()).exists());
}

#[tokio::test]
async fn s3_s3_sync_zero_destinations_fails_without_outcomes() {
    let job_id = Uuid::new_v4();
    let job = BackupJob {
        id: job_id,
        name: "bucket-mirror".to_string(),
        source_type: SourceType::S3,
        config: SourceConfig::S3(S3SourceConfig { bucket: "b".to_string(), ..S3SourceConfig::default() }),
        cron: None,
        enabled: true,
        retention_days: 7,
        retry_count: 3,
        source_credential_provider_id: None,
        destinations: vec![],
    };
    let job_store = Arc::new(FakeJobStore {
        jobs: HashMap::from([(job_id, job)]),
        destinations: HashMap::new(),
        providers: HashMap::new(),
    });
    let history = Arc::new(InMemoryHistoryStore::new());
    let sink = Arc::new(RecordingSink { events: Mutex::new(vec![]) });
    let executor = Executor::new(job_store, history.clone(), Arc::new(FakeDumpTool), empty_factory(), sink, ExecutorConfig::default());

    let err = executor.execute_job(job_id, CancellationToken::new()).await.unwrap_err();
    match err {
        BackupError::SourceExecutionFailure { message, .. } => {
            assert_eq!(message, "S3 backup requires at least one destination");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(history.all_outcomes().await.is_empty());
}

#[tokio::test]
async fn s6_credential_merge_reaches_the_object_store_factory() {
    let _guard = lock_secret();
    let provider_id = Uuid::new_v4();
    let job_id = Uuid::new_v4();
    let dest_id = Uuid::new_v4();

    let provider = CredentialProvider {
        id: provider_id,
        name: "prod-s3".to_string(),
        provider_type: ProviderType::S3,
        provider_preset: "aws".to_string(),
        config: ProviderConfig::S3(S3ProviderConfig {
            endpoint: Some("https://e".to_string()),
            region: Some("r".to_string()),
            access_key_id: bkd_secret::encrypt("K").unwrap().into(),
            secret_access_key: bkd_secret::encrypt("S").unwrap().into(),
        }),
    };

    let job = BackupJob {
        id: job_id,
        name: "bucket-mirror".to_string(),
        source_type: SourceType::S3,
        config: SourceConfig::S3(S3SourceConfig {
            bucket: "b".to_string(),
            prefix: Some("p".to_string()),
            ..S3SourceConfig::default()
        }),
        cron: None,
        enabled: true,
        retention_days: 7,
        retry_count: 3,
        source_credential_provider_id: Some(provider_id),
        destinations: vec![JobDestination { destination_id: dest_id, notify_on_success: true, notify_on_failure: true }],
    };
    let destination = s3_destination(dest_id, "mirror-target", "mirror-bucket", Some("backups"));

    let job_store = Arc::new(FakeJobStore {
        jobs: HashMap::from([(job_id, job)]),
        destinations: HashMap::from([(dest_id, destination)]),
        providers: HashMap::from([(provider_id, provider)]),
    });
    let history = Arc::new(InMemoryHistoryStore::new());
    let sink = Arc::new(RecordingSink { events: Mutex::new(vec![]) });
    let factory = Arc::new(RecordingObjectStoreFactory {
        entries: vec![ObjectEntry { key: "p/x.txt".to_string(), size: 3 }],
        calls: Mutex::new(vec![]),
    });

    let executor = Executor::new(job_store, history.clone(), Arc::new(FakeDumpTool), factory.clone(), sink, ExecutorConfig::default());
    let summary = executor.execute_job(job_id, CancellationToken::new()).await.unwrap();
    assert!(!summary.has_failures);

    let calls = factory.calls.lock().unwrap();
    assert!(calls
        .iter()
        .any(|(endpoint, region, access_key_id, secret_access_key)| endpoint.as_deref() == Some("https://e")
            && region == "r"
            && access_key_id == "K"
            && secret_access_key == "S"));
}
