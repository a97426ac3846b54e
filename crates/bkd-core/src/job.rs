// SPDX-License-Identifier: MIT OR Apache-2.0
//! `BackupJob` — the user's intent (spec.md §3).

use crate::error::BackupError;
use crate::raw::RawConfig;
use crate::secret_string::EncryptedString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source type enumeration (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// PostgreSQL database dump.
    Postgres,
    /// MySQL database dump.
    Mysql,
    /// MongoDB dump.
    Mongodb,
    /// Redis RDB snapshot.
    Redis,
    /// Object-store-to-object-store sync.
    S3,
}

impl SourceType {
    /// `true` for the four dump-producing database sources (spec.md §4.8 step 5).
    pub fn is_database_family(self) -> bool {
        !matches!(self, SourceType::S3)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceType::Postgres => "postgres",
            SourceType::Mysql => "mysql",
            SourceType::Mongodb => "mongodb",
            SourceType::Redis => "redis",
            SourceType::S3 => "s3",
        };
        f.write_str(s)
    }
}

/// Connection config for a `postgres` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Hostname or address.
    pub host: String,
    /// Port (default 5432 is the caller's responsibility, not assumed here).
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Connection username.
    pub username: String,
    /// Sensitive — decrypted just-in-time by the source executor.
    pub password: EncryptedString,
}

/// Connection config for a `mysql` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    /// Hostname or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Connection username.
    pub username: String,
    /// Sensitive — decrypted just-in-time by the source executor.
    pub password: EncryptedString,
}

/// Connection config for a `mongodb` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongodbConfig {
    /// Full connection string (`mongodb://` or `mongodb+srv://`). May embed
    /// credentials; the database name is parsed out of it by the executor
    /// (spec.md §4.6).
    pub connection_string: EncryptedString,
}

/// Connection config for a `redis` source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Hostname or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Optional auth password.
    #[serde(default)]
    pub password: Option<EncryptedString>,
    /// Logical database index (`SELECT n`).
    #[serde(default)]
    pub database: u8,
}

/// Config for an `s3`-sync source: a prefix under a bucket to mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3SourceConfig {
    /// Source bucket.
    pub bucket: String,
    /// Optional prefix to scope the listing.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Optional endpoint override (non-AWS S3-compatible stores).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region; defaults to `"auto"` when absent after credential merge.
    #[serde(default)]
    pub region: Option<String>,
    /// Merged in from the resolved credential provider at pickup time
    /// (spec.md §4.8 step 3); absent at rest.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Merged in from the resolved credential provider at pickup time;
    /// absent at rest.
    #[serde(default)]
    pub secret_access_key: EncryptedString,
}

impl Default for S3SourceConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: None,
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: EncryptedString::new(""),
        }
    }
}

/// Tagged source configuration — one variant per [`SourceType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceConfig {
    /// `postgres` source.
    Postgres(PostgresConfig),
    /// `mysql` source.
    Mysql(MysqlConfig),
    /// `mongodb` source.
    Mongodb(MongodbConfig),
    /// `redis` source.
    Redis(RedisConfig),
    /// `s3` sync source.
    S3(S3SourceConfig),
}

impl SourceConfig {
    /// Decode a [`RawConfig`] into the variant matching `source_type`.
    ///
    /// The tag lives on the sibling `source_type` field (the job's, not the
    /// config's own), per spec.md's Design Note 1 — the opaque bag is
    /// decoded into the typed variant using that outer tag.
    pub fn decode(source_type: SourceType, raw: &RawConfig) -> Result<Self, BackupError> {
        let decoded = match source_type {
            SourceType::Postgres => SourceConfig::Postgres(raw.decode().map_err(invalid_config)?),
            SourceType::Mysql => SourceConfig::Mysql(raw.decode().map_err(invalid_config)?),
            SourceType::Mongodb => SourceConfig::Mongodb(raw.decode().map_err(invalid_config)?),
            SourceType::Redis => SourceConfig::Redis(raw.decode().map_err(invalid_config)?),
            SourceType::S3 => SourceConfig::S3(raw.decode().map_err(invalid_config)?),
        };
        Ok(decoded)
    }
}

fn invalid_config(err: serde_json::Error) -> BackupError {
    BackupError::SourceExecutionFailure {
        message: format!("invalid source config: {err}"),
        execution_log: None,
    }
}

/// A destination reference attached to a job, with per-channel notification
/// preferences (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDestination {
    /// The referenced [`crate::destination::Destination`] id.
    pub destination_id: Uuid,
    /// Emit a `success` notification event for this destination's outcome.
    #[serde(default)]
    pub notify_on_success: bool,
    /// Emit a `failure` notification event for this destination's outcome.
    #[serde(default = "default_true")]
    pub notify_on_failure: bool,
}

fn default_true() -> bool {
    true
}

/// The user's intent: what to back up, on what schedule, to where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    /// Stable identifier. Treated as monotonically assigned and never
    /// reused (spec.md §9, Open Question 2).
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Source type.
    pub source_type: SourceType,
    /// Source-type-specific configuration.
    pub config: SourceConfig,
    /// Cron expression; `None` or invalid means "not actively scheduled"
    /// (spec.md §4.4).
    #[serde(default)]
    pub cron: Option<String>,
    /// Whether the scheduler should materialize triggers for this job.
    pub enabled: bool,
    /// Days to retain backups (informational at this layer; retention
    /// enforcement is out of scope per spec.md §1).
    pub retention_days: u32,
    /// Retry count, 0–10 (default 3).
    pub retry_count: u32,
    /// Source-credential-provider reference, used when `source_type == s3`.
    #[serde(default)]
    pub source_credential_provider_id: Option<Uuid>,
    /// Destinations this job writes to.
    #[serde(default)]
    pub destinations: Vec<JobDestination>,
}

impl BackupJob {
    /// Validate the `enabled ⇒ at least one destination` invariant
    /// (spec.md §3) and the retry_count range.
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.enabled && self.destinations.is_empty() {
            return Err(BackupError::SourceExecutionFailure {
                message: format!("job {} is enabled but has no destinations", self.id),
                execution_log: None,
            });
        }
        if self.retry_count > 10 {
            return Err(BackupError::SourceExecutionFailure {
                message: format!(
                    "job {} retry_count {} exceeds the maximum of 10",
                    self.id, self.retry_count
                ),
                execution_log: None,
            });
        }
        Ok(())
    }

    /// The repeatable queue key for this job (spec.md §4.3/§4.4).
    pub fn repeatable_key(&self) -> String {
        format!("backup-job-{}", self.id)
    }
}
