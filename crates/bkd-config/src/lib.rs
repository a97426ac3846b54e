// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading for the backup execution core (spec.md §6).
//!
//! Configuration is environment-driven per spec.md's contract; this crate
//! additionally supports an optional TOML overlay file for local development,
//! loaded first and then overridden by environment variables — environment
//! always wins.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use bkd_error::{BkdError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Process role, controlling which subsystems start (spec.md §6, `MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Only the API-facing surface runs: migrations run, workers do not start.
    ApiOnly,
    /// Only the worker pools and scheduler run; no migrations.
    WorkerOnly,
    /// Both halves run in the same process (the default when `MODE` is unset).
    Both,
}

impl Mode {
    /// Parse the `MODE` environment variable's value. Unset or unrecognised
    /// falls back to [`Mode::Both`] per spec.md §6.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("api-only") => Mode::ApiOnly,
            Some("worker-only") => Mode::WorkerOnly,
            _ => Mode::Both,
        }
    }

    /// Whether migrations should run in this mode.
    pub fn runs_migrations(self) -> bool {
        matches!(self, Mode::ApiOnly | Mode::Both)
    }

    /// Whether worker pools and the scheduler should start in this mode.
    pub fn runs_workers(self) -> bool {
        matches!(self, Mode::WorkerOnly | Mode::Both)
    }
}

/// Redis broker endpoint for the work queue (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedisConfig {
    /// Broker host.
    #[serde(default)]
    pub host: Option<String>,
    /// Broker port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Run history / job store database endpoint (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database host.
    #[serde(default)]
    pub host: Option<String>,
    /// Database port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name.
    #[serde(default)]
    pub name: Option<String>,
    /// Database user.
    #[serde(default)]
    pub user: Option<String>,
    /// Database password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Top-level runtime configuration (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupConfig {
    /// Process role.
    #[serde(default = "default_mode_both")]
    pub mode_raw: Option<String>,
    /// Queue broker endpoint.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Run history + job store.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// KDF input for the secret envelope. Required; no default.
    #[serde(default)]
    pub encryption_secret: Option<String>,
    /// Working directory for execute-once-copy-many temporary artifacts.
    #[serde(default = "default_temp_dir")]
    pub temp_backup_dir: String,
    /// Default local destination for zero-destination database jobs.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

fn default_mode_both() -> Option<String> {
    None
}

fn default_temp_dir() -> String {
    "/tmp/backup-core".to_string()
}

fn default_backup_dir() -> String {
    "/var/backups".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            mode_raw: None,
            redis: RedisConfig::default(),
            database: DatabaseConfig::default(),
            encryption_secret: None,
            temp_backup_dir: default_temp_dir(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl BackupConfig {
    /// The resolved [`Mode`] for this configuration.
    pub fn mode(&self) -> Mode {
        Mode::parse(self.mode_raw.as_deref())
    }

    /// Validate that mandatory fields are present.
    ///
    /// `ENCRYPTION_SECRET` is the only hard requirement spec.md §6 names;
    /// everything else degrades gracefully or has a workable default.
    pub fn validate(&self) -> Result<(), BkdError> {
        if self
            .encryption_secret
            .as_ref()
            .is_none_or(|s| s.is_empty())
        {
            return Err(BkdError::new(
                ErrorCode::ConfigMissingEnv,
                "ENCRYPTION_SECRET is required",
            ));
        }
        Ok(())
    }
}

/// Advisory issues that don't prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `ENCRYPTION_SECRET` is shorter than the recommended minimum.
    ShortEncryptionSecret {
        /// Actual length in bytes.
        len: usize,
    },
    /// `REDIS_HOST` is unset; the queue broker will default to localhost.
    MissingRedisHost,
    /// `DB_HOST` is unset; the run history store will default to localhost.
    MissingDbHost,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ShortEncryptionSecret { len } => write!(
                f,
                "ENCRYPTION_SECRET is only {len} bytes; 32+ is recommended"
            ),
            ConfigWarning::MissingRedisHost => {
                write!(f, "REDIS_HOST unset; defaulting the queue broker to localhost")
            }
            ConfigWarning::MissingDbHost => {
                write!(f, "DB_HOST unset; defaulting the run history store to localhost")
            }
        }
    }
}

/// Compute advisory warnings for a loaded configuration.
pub fn advisory_warnings(config: &BackupConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    if let Some(secret) = &config.encryption_secret {
        if secret.len() < 32 {
            warnings.push(ConfigWarning::ShortEncryptionSecret { len: secret.len() });
        }
    }
    if config.redis.host.is_none() {
        warnings.push(ConfigWarning::MissingRedisHost);
    }
    if config.database.host.is_none() {
        warnings.push(ConfigWarning::MissingDbHost);
    }
    warnings
}

/// Load configuration from an optional TOML overlay file, then apply
/// environment-variable overrides (spec.md §6). Environment always wins.
pub fn load_config(path: Option<&Path>) -> Result<BackupConfig, BkdError> {
    let mut config = match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p).map_err(|e| {
                BkdError::new(
                    ErrorCode::ConfigInvalid,
                    format!("reading config file {}: {e}", p.display()),
                )
            })?;
            toml::from_str(&raw).map_err(|e| {
                BkdError::new(ErrorCode::ConfigInvalid, format!("parsing config: {e}"))
            })?
        }
        None => BackupConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Overlay environment variables onto `config` (spec.md §6's env contract).
pub fn apply_env_overrides(config: &mut BackupConfig) {
    if let Ok(v) = std::env::var("MODE") {
        config.mode_raw = Some(v);
    }
    if let Ok(v) = std::env::var("REDIS_HOST") {
        config.redis.host = Some(v);
    }
    if let Ok(v) = std::env::var("REDIS_PORT") {
        if let Ok(p) = v.parse() {
            config.redis.port = Some(p);
        }
    }
    if let Ok(v) = std::env::var("REDIS_USERNAME") {
        config.redis.username = Some(v);
    }
    if let Ok(v) = std::env::var("REDIS_PASSWORD") {
        config.redis.password = Some(v);
    }
    if let Ok(v) = std::env::var("DB_HOST") {
        config.database.host = Some(v);
    }
    if let Ok(v) = std::env::var("DB_PORT") {
        if let Ok(p) = v.parse() {
            config.database.port = Some(p);
        }
    }
    if let Ok(v) = std::env::var("DB_NAME") {
        config.database.name = Some(v);
    }
    if let Ok(v) = std::env::var("DB_USER") {
        config.database.user = Some(v);
    }
    if let Ok(v) = std::env::var("DB_PASSWORD") {
        config.database.password = Some(v);
    }
    if let Ok(v) = std::env::var("ENCRYPTION_SECRET") {
        config.encryption_secret = Some(v);
    }
    if let Ok(v) = std::env::var("TEMP_BACKUP_DIR") {
        config.temp_backup_dir = v;
    }
    if let Ok(v) = std::env::var("BACKUP_DIR") {
        config.backup_dir = v;
    }
}
