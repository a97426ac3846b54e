// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backup destinations (spec.md §3).

use crate::error::BackupError;
use crate::raw::RawConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Destination type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    /// A directory on the host filesystem.
    Local,
    /// An S3-compatible bucket.
    S3,
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DestinationType::Local => "local",
            DestinationType::S3 => "s3",
        })
    }
}

/// Config for a `local` destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory artifacts are copied into. Created if absent.
    pub path: String,
}

/// Config for an `s3` destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3DestinationConfig {
    /// Destination bucket.
    pub bucket: String,
    /// Key prefix artifacts are written under.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Optional endpoint override.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region.
    #[serde(default)]
    pub region: Option<String>,
}

/// Tagged destination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DestinationConfig {
    /// `local` destination.
    Local(LocalConfig),
    /// `s3` destination.
    S3(S3DestinationConfig),
}

impl DestinationConfig {
    /// Decode a [`RawConfig`] into the variant matching `destination_type`.
    pub fn decode(destination_type: DestinationType, raw: &RawConfig) -> Result<Self, BackupError> {
        let decoded = match destination_type {
            DestinationType::Local => DestinationConfig::Local(raw.decode().map_err(invalid_config)?),
            DestinationType::S3 => DestinationConfig::S3(raw.decode().map_err(invalid_config)?),
        };
        Ok(decoded)
    }
}

fn invalid_config(err: serde_json::Error) -> BackupError {
    BackupError::DestinationCopyFailure {
        message: format!("invalid destination config: {err}"),
        execution_log: None,
    }
}

/// A configured place backups can be copied to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    /// Stable identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Destination type.
    pub destination_type: DestinationType,
    /// Destination-type-specific configuration.
    pub config: DestinationConfig,
    /// Credential provider used to authenticate, when the destination type
    /// requires one. `s3` destinations must set this (spec.md §3).
    #[serde(default)]
    pub credential_provider_id: Option<Uuid>,
}

impl Destination {
    /// Validate the `s3 ⇒ credential_provider_id` invariant.
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.destination_type == DestinationType::S3 && self.credential_provider_id.is_none() {
            return Err(BackupError::DestinationCopyFailure {
                message: format!("s3 destination {} has no credential provider", self.id),
                execution_log: None,
            });
        }
        Ok(())
    }
}
