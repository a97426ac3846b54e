// SPDX-License-Identifier: MIT OR Apache-2.0
//! Credential providers (spec.md §3, §4.6).

use crate::error::BackupError;
use crate::raw::RawConfig;
use crate::secret_string::EncryptedString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Credential provider type enumeration. `s3` is the only kind the core
/// currently resolves; the type exists so new provider kinds slot in
/// without widening every call site that matches on it exhaustively today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// S3-compatible access key pair.
    S3,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProviderType::S3 => "s3",
        })
    }
}

/// Config for an `s3` credential provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3ProviderConfig {
    /// Optional endpoint override (non-AWS S3-compatible stores).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region.
    #[serde(default)]
    pub region: Option<String>,
    /// Access key id. Not itself secret, but stored alongside the secret
    /// access key for convenience.
    pub access_key_id: EncryptedString,
    /// Secret access key — always a `bkd-secret` envelope token at rest.
    pub secret_access_key: EncryptedString,
}

/// Tagged provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    /// `s3` provider.
    S3(S3ProviderConfig),
}

impl ProviderConfig {
    /// Decode a [`RawConfig`] into the variant matching `provider_type`.
    pub fn decode(provider_type: ProviderType, raw: &RawConfig) -> Result<Self, BackupError> {
        let decoded = match provider_type {
            ProviderType::S3 => ProviderConfig::S3(raw.decode().map_err(invalid_config)?),
        };
        Ok(decoded)
    }
}

fn invalid_config(err: serde_json::Error) -> BackupError {
    BackupError::DecryptFailure(format!("invalid provider config: {err}"))
}

/// A named, reusable credential a job or destination resolves by id
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialProvider {
    /// Stable identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Provider type.
    pub provider_type: ProviderType,
    /// Free-form label distinguishing presets of the same provider type
    /// (e.g. `"aws"` vs `"cloudflare-r2"`), used only for display.
    pub provider_preset: String,
    /// Provider-type-specific configuration.
    pub config: ProviderConfig,
}
