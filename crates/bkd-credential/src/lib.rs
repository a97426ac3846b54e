// SPDX-License-Identifier: MIT OR Apache-2.0
//! The credential resolver (spec.md §4.2).
//!
//! Given a [`CredentialProvider`], produces an ephemeral, fully-decrypted
//! credentials bundle scoped to a single execution. Resolution never caches
//! decrypted material — a fresh [`S3Credentials`] is constructed on every
//! call and its secret field is zeroized on drop.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use bkd_core::error::BackupError;
use bkd_core::{CredentialProvider, ProviderConfig, ProviderType};
use zeroize::Zeroizing;

/// An ephemeral, decrypted S3-compatible credentials bundle (spec.md §4.2).
///
/// `region` defaults to `"auto"` when the provider did not set one. The
/// secret fields are wrapped in [`Zeroizing`] so their backing memory is
/// overwritten when this value is dropped at the end of one execution.
pub struct S3Credentials {
    /// Optional endpoint override for non-AWS S3-compatible stores.
    pub endpoint: Option<String>,
    /// Region; `"auto"` when the provider left it unset.
    pub region: String,
    /// Access key id.
    pub access_key_id: Zeroizing<String>,
    /// Secret access key.
    pub secret_access_key: Zeroizing<String>,
}

/// Resolve a credential provider reference into an ephemeral credentials
/// bundle (spec.md §4.2).
///
/// Only [`ProviderType::S3`] is recognised today; the match is written
/// exhaustively so a future provider kind fails to compile here instead of
/// silently falling through.
pub fn resolve(provider: &CredentialProvider) -> Result<S3Credentials, BackupError> {
    match provider.provider_type {
        ProviderType::S3 => resolve_s3(provider),
    }
}

fn resolve_s3(provider: &CredentialProvider) -> Result<S3Credentials, BackupError> {
    let ProviderConfig::S3(config) = &provider.config;

    let access_key_id = bkd_secret::decrypt(config.access_key_id.as_str())
        .map_err(|e| BackupError::DecryptFailure(e.to_string()))?;
    let secret_access_key = bkd_secret::decrypt(config.secret_access_key.as_str())
        .map_err(|e| BackupError::DecryptFailure(e.to_string()))?;

    Ok(S3Credentials {
        endpoint: config.endpoint.clone(),
        region: config.region.clone().unwrap_or_else(|| "auto".to_string()),
        access_key_id: Zeroizing::new(access_key_id),
        secret_access_key: Zeroizing::new(secret_access_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkd_core::{ProviderConfig, S3ProviderConfig};
    use std::sync::{Mutex, OnceLock};
    use uuid::Uuid;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_secret<T>(f: impl FnOnce() -> T) -> T {
        let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: test-only; env_lock serialises access across test threads.
        unsafe {
            std::env::set_var(
                "ENCRYPTION_SECRET",
                "credential resolver test secret, 32+ bytes",
            );
        }
        bkd_secret::reset_key_cache_for_tests();
        let result = f();
        bkd_secret::reset_key_cache_for_tests();
        result
    }

    fn provider(region: Option<&str>) -> CredentialProvider {
        CredentialProvider {
            id: Uuid::new_v4(),
            name: "primary-s3".to_string(),
            provider_type: ProviderType::S3,
            provider_preset: "aws".to_string(),
            config: ProviderConfig::S3(S3ProviderConfig {
                endpoint: None,
                region: region.map(str::to_string),
                access_key_id: bkd_secret::encrypt("AKIA-test").unwrap().into(),
                secret_access_key: bkd_secret::encrypt("s3kret-test").unwrap().into(),
            }),
        }
    }

    #[test]
    fn resolves_and_decrypts() {
        with_secret(|| {
            let creds = resolve(&provider(Some("us-east-1"))).unwrap();
            assert_eq!(creds.region, "us-east-1");
            assert_eq!(&*creds.access_key_id, "AKIA-test");
            assert_eq!(&*creds.secret_access_key, "s3kret-test");
        });
    }

    #[test]
    fn defaults_region_to_auto() {
        with_secret(|| {
            let creds = resolve(&provider(None)).unwrap();
            assert_eq!(creds.region, "auto");
        });
    }

    #[test]
    fn propagates_decrypt_failure() {
        with_secret(|| {
            let mut p = provider(Some("auto"));
            let ProviderConfig::S3(ref mut cfg) = p.config;
            cfg.secret_access_key = bkd_core::EncryptedString::new("not-a-valid-token");
            assert!(matches!(resolve(&p), Err(BackupError::DecryptFailure(_))));
        });
    }
}
