// SPDX-License-Identifier: MIT OR Apache-2.0
//! The secret envelope (spec.md §4.1).
//!
//! Deterministic-format, non-deterministic-ciphertext authenticated
//! encryption for sensitive job/destination/credential-provider fields.
//! Tokens are self-describing: a fresh per-message nonce, an authentication
//! tag, and the ciphertext, each hex-encoded and joined with `:`
//! (`hex(iv):hex(tag):hex(ciphertext)`, spec.md §6). The derivation key comes
//! from the process-wide `ENCRYPTION_SECRET` via a fixed-parameter PBKDF2-
//! HMAC-SHA256 KDF and is cached for the process lifetime (spec.md §9,
//! "Global cached KDF key").
#![deny(unsafe_code)]
#![warn(missing_docs)]

use aes_gcm::aead::{Aead, KeyInit, generic_array::GenericArray};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::RngCore;
use std::sync::{Mutex, OnceLock};
use thiserror::Error;

/// AES-256-GCM with a 16-byte nonce (spec.md §6: `|iv| = 16 bytes`), rather
/// than the crate's default 12-byte `Aes256Gcm` alias.
type Aes256Gcm16 = AesGcm<Aes256, aes_gcm::aead::consts::U16>;

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// A fixed, documented salt. Rotating it would silently change the derived
/// key and invalidate every token persisted under the old one — this KDF is
/// deliberately "fixed-parameter", not randomized per process (spec.md §4.1).
const KDF_SALT: &[u8] = b"bkd-secret-envelope-v1-fixed-salt";
const KDF_ITERATIONS: u32 = 100_000;

/// Failure modes of the secret envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The `ENCRYPTION_SECRET` environment variable is unset or empty.
    #[error("ENCRYPTION_SECRET is not set")]
    MissingSecret,
    /// Token does not have the `iv:tag:ciphertext` shape, a hex segment
    /// failed to decode, or a fixed-length component had the wrong length.
    #[error("malformed envelope token: {0}")]
    Malformed(String),
    /// The AEAD authentication tag did not verify — the ciphertext was
    /// tampered with, or the token was encrypted under a different key.
    #[error("envelope authentication failed")]
    AuthenticationFailed,
}

fn key_cache() -> &'static Mutex<Option<[u8; 32]>> {
    static CACHE: OnceLock<Mutex<Option<[u8; 32]>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Clear the cached derived key so the next [`encrypt`]/[`decrypt`] call
/// re-reads `ENCRYPTION_SECRET` and re-derives. Test-only: production code
/// relies on the key being stable for the process lifetime (spec.md §9).
#[cfg(any(test, feature = "test-util"))]
pub fn reset_key_cache_for_tests() {
    *key_cache().lock().expect("key cache poisoned") = None;
}

/// Derive a 32-byte key from `secret` using the fixed KDF parameters.
pub fn derive_key(secret: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(secret.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key);
    key
}

fn cached_key() -> Result<[u8; 32], EnvelopeError> {
    let mut guard = key_cache().lock().expect("key cache poisoned");
    if let Some(key) = *guard {
        return Ok(key);
    }
    let secret = std::env::var("ENCRYPTION_SECRET").map_err(|_| EnvelopeError::MissingSecret)?;
    if secret.is_empty() {
        return Err(EnvelopeError::MissingSecret);
    }
    let key = derive_key(&secret);
    *guard = Some(key);
    Ok(key)
}

fn cipher_from_key(key: &[u8; 32]) -> Aes256Gcm16 {
    Aes256Gcm16::new(GenericArray::from_slice(key))
}

/// Encrypt `plaintext`, returning a fresh `iv:tag:ciphertext` token. Every
/// call uses a freshly generated nonce, so encrypting the same plaintext
/// twice never produces the same token (spec.md §8, invariant 3).
pub fn encrypt(plaintext: &str) -> Result<String, EnvelopeError> {
    let key = cached_key()?;
    let cipher = cipher_from_key(&key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = GenericArray::from_slice(&nonce_bytes);

    let combined = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| EnvelopeError::AuthenticationFailed)?;
    let split_at = combined.len().saturating_sub(TAG_LEN);
    let (ciphertext, tag) = combined.split_at(split_at);

    Ok(format!(
        "{}:{}:{}",
        hex::encode(nonce_bytes),
        hex::encode(tag),
        hex::encode(ciphertext)
    ))
}

/// Decrypt a token produced by [`encrypt`]. Fails loudly on a malformed
/// token or an authentication mismatch — there is no silent fallback to
/// plaintext (spec.md §7, `DecryptFailure`).
pub fn decrypt(token: &str) -> Result<String, EnvelopeError> {
    let key = cached_key()?;
    let cipher = cipher_from_key(&key);

    let parts: Vec<&str> = token.split(':').collect();
    let [iv_hex, tag_hex, ct_hex] = parts.as_slice() else {
        return Err(EnvelopeError::Malformed(format!(
            "expected 3 ':'-separated segments, found {}",
            parts.len()
        )));
    };

    let nonce_bytes =
        hex::decode(iv_hex).map_err(|e| EnvelopeError::Malformed(format!("iv: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(EnvelopeError::Malformed(format!(
            "iv must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }
    let tag_bytes =
        hex::decode(tag_hex).map_err(|e| EnvelopeError::Malformed(format!("tag: {e}")))?;
    if tag_bytes.len() != TAG_LEN {
        return Err(EnvelopeError::Malformed(format!(
            "tag must be {TAG_LEN} bytes, got {}",
            tag_bytes.len()
        )));
    }
    let ciphertext =
        hex::decode(ct_hex).map_err(|e| EnvelopeError::Malformed(format!("ciphertext: {e}")))?;

    let mut combined = ciphertext;
    combined.extend_from_slice(&tag_bytes);

    let nonce = GenericArray::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|_| EnvelopeError::AuthenticationFailed)?;

    String::from_utf8(plaintext)
        .map_err(|e| EnvelopeError::Malformed(format!("decrypted bytes not utf-8: {e}")))
}

/// `true` if `s` has the `iv:tag:ciphertext` shape with correctly-sized hex
/// segments. Does not attempt to decrypt — a structurally valid token can
/// still fail authentication.
pub fn is_encrypted(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    let [iv_hex, tag_hex, ct_hex] = parts.as_slice() else {
        return false;
    };
    is_hex_of_len(iv_hex, NONCE_LEN) && is_hex_of_len(tag_hex, TAG_LEN) && is_hex(ct_hex)
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_hex_of_len(s: &str, bytes: usize) -> bool {
    s.len() == bytes * 2 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// `true` for a display-only masked placeholder: the literal `"********"`,
/// or any string ending in four asterisks (spec.md §6). Hex tokens never
/// contain `*`, so there is no ambiguity with [`is_encrypted`].
pub fn is_masked(s: &str) -> bool {
    s.ends_with("****")
}

/// Render the display-only masked form of `plaintext` (spec.md §6): the
/// first four characters plus `"****"`, or `"********"` for values of
/// length four or less.
pub fn mask(plaintext: &str) -> String {
    let mut chars = plaintext.chars();
    let prefix: String = (&mut chars).take(4).collect();
    if chars.next().is_none() {
        "********".to_string()
    } else {
        format!("{prefix}****")
    }
}

/// Encrypt the named string fields of a JSON object in place.
///
/// Idempotent: a field whose current value [`is_encrypted`] or [`is_masked`]
/// is left untouched (spec.md §8, invariant 4). Missing fields and
/// non-string fields are skipped silently.
pub fn encrypt_fields(value: &mut serde_json::Value, names: &[&str]) -> Result<(), EnvelopeError> {
    let Some(obj) = value.as_object_mut() else {
        return Ok(());
    };
    for &name in names {
        if let Some(field) = obj.get_mut(name) {
            if let Some(s) = field.as_str() {
                if is_encrypted(s) || is_masked(s) {
                    continue;
                }
                let token = encrypt(s)?;
                *field = serde_json::Value::String(token);
            }
        }
    }
    Ok(())
}

/// Decrypt the named string fields of a JSON object in place.
///
/// A field whose value [`is_encrypted`] is decrypted and replaced; failures
/// propagate. A field that is plain or masked is left untouched.
pub fn decrypt_fields(value: &mut serde_json::Value, names: &[&str]) -> Result<(), EnvelopeError> {
    let Some(obj) = value.as_object_mut() else {
        return Ok(());
    };
    for &name in names {
        if let Some(field) = obj.get_mut(name) {
            if let Some(s) = field.as_str() {
                if is_encrypted(s) {
                    let plain = decrypt(s)?;
                    *field = serde_json::Value::String(plain);
                }
            }
        }
    }
    Ok(())
}

/// Merge a field update: if `new_value` [`is_masked`], the caller submitted
/// the display placeholder unchanged, so the previously persisted ciphertext
/// is preserved verbatim (spec.md §8, invariant 5). Otherwise `new_value` is
/// freshly encrypted.
pub fn merge_field_update(previous_token: &str, new_value: &str) -> Result<String, EnvelopeError> {
    if is_masked(new_value) {
        Ok(previous_token.to_string())
    } else {
        encrypt(new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Serializes tests that mutate `ENCRYPTION_SECRET` — the env var and
    /// the key cache are both process-global, so parallel test threads
    /// would otherwise race each other.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_secret<T>(secret: &str, f: impl FnOnce() -> T) -> T {
        let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: test-only; each test derives its own key before use and
        // the env_lock above prevents concurrent mutation from other tests.
        unsafe {
            std::env::set_var("ENCRYPTION_SECRET", secret);
        }
        reset_key_cache_for_tests();
        let result = f();
        reset_key_cache_for_tests();
        result
    }

    #[test]
    fn round_trip() {
        with_secret("a very secret value at least 32 bytes long", || {
            let token = encrypt("hunter2").unwrap();
            assert_eq!(decrypt(&token).unwrap(), "hunter2");
        });
    }

    #[test]
    fn empty_plaintext_round_trips() {
        with_secret("another secret at least 32 bytes long!!", || {
            let token = encrypt("").unwrap();
            assert_eq!(decrypt(&token).unwrap(), "");
        });
    }

    #[test]
    fn nonces_are_fresh() {
        with_secret("third secret value, at least 32 bytes..", || {
            let t1 = encrypt("same-plaintext").unwrap();
            let t2 = encrypt("same-plaintext").unwrap();
            assert_ne!(t1, t2);
        });
    }

    #[test]
    fn tampered_tag_fails_loudly() {
        with_secret("fourth secret value at least 32 bytes..", || {
            let token = encrypt("secret-data").unwrap();
            let mut parts: Vec<String> = token.split(':').map(String::from).collect();
            // Flip a hex digit in the tag.
            let tag = &mut parts[1];
            let c = tag.chars().next().unwrap();
            let flipped = if c == '0' { '1' } else { '0' };
            tag.replace_range(0..1, &flipped.to_string());
            let tampered = parts.join(":");
            assert_eq!(decrypt(&tampered), Err(EnvelopeError::AuthenticationFailed));
        });
    }

    #[test]
    fn malformed_segment_count_rejected() {
        with_secret("fifth secret value at least 32 bytes...", || {
            assert!(matches!(decrypt("only:two"), Err(EnvelopeError::Malformed(_))));
            assert!(matches!(decrypt("a:b:c:d"), Err(EnvelopeError::Malformed(_))));
        });
    }

    #[test]
    fn malformed_component_length_rejected() {
        with_secret("sixth secret value at least 32 bytes...", || {
            // nonce too short
            assert!(matches!(
                decrypt("aabb:00000000000000000000000000000000:aabbccdd"),
                Err(EnvelopeError::Malformed(_))
            ));
        });
    }

    #[test]
    fn is_encrypted_detects_shape_not_validity() {
        let token = "00".repeat(16) + ":" + &"11".repeat(16) + ":" + &"22".repeat(4);
        assert!(is_encrypted(&token));
        assert!(!is_encrypted("plaintext-value"));
        assert!(!is_encrypted("a:b"));
    }

    #[test]
    fn masking_round_trip() {
        assert_eq!(mask("ab"), "********");
        assert_eq!(mask("abcd"), "********");
        assert_eq!(mask("abcde"), "abcd****");
        assert_eq!(mask("access-key-id-123"), "acce****");
        assert!(is_masked("abcd****"));
        assert!(is_masked("********"));
        assert!(!is_masked("plain-value"));
    }

    #[test]
    fn encrypt_fields_is_idempotent() {
        with_secret("seventh secret value at least 32 bytes.", || {
            let mut obj = serde_json::json!({"password": "hunter2", "host": "db"});
            encrypt_fields(&mut obj, &["password"]).unwrap();
            let once = obj["password"].as_str().unwrap().to_string();
            encrypt_fields(&mut obj, &["password"]).unwrap();
            assert_eq!(obj["password"].as_str().unwrap(), once);
            assert_eq!(obj["host"], "db");
        });
    }

    #[test]
    fn encrypt_fields_leaves_masked_value_untouched() {
        with_secret("eighth secret value at least 32 bytes..", || {
            let mut obj = serde_json::json!({"password": "pass****"});
            encrypt_fields(&mut obj, &["password"]).unwrap();
            assert_eq!(obj["password"], "pass****");
        });
    }

    #[test]
    fn decrypt_fields_propagates_failure() {
        with_secret("ninth secret value at least 32 bytes...", || {
            let mut obj = serde_json::json!({"password": "not:a:validtoken"});
            assert!(decrypt_fields(&mut obj, &["password"]).is_err());
        });
    }

    #[test]
    fn decrypt_fields_leaves_plain_untouched() {
        with_secret("tenth secret value at least 32 bytes...", || {
            let mut obj = serde_json::json!({"host": "db.internal"});
            decrypt_fields(&mut obj, &["host"]).unwrap();
            assert_eq!(obj["host"], "db.internal");
        });
    }

    #[test]
    fn merge_preserves_ciphertext_on_masked_update() {
        with_secret("eleventh secret value at least 32 by.", || {
            let original = encrypt("s3kret").unwrap();
            let merged = merge_field_update(&original, "s3kr****").unwrap();
            assert_eq!(merged, original);
        });
    }

    #[test]
    fn merge_encrypts_real_update() {
        with_secret("twelfth secret value at least 32 byte.", || {
            let original = encrypt("s3kret").unwrap();
            let merged = merge_field_update(&original, "new-value").unwrap();
            assert_ne!(merged, original);
            assert_eq!(decrypt(&merged).unwrap(), "new-value");
        });
    }

    proptest! {
        #[test]
        fn prop_round_trip(s in ".{0,200}") {
            with_secret("proptest secret value at least 32 bytes", || {
                let token = encrypt(&s).unwrap();
                prop_assert_eq!(decrypt(&token).unwrap(), s);
                Ok(())
            })?;
        }

        #[test]
        fn prop_nonce_freshness(s in ".{1,50}") {
            with_secret("proptest secret value at least 32 bytes", || {
                let a = encrypt(&s).unwrap();
                let b = encrypt(&s).unwrap();
                prop_assert_ne!(a, b);
                Ok(())
            })?;
        }

        #[test]
        fn prop_decrypt_never_panics(s in "\\PC*") {
            let _ = with_secret("proptest secret value at least 32 bytes", || decrypt(&s));
        }
    }
}
