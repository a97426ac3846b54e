// SPDX-License-Identifier: MIT OR Apache-2.0
//! A field that is expected to carry either a masked placeholder, a
//! `bkd-secret` envelope token, or (briefly, at the API boundary before the
//! envelope is applied) plaintext.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A sensitive string field.
///
/// `bkd-core` does not know how to encrypt, decrypt, or mask — that's
/// `bkd-secret`'s job (spec.md §4.1). This wrapper exists so domain structs
/// can express "this field is sensitive" in their types, and so `Debug`
/// never leaks the contents into logs by accident.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedString(pub String);

impl EncryptedString {
    /// Wrap a raw string (token, mask, or plaintext).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for EncryptedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptedString(<redacted>)")
    }
}

impl From<String> for EncryptedString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EncryptedString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
