// SPDX-License-Identifier: MIT OR Apache-2.0
//! Opaque configuration as stored at the API boundary.

use serde::{Deserialize, Serialize};

/// The as-stored-externally shape of a job/destination/provider `config`
/// column: an opaque JSON object whose schema depends on the sibling `type`
/// field (spec.md §3, Design Note 1 in spec.md §9).
///
/// Decoding into the strongly-typed [`crate::job::SourceConfig`] /
/// [`crate::destination::DestinationConfig`] / [`crate::credential::ProviderConfig`]
/// variants happens once, on queue pickup or provider resolution — nothing
/// downstream of that point touches a `RawConfig` again.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RawConfig(pub serde_json::Value);

impl RawConfig {
    /// Wrap an arbitrary JSON value.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Deserialize a field-typed view out of the opaque object.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.0.clone())
    }
}
