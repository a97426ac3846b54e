// SPDX-License-Identifier: MIT OR Apache-2.0
//! bkd-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Domain types for the backup execution core. No I/O, no crypto, no queue
//! logic lives here — every other `bkd-*` crate depends on this one without
//! creating cycles.

/// Credential provider types (`s3` today).
pub mod credential;
/// Destination types (`local`, `s3`).
pub mod destination;
/// Domain-level error taxonomy (spec.md §7).
pub mod error;
/// `BackupJob` and its nested source configuration.
pub mod job;
/// Run / RunOutcome state and the aggregated run view.
pub mod run;
/// Opaque-at-the-boundary raw config newtype.
pub mod raw;
/// A string that is expected to hold an encrypted envelope token.
pub mod secret_string;

pub use credential::{CredentialProvider, ProviderConfig, ProviderType, S3ProviderConfig};
pub use destination::{Destination, DestinationConfig, DestinationType, LocalConfig, S3DestinationConfig};
pub use error::BackupError;
pub use job::{BackupJob, JobDestination, MongodbConfig, MysqlConfig, PostgresConfig, RedisConfig, S3SourceConfig, SourceConfig, SourceType};
pub use raw::RawConfig;
pub use run::{AggregatedRun, AggregatedStatus, OutcomeStatus, RunOutcome};
pub use secret_string::EncryptedString;
