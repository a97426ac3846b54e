// SPDX-License-Identifier: MIT OR Apache-2.0
//! The job executor (spec.md §4.8): drives one queue pickup through
//! credential merge, strategy selection, per-destination copies, heartbeats,
//! and a single consolidated notification.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod executor;
/// The job re-fetch seam.
pub mod job_store;
/// The notification event contract and default sink.
pub mod notification;
/// The credential-scoped object store client factory seam.
pub mod object_store;

pub use executor::{ExecutionSummary, Executor, ExecutorConfig};
pub use job_store::JobStore;
pub use notification::{DestinationEvent, DestinationStatus, EventKind, LoggingSink, NotificationEvent, NotificationSink};
pub use object_store::{ObjectStoreClientFactory, UnusedObjectStore};

#[cfg(test)]
mod tests;
