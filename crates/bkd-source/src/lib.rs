// SPDX-License-Identifier: MIT OR Apache-2.0
//! The source executor (spec.md §4.6): one strategy per [`bkd_core::SourceType`],
//! each producing an artifact (or, for `s3`, a completed sync) plus an
//! execution log.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Execution log composition.
pub mod log;
/// Dump/copy strategies, one per source type.
pub mod strategies;
/// [`traits::DumpTool`] and [`traits::ObjectStoreClient`] — the seams
/// strategies call through.
pub mod traits;

pub use strategies::{execute, DestinationBundle, ExecutionResult, OutputTarget, TempFileArea};
pub use traits::{DumpTool, ObjectEntry, ObjectStoreClient};
