// SPDX-License-Identifier: MIT OR Apache-2.0
//! Re-fetch seam for the job executor (spec.md §4.8 step 2/4).

use async_trait::async_trait;
use bkd_core::error::BackupError;
use bkd_core::{BackupJob, CredentialProvider, Destination};
use uuid::Uuid;

/// Authoritative source for jobs, their destinations, and credential
/// providers. The executor never trusts a queue payload's copy of this
/// data — it re-fetches through this trait on every pickup (spec.md §4.8
/// step 2: "Re-fetch the job ... from the store").
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up one job by id.
    async fn fetch_job(&self, job_id: Uuid) -> Result<Option<BackupJob>, BackupError>;
    /// Look up one destination by id.
    async fn fetch_destination(&self, destination_id: Uuid) -> Result<Option<Destination>, BackupError>;
    /// Look up one credential provider by id.
    async fn fetch_credential_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Option<CredentialProvider>, BackupError>;
}
