//! Contract with the cluster execution substrate that runs scan jobs.
//!
//! The substrate's own job lifecycle is authoritative; every mutation here is
//! idempotent so a reconcile retried after a crash is always safe.

mod memory;

use async_trait::async_trait;

pub use memory::InMemorySubstrate;

use crate::{
    error::Result,
    model::{ScanJobKey, ScanJobRef, WorkloadKey},
};

/// Result of a create-if-absent call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// A job with the same key already exists; carries its current state.
    AlreadyExists(Box<ScanJobRef>),
}

#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    async fn create(&self, job: ScanJobRef) -> Result<CreateOutcome>;

    /// Delete-if-present. Returns whether a job was removed.
    async fn delete(&self, key: &ScanJobKey) -> Result<bool>;

    async fn get(&self, key: &ScanJobKey) -> Result<Option<ScanJobRef>>;

    /// Scan jobs dispatched for containers of `workload`.
    async fn list_owned_by(&self, workload: &WorkloadKey) -> Result<Vec<ScanJobRef>>;

    /// Every scan job the engine manages; used for the startup resync.
    async fn list(&self) -> Result<Vec<ScanJobRef>>;

    /// Raw scan output of a finished job (container logs on a cluster).
    /// `None` while the output is not retrievable yet.
    async fn output(&self, key: &ScanJobKey) -> Result<Option<String>>;
}
