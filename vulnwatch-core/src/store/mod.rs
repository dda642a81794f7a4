//! Report persistence.
//!
//! Reports are derived data, so writes are unconditional overwrites: the last
//! writer wins and no error is surfaced for concurrent upserts of one key.

mod memory;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
mod postgres;

use async_trait::async_trait;

pub use memory::InMemoryReportStore;
#[cfg(feature = "database")]
pub use postgres::PostgresReportStore;

use crate::{
    error::Result,
    model::{ImageHash, Report, ReportKey, WorkloadKey},
};

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Overwrites the current report for `report.key`, returning the stored
    /// revision.
    async fn upsert(&self, report: Report) -> Result<u64>;

    async fn get(&self, key: &ReportKey) -> Result<Option<Report>>;

    /// True when a current report exists and was produced for `image_hash`.
    async fn exists(&self, key: &ReportKey, image_hash: &ImageHash) -> Result<bool> {
        Ok(self
            .get(key)
            .await?
            .is_some_and(|report| &report.image_hash == image_hash))
    }

    async fn list_for_workload(&self, workload: &WorkloadKey) -> Result<Vec<Report>>;

    /// Cascade delete used when the owning workload disappears. Returns the
    /// number of reports removed.
    async fn delete_for_workload(&self, workload: &WorkloadKey) -> Result<usize>;
}
