use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::fmt;

use super::ReportStore;
use crate::{
    error::Result,
    model::{Report, ReportKey, WorkloadKey},
};

/// Process-local report store.
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: DashMap<ReportKey, Report>,
}

impl fmt::Debug for InMemoryReportStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryReportStore")
            .field("reports", &self.reports.len())
            .finish()
    }
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn upsert(&self, mut report: Report) -> Result<u64> {
        match self.reports.entry(report.key.clone()) {
            Entry::Occupied(mut current) => {
                report.revision = current.get().revision + 1;
                let revision = report.revision;
                current.insert(report);
                Ok(revision)
            }
            Entry::Vacant(slot) => {
                report.revision = 1;
                slot.insert(report);
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &ReportKey) -> Result<Option<Report>> {
        Ok(self.reports.get(key).map(|entry| entry.value().clone()))
    }

    async fn list_for_workload(&self, workload: &WorkloadKey) -> Result<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .reports
            .iter()
            .filter(|entry| &entry.key().workload_key() == workload)
            .map(|entry| entry.value().clone())
            .collect();
        reports.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(reports)
    }

    async fn delete_for_workload(&self, workload: &WorkloadKey) -> Result<usize> {
        let before = self.reports.len();
        self.reports
            .retain(|key, _| &key.workload_key() != workload);
        Ok(before.saturating_sub(self.reports.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageHash, ImageReference, ScanFindings};

    fn report(container: &str, hash: &str) -> Report {
        Report::new(
            ReportKey::new(&WorkloadKey::new("ns", "web-1"), container),
            "uid-1",
            ImageReference::parse(&format!("img@sha256:{hash}")).unwrap(),
            ImageHash::new(hash),
            ScanFindings::default(),
        )
    }

    #[tokio::test]
    async fn upsert_overwrites_and_bumps_revision() {
        let store = InMemoryReportStore::new();
        assert_eq!(store.upsert(report("app", "AAA")).await.unwrap(), 1);
        assert_eq!(store.upsert(report("app", "BBB")).await.unwrap(), 2);

        let key = ReportKey::new(&WorkloadKey::new("ns", "web-1"), "app");
        assert!(store.exists(&key, &ImageHash::new("BBB")).await.unwrap());
        assert!(!store.exists(&key, &ImageHash::new("AAA")).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_for_workload_only_touches_that_workload() {
        let store = InMemoryReportStore::new();
        store.upsert(report("app", "AAA")).await.unwrap();
        store.upsert(report("sidecar", "CCC")).await.unwrap();
        let mut other = report("app", "AAA");
        other.key.workload = "web-2".into();
        store.upsert(other).await.unwrap();

        let removed = store
            .delete_for_workload(&WorkloadKey::new("ns", "web-1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }
}
