use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::fmt;

use super::{CreateOutcome, ExecutionSubstrate};
use crate::{
    error::{CoreError, Result},
    model::{ScanJobKey, ScanJobPhase, ScanJobRef, WorkloadKey},
};

/// In-process substrate. The `set_*` helpers play the role of the cluster
/// moving jobs through their lifecycle.
#[derive(Default)]
pub struct InMemorySubstrate {
    jobs: DashMap<ScanJobKey, ScanJobRef>,
    outputs: DashMap<ScanJobKey, String>,
}

impl fmt::Debug for InMemorySubstrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySubstrate")
            .field("jobs", &self.jobs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ScanJobRef> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        jobs
    }

    /// Moves a job to `phase`, returning the updated snapshot.
    pub fn set_phase(
        &self,
        key: &ScanJobKey,
        phase: ScanJobPhase,
        failure: Option<String>,
    ) -> Result<ScanJobRef> {
        let mut job = self
            .jobs
            .get_mut(key)
            .ok_or_else(|| CoreError::NotFound(format!("scan job {key}")))?;
        job.phase = phase;
        job.failure = failure;
        Ok(job.clone())
    }

    pub fn set_output(&self, key: &ScanJobKey, output: impl Into<String>) {
        self.outputs.insert(key.clone(), output.into());
    }
}

#[async_trait]
impl ExecutionSubstrate for InMemorySubstrate {
    async fn create(&self, job: ScanJobRef) -> Result<CreateOutcome> {
        match self.jobs.entry(job.key.clone()) {
            Entry::Occupied(existing) => {
                Ok(CreateOutcome::AlreadyExists(Box::new(existing.get().clone())))
            }
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(CreateOutcome::Created)
            }
        }
    }

    async fn delete(&self, key: &ScanJobKey) -> Result<bool> {
        self.outputs.remove(key);
        Ok(self.jobs.remove(key).is_some())
    }

    async fn get(&self, key: &ScanJobKey) -> Result<Option<ScanJobRef>> {
        Ok(self.jobs.get(key).map(|e| e.value().clone()))
    }

    async fn list_owned_by(&self, workload: &WorkloadKey) -> Result<Vec<ScanJobRef>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|job| &job.owner.workload == workload)
            .collect())
    }

    async fn list(&self) -> Result<Vec<ScanJobRef>> {
        Ok(self.snapshot())
    }

    async fn output(&self, key: &ScanJobKey) -> Result<Option<String>> {
        Ok(self.outputs.get(key).map(|e| e.value().clone()))
    }
}
