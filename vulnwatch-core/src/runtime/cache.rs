use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crate::{
    error::Result,
    model::{Workload, WorkloadKey},
    reconcile::WorkloadSource,
};

/// How long a deletion is remembered after it was observed.
const TOMBSTONE_TTL: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
struct Tombstone {
    uid: String,
    resource_version: u64,
    deleted_at: Instant,
}

/// Latest observed state of every workload, fed by observation events.
///
/// Observations may arrive duplicated or out of order; an update carrying an
/// older resource version than the cached one is ignored, whichever
/// incarnation it belongs to.
///
/// A key that is not cached is only reported as gone when its deletion was
/// observed, or once the initial listing has been replayed and
/// [`mark_synced`](Self::mark_synced) was called. Until then a miss means
/// "not seen yet".
#[derive(Default)]
pub struct WorkloadCache {
    workloads: DashMap<WorkloadKey, Workload>,
    tombstones: DashMap<WorkloadKey, Tombstone>,
    synced: AtomicBool,
}

impl fmt::Debug for WorkloadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadCache")
            .field("workloads", &self.workloads.len())
            .field("tombstones", &self.tombstones.len())
            .field("synced", &self.is_synced())
            .finish()
    }
}

impl WorkloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `workload` unless a newer version is already cached or its
    /// deletion was already observed. Returns whether the cache changed.
    pub fn upsert(&self, workload: Workload) -> bool {
        let key = workload.key();
        if let Some(tombstone) = self.tombstones.get(&key)
            && (tombstone.uid == workload.uid
                || tombstone.resource_version > workload.resource_version)
        {
            return false;
        }

        let changed = match self.workloads.entry(key.clone()) {
            Entry::Occupied(mut current) => {
                if current.get().resource_version > workload.resource_version {
                    return false;
                }
                current.insert(workload);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(workload);
                true
            }
        };
        self.tombstones.remove(&key);
        changed
    }

    /// Records the deletion of `workload`. A deletion of an incarnation other
    /// than the cached one leaves the cache untouched. Returns whether the
    /// cached entry was dropped.
    pub fn delete(&self, workload: &Workload) -> bool {
        let key = workload.key();
        let removed = self
            .workloads
            .remove_if(&key, |_, cached| cached.uid == workload.uid)
            .is_some();

        if removed || !self.workloads.contains_key(&key) {
            self.tombstones.insert(
                key,
                Tombstone {
                    uid: workload.uid.clone(),
                    resource_version: workload.resource_version,
                    deleted_at: Instant::now(),
                },
            );
        }
        self.prune_tombstones();
        removed
    }

    /// Declares that every existing workload has been observed at least
    /// once, so a miss now means the workload is gone.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn keys(&self) -> Vec<WorkloadKey> {
        let mut keys: Vec<_> = self.workloads.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    fn prune_tombstones(&self) {
        self.tombstones
            .retain(|_, tombstone| tombstone.deleted_at.elapsed() < TOMBSTONE_TTL);
    }
}

#[async_trait]
impl WorkloadSource for WorkloadCache {
    async fn get(&self, key: &WorkloadKey) -> Result<Option<Workload>> {
        Ok(self.workloads.get(key).map(|e| e.value().clone()))
    }

    async fn is_gone(&self, key: &WorkloadKey) -> Result<bool> {
        if self.workloads.contains_key(key) {
            return Ok(false);
        }
        Ok(self.tombstones.contains_key(key) || self.is_synced())
    }
}
