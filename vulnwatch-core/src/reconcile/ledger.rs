//! Per-target dispatch bookkeeping shared by both reconcilers.
//!
//! Entries are keyed by (workload, container) and bound to one image hash;
//! observing a different hash starts the target over. The ledger lives in
//! memory, so a restart forgets terminal failures and every parked target
//! gets one more round of attempts.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::{ImageHash, WorkloadKey};

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanTarget {
    pub workload: WorkloadKey,
    pub container: String,
}

impl ScanTarget {
    pub fn new(workload: &WorkloadKey, container: impl Into<String>) -> Self {
        Self {
            workload: workload.clone(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workload, self.container)
    }
}

#[derive(Clone, Debug)]
struct LedgerEntry {
    image_hash: ImageHash,
    attempts: u16,
    terminal: Option<TerminalFailure>,
}

impl LedgerEntry {
    fn fresh(image_hash: &ImageHash) -> Self {
        Self {
            image_hash: image_hash.clone(),
            attempts: 0,
            terminal: None,
        }
    }
}

/// A target parked until its image changes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TerminalFailure {
    pub target: ScanTarget,
    pub image_hash: ImageHash,
    pub reason: String,
    pub attempts: u16,
    pub failed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ScanLedger {
    entries: DashMap<ScanTarget, LedgerEntry>,
}

impl fmt::Debug for ScanLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanLedger")
            .field("targets", &self.entries.len())
            .finish()
    }
}

impl ScanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch attempts already made for `image_hash`.
    pub fn attempts(&self, target: &ScanTarget, image_hash: &ImageHash) -> u16 {
        self.entries
            .get(target)
            .filter(|entry| &entry.image_hash == image_hash)
            .map(|entry| entry.attempts)
            .unwrap_or(0)
    }

    /// Records that attempt number `attempt` exists. Counts never go
    /// backwards, so replaying an old observation is harmless.
    pub fn record_attempt(&self, target: &ScanTarget, image_hash: &ImageHash, attempt: u16) {
        let mut entry = self
            .entries
            .entry(target.clone())
            .or_insert_with(|| LedgerEntry::fresh(image_hash));
        if &entry.image_hash != image_hash {
            *entry = LedgerEntry::fresh(image_hash);
        }
        entry.attempts = entry.attempts.max(attempt);
    }

    /// Parks the target. Returns `false` when it was already parked for this
    /// hash, letting callers publish the failure once.
    pub fn mark_terminal(
        &self,
        target: &ScanTarget,
        image_hash: &ImageHash,
        reason: impl Into<String>,
    ) -> bool {
        let mut entry = self
            .entries
            .entry(target.clone())
            .or_insert_with(|| LedgerEntry::fresh(image_hash));
        if &entry.image_hash != image_hash {
            *entry = LedgerEntry::fresh(image_hash);
        }
        if entry.terminal.is_some() {
            return false;
        }
        entry.terminal = Some(TerminalFailure {
            target: target.clone(),
            image_hash: image_hash.clone(),
            reason: reason.into(),
            attempts: entry.attempts,
            failed_at: Utc::now(),
        });
        true
    }

    pub fn terminal_failure(
        &self,
        target: &ScanTarget,
        image_hash: &ImageHash,
    ) -> Option<TerminalFailure> {
        self.entries
            .get(target)
            .filter(|entry| &entry.image_hash == image_hash)
            .and_then(|entry| entry.terminal.clone())
    }

    /// Forgets the target after a report was written for it.
    pub fn clear(&self, target: &ScanTarget) {
        self.entries.remove(target);
    }

    pub fn forget_workload(&self, workload: &WorkloadKey) {
        self.entries.retain(|target, _| &target.workload != workload);
    }

    /// Every parked target, ordered by target.
    pub fn terminal_failures(&self) -> Vec<TerminalFailure> {
        let mut failures: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| entry.terminal.clone())
            .collect();
        failures.sort_by(|a, b| a.target.cmp(&b.target));
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ScanTarget {
        ScanTarget::new(&WorkloadKey::new("ns", "web-1"), "app")
    }

    #[test]
    fn attempts_are_scoped_to_the_image_hash() {
        let ledger = ScanLedger::new();
        let aaa = ImageHash::new("AAA");
        let bbb = ImageHash::new("BBB");

        ledger.record_attempt(&target(), &aaa, 2);
        ledger.record_attempt(&target(), &aaa, 1);
        assert_eq!(ledger.attempts(&target(), &aaa), 2);
        assert_eq!(ledger.attempts(&target(), &bbb), 0);

        ledger.record_attempt(&target(), &bbb, 1);
        assert_eq!(ledger.attempts(&target(), &aaa), 0);
        assert_eq!(ledger.attempts(&target(), &bbb), 1);
    }

    #[test]
    fn terminal_failures_are_reported_once_and_reset_by_new_images() {
        let ledger = ScanLedger::new();
        let aaa = ImageHash::new("AAA");

        assert!(ledger.mark_terminal(&target(), &aaa, "bad image"));
        assert!(!ledger.mark_terminal(&target(), &aaa, "bad image"));
        assert_eq!(ledger.terminal_failures().len(), 1);

        let bbb = ImageHash::new("BBB");
        assert!(ledger.terminal_failure(&target(), &bbb).is_none());
        ledger.record_attempt(&target(), &bbb, 1);
        assert!(ledger.terminal_failures().is_empty());
    }

    #[test]
    fn forget_workload_drops_all_containers() {
        let ledger = ScanLedger::new();
        let key = WorkloadKey::new("ns", "web-1");
        let hash = ImageHash::new("AAA");
        ledger.mark_terminal(&ScanTarget::new(&key, "a"), &hash, "x");
        ledger.mark_terminal(&ScanTarget::new(&key, "b"), &hash, "y");
        ledger.mark_terminal(
            &ScanTarget::new(&WorkloadKey::new("ns", "other"), "a"),
            &hash,
            "z",
        );

        ledger.forget_workload(&key);
        assert_eq!(ledger.terminal_failures().len(), 1);
    }
}
