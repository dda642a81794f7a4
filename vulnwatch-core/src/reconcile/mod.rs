//! The two control loops' reconcile functions.
//!
//! Both are level-triggered: they read the current state of the world for a
//! key and drive it one step toward the desired state. Running either twice
//! for an unchanged world has no further effect.

pub mod job;
pub mod ledger;
pub mod workload;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

pub use job::ScanJobReconciler;
pub use ledger::{ScanLedger, ScanTarget, TerminalFailure};
pub use workload::WorkloadReconciler;

use crate::{
    config::{OperatorSettings, ReconcilerConfig},
    error::Result,
    events::EventPublisher,
    model::{Workload, WorkloadKey},
    scanner::Scanner,
    store::ReportStore,
    substrate::ExecutionSubstrate,
};

/// Collaborators shared by both reconcilers.
#[derive(Clone)]
pub struct ReconcileContext {
    pub workloads: Arc<dyn WorkloadSource>,
    pub substrate: Arc<dyn ExecutionSubstrate>,
    pub store: Arc<dyn ReportStore>,
    pub scanner: Arc<Scanner>,
    pub ledger: Arc<ScanLedger>,
    pub events: Arc<dyn EventPublisher>,
    pub operator: OperatorSettings,
    pub config: ReconcilerConfig,
}

impl std::fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("scanner", &self.scanner.id())
            .field("ledger", &self.ledger)
            .field("operator", &self.operator)
            .field("config", &self.config)
            .finish()
    }
}

/// Read access to the latest observed workloads.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn get(&self, key: &WorkloadKey) -> Result<Option<Workload>>;

    /// Whether a key missing from [`get`](Self::get) is known to be deleted,
    /// as opposed to not observed yet.
    async fn is_gone(&self, key: &WorkloadKey) -> Result<bool>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Done,
    /// Revisit the key after the delay without counting a failure.
    Requeue(Duration),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileOutcome {
    pub action: Action,
    /// Workload the runtime should enqueue on the workload loop.
    pub follow_up: Option<WorkloadKey>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self {
            action: Action::Done,
            follow_up: None,
        }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            action: Action::Requeue(after),
            follow_up: None,
        }
    }

    pub fn nudge(workload: WorkloadKey) -> Self {
        Self {
            action: Action::Done,
            follow_up: Some(workload),
        }
    }
}
