use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    image::{ImageHash, ImageReference},
    workload::WorkloadKey,
};
use crate::registry::OwnerReference;

/// Labels stamped on every scan job so the substrate can be queried by
/// target without decoding job names.
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const MANAGED_BY_VALUE: &str = "vulnwatch";
    pub const WORKLOAD_NAMESPACE: &str = "vulnwatch.io/workload-namespace";
    pub const WORKLOAD_NAME: &str = "vulnwatch.io/workload-name";
    pub const CONTAINER_NAME: &str = "vulnwatch.io/container-name";
    pub const IMAGE_HASH: &str = "vulnwatch.io/image-hash";
    pub const OPERATOR_VERSION: &str = "vulnwatch.io/operator-version";
}

/// Namespaced name of a scan job. Reconcile key for the scan-job loop.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanJobKey {
    pub namespace: String,
    pub name: String,
}

impl ScanJobKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ScanJobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Lifecycle phase, driven by the execution substrate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScanJobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ScanJobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanJobPhase::Succeeded | ScanJobPhase::Failed)
    }
}

impl fmt::Display for ScanJobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanJobPhase::Pending => write!(f, "pending"),
            ScanJobPhase::Running => write!(f, "running"),
            ScanJobPhase::Succeeded => write!(f, "succeeded"),
            ScanJobPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Workload that a scan job was dispatched for.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobOwner {
    pub workload: WorkloadKey,
    pub uid: String,
}

/// Desired state handed to the execution substrate.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanJobSpec {
    pub scanner_image: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub active_deadline_secs: u64,
    #[serde(default)]
    pub service_account: Option<String>,
}

/// Identity and desired state of one ephemeral scan-execution unit.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanJobRef {
    pub key: ScanJobKey,
    pub owner: JobOwner,
    pub container: String,
    pub image: ImageReference,
    pub image_hash: ImageHash,
    pub scanner: String,
    /// 1-based dispatch attempt for this (workload, container, image).
    pub attempt: u16,
    #[serde(default)]
    pub phase: ScanJobPhase,
    #[serde(default)]
    pub failure: Option<String>,
    pub spec: ScanJobSpec,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub owner_reference: OwnerReference,
    pub created_at: DateTime<Utc>,
}

impl ScanJobRef {
    /// Whether this job scans the given (workload, container) pair.
    pub fn targets(&self, workload: &WorkloadKey, container: &str) -> bool {
        &self.owner.workload == workload && self.container == container
    }

    pub fn target_labels(
        workload: &WorkloadKey,
        container: &str,
        image_hash: &ImageHash,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (labels::MANAGED_BY.into(), labels::MANAGED_BY_VALUE.into()),
            (labels::WORKLOAD_NAMESPACE.into(), workload.namespace.clone()),
            (labels::WORKLOAD_NAME.into(), workload.name.clone()),
            (labels::CONTAINER_NAME.into(), container.to_string()),
            (labels::IMAGE_HASH.into(), image_hash.short().to_string()),
        ])
    }
}
