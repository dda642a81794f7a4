use std::fmt;

use serde::{Deserialize, Serialize};

use super::image::{ImageHash, ImageReference};

/// Namespaced name of a workload. Reconcile key for the workload loop.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkloadPhase::Succeeded | WorkloadPhase::Failed)
    }
}

/// Container as declared by the workload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub image_pull_policy: PullPolicy,
}

/// Runtime status reported for a container.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    /// Image id resolved by the container runtime once the pull completed,
    /// e.g. `docker-pullable://nginx@sha256:...`. Empty until then.
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub ready: bool,
}

/// Observed snapshot of a live workload instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub terminating: bool,
    #[serde(default)]
    pub phase: WorkloadPhase,
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl Workload {
    pub fn key(&self) -> WorkloadKey {
        WorkloadKey::new(&self.namespace, &self.name)
    }

    pub fn status_of(&self, container: &str) -> Option<&ContainerStatus> {
        self.container_statuses.iter().find(|s| s.name == container)
    }
}

/// One scannable container of a [`WorkloadRef`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub name: String,
    pub image: ImageReference,
    pub image_hash: ImageHash,
    pub pull_policy: PullPolicy,
}

/// Immutable identity of a scannable unit taken at reconcile time.
///
/// Goes stale as soon as the live workload mutates; consumers compare uids
/// and image hashes instead of trusting it across reconciles.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub key: WorkloadKey,
    pub uid: String,
    pub containers: Vec<ContainerImage>,
}

impl WorkloadRef {
    pub fn container(&self, index: usize) -> Option<&ContainerImage> {
        self.containers.get(index)
    }

    pub fn container_named(&self, name: &str) -> Option<&ContainerImage> {
        self.containers.iter().find(|c| c.name == name)
    }
}
