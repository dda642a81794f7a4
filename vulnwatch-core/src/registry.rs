//! Explicit registry of the resource kinds the engine touches.
//!
//! The registry is built once at process start and handed to every component
//! that needs to stamp owner references or labels, so no core logic performs
//! an ambient lookup.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Resource kinds known to the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Workload,
    ScanJob,
    Report,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Workload => write!(f, "workload"),
            ResourceKind::ScanJob => write!(f, "scan job"),
            ResourceKind::Report => write!(f, "report"),
        }
    }
}

/// Group/version/kind triple for a registered resource.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct KindInfo {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl KindInfo {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Reference from a dependent resource back to its owner. Drives cascade
/// deletion where the cluster supports it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

#[derive(Clone, Debug)]
pub struct KindRegistry {
    kinds: HashMap<ResourceKind, KindInfo>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::builder()
            .register(ResourceKind::Workload, KindInfo::new("", "v1", "Pod"))
            .register(ResourceKind::ScanJob, KindInfo::new("batch", "v1", "Job"))
            .register(
                ResourceKind::Report,
                KindInfo::new(
                    "aquasecurity.github.io",
                    "v1alpha1",
                    "VulnerabilityReport",
                ),
            )
            .build()
    }
}

impl KindRegistry {
    pub fn builder() -> KindRegistryBuilder {
        KindRegistryBuilder::default()
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&KindInfo> {
        self.kinds.get(&kind).ok_or_else(|| {
            CoreError::Config(format!("resource kind {kind} is not registered"))
        })
    }

    pub fn owner_reference(
        &self,
        kind: ResourceKind,
        name: &str,
        uid: &str,
    ) -> Result<OwnerReference> {
        let info = self.get(kind)?;
        Ok(OwnerReference {
            api_version: info.api_version(),
            kind: info.kind.clone(),
            name: name.to_string(),
            uid: uid.to_string(),
            controller: true,
        })
    }
}

#[derive(Debug, Default)]
pub struct KindRegistryBuilder {
    kinds: HashMap<ResourceKind, KindInfo>,
}

impl KindRegistryBuilder {
    pub fn register(mut self, kind: ResourceKind, info: KindInfo) -> Self {
        self.kinds.insert(kind, info);
        self
    }

    pub fn build(self) -> KindRegistry {
        KindRegistry { kinds: self.kinds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_group_has_bare_api_version() {
        let registry = KindRegistry::default();
        let owner = registry
            .owner_reference(ResourceKind::Workload, "web-1", "uid-1")
            .expect("workload registered");
        assert_eq!(owner.api_version, "v1");
        assert_eq!(owner.kind, "Pod");
        assert!(owner.controller);
    }

    #[test]
    fn unregistered_kind_is_a_config_error() {
        let registry = KindRegistry::builder().build();
        let err = registry.get(ResourceKind::ScanJob).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
