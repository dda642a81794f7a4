//! Read-only helpers over observed workloads.

use serde::{Deserialize, Serialize};

use crate::model::{
    ContainerImage, ImageHash, ImageReference, Workload, WorkloadRef,
};

/// Container whose image reference could not be parsed. Reported alongside
/// the healthy containers so one bad entry never hides the others.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InvalidContainer {
    pub name: String,
    pub image: String,
    pub error: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInspection {
    pub workload: WorkloadRef,
    pub invalid: Vec<InvalidContainer>,
    /// True once every container image has been pulled and the workload is
    /// neither terminating nor finished.
    pub ready: bool,
}

/// Extracts ordered container images and scan readiness from a workload.
pub fn inspect(workload: &Workload) -> WorkloadInspection {
    let mut containers = Vec::with_capacity(workload.containers.len());
    let mut invalid = Vec::new();

    for spec in &workload.containers {
        let resolved_id = workload
            .status_of(&spec.name)
            .map(|status| status.image_id.as_str());

        match ImageReference::parse(&spec.image) {
            Ok(image) => {
                let image_hash = ImageHash::derive(&image, resolved_id);
                containers.push(ContainerImage {
                    name: spec.name.clone(),
                    image,
                    image_hash,
                    pull_policy: spec.image_pull_policy,
                });
            }
            Err(err) => invalid.push(InvalidContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                error: err.to_string(),
            }),
        }
    }

    WorkloadInspection {
        workload: WorkloadRef {
            key: workload.key(),
            uid: workload.uid.clone(),
            containers,
        },
        invalid,
        ready: is_ready_for_scanning(workload),
    }
}

pub fn exists(workload: Option<&Workload>) -> bool {
    workload.is_some_and(|w| !w.terminating)
}

pub fn is_ready_for_scanning(workload: &Workload) -> bool {
    if workload.terminating || workload.phase.is_terminal() {
        return false;
    }
    !workload.containers.is_empty()
        && workload.containers.iter().all(|spec| {
            workload
                .status_of(&spec.name)
                .is_some_and(|status| !status.image_id.is_empty())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerSpec, ContainerStatus, PullPolicy, WorkloadPhase};

    fn workload(images: &[(&str, &str)], pulled: bool) -> Workload {
        Workload {
            namespace: "ns".into(),
            name: "web-1".into(),
            uid: "uid-1".into(),
            resource_version: 1,
            terminating: false,
            phase: WorkloadPhase::Running,
            containers: images
                .iter()
                .map(|(name, image)| ContainerSpec {
                    name: (*name).into(),
                    image: (*image).into(),
                    image_pull_policy: PullPolicy::IfNotPresent,
                })
                .collect(),
            container_statuses: images
                .iter()
                .map(|(name, _)| ContainerStatus {
                    name: (*name).into(),
                    image_id: if pulled {
                        format!("docker-pullable://x@sha256:{name}")
                    } else {
                        String::new()
                    },
                    ready: pulled,
                })
                .collect(),
        }
    }

    #[test]
    fn preserves_container_order_and_hashes() {
        let inspection = inspect(&workload(
            &[("app", "img@sha256:AAA"), ("sidecar", "proxy:1.0")],
            true,
        ));
        assert!(inspection.ready);
        let names: Vec<_> = inspection
            .workload
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, ["app", "sidecar"]);
        assert_eq!(inspection.workload.containers[0].image_hash.as_str(), "AAA");
        assert_eq!(
            inspection.workload.containers[1].image_hash.as_str(),
            "sidecar"
        );
    }

    #[test]
    fn not_ready_until_images_are_pulled() {
        assert!(!inspect(&workload(&[("app", "img:1")], false)).ready);

        let mut terminating = workload(&[("app", "img:1")], true);
        terminating.terminating = true;
        assert!(!inspect(&terminating).ready);
        assert!(!exists(Some(&terminating)));
    }

    #[test]
    fn invalid_images_are_reported_separately() {
        let inspection =
            inspect(&workload(&[("bad", "Not An Image"), ("app", "img:1")], true));
        assert_eq!(inspection.invalid.len(), 1);
        assert_eq!(inspection.invalid[0].name, "bad");
        assert_eq!(inspection.workload.containers.len(), 1);
    }
}
