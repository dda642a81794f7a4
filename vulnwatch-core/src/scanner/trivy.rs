//! Asynchronous scanner: dispatches Trivy scan jobs onto the substrate.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{NameGenerator, ScanStart, ScannerResult, trivy_output};
use crate::{
    config::{OperatorSettings, TrivySettings},
    error::ScanError,
    model::{
        BuildInfo, ContainerImage, JobOwner, PullPolicy, ScanFindings, ScanJobKey,
        ScanJobPhase, ScanJobRef, ScanJobSpec, ScannerInfo, WorkloadRef, labels,
    },
    registry::{KindRegistry, ResourceKind},
    substrate::{CreateOutcome, ExecutionSubstrate},
};

pub const SCANNER_ID: &str = "trivy";
const MAX_NAME_ATTEMPTS: usize = 5;

/// Reachability check for a scanner service the jobs depend on.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn check(&self) -> Result<(), ScanError>;
}

/// Probes a Trivy server's `/healthz` endpoint.
#[derive(Clone, Debug)]
pub struct HttpServiceProbe {
    client: reqwest::Client,
    url: url::Url,
}

impl HttpServiceProbe {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, ScanError> {
        let base = url::Url::parse(server_url).map_err(|e| {
            ScanError::fatal(format!("invalid scanner server url {server_url}: {e}"))
        })?;
        let url = base.join("healthz").map_err(|e| {
            ScanError::fatal(format!("invalid scanner server url {server_url}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::fatal(format!("http client: {e}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ServiceProbe for HttpServiceProbe {
    async fn check(&self) -> Result<(), ScanError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                ScanError::retryable(format!("scanner server unreachable: {e}"))
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ScanError::retryable(format!(
                "scanner server unhealthy: {}",
                response.status()
            )))
        }
    }
}

pub struct TrivyScanner {
    settings: TrivySettings,
    namespace: String,
    service_account: Option<String>,
    build: BuildInfo,
    substrate: Arc<dyn ExecutionSubstrate>,
    names: Arc<dyn NameGenerator>,
    registry: Arc<KindRegistry>,
    probe: Option<Arc<dyn ServiceProbe>>,
}

impl fmt::Debug for TrivyScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrivyScanner")
            .field("settings", &self.settings)
            .field("namespace", &self.namespace)
            .field("probe", &self.probe.is_some())
            .finish()
    }
}

impl TrivyScanner {
    pub fn new(
        settings: TrivySettings,
        operator: &OperatorSettings,
        substrate: Arc<dyn ExecutionSubstrate>,
        names: Arc<dyn NameGenerator>,
        registry: Arc<KindRegistry>,
    ) -> Self {
        Self {
            settings,
            namespace: operator.namespace.clone(),
            service_account: operator.service_account.clone(),
            build: operator.build.clone(),
            substrate,
            names,
            registry,
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ServiceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn info(&self) -> ScannerInfo {
        ScannerInfo {
            name: "Trivy".into(),
            vendor: "Aqua Security".into(),
            version: self.settings.version.clone(),
        }
    }

    pub(super) async fn start(
        &self,
        workload: &WorkloadRef,
        container_index: usize,
        attempt: u16,
    ) -> Result<ScanStart, ScanError> {
        let container = workload.container(container_index).ok_or_else(|| {
            ScanError::fatal(format!(
                "{} has no container at index {container_index}",
                workload.key
            ))
        })?;

        if container.pull_policy == PullPolicy::Never {
            return Err(ScanError::fatal(format!(
                "container {} uses pull policy Never; a scan job cannot pull {}",
                container.name, container.image
            )));
        }

        if let Some(probe) = &self.probe {
            probe.check().await?;
        }

        let owner_reference = self
            .registry
            .owner_reference(ResourceKind::Workload, &workload.key.name, &workload.uid)
            .map_err(|e| ScanError::fatal(e.to_string()))?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = self.names.job_name(&workload.key, &container.name);
            let job = ScanJobRef {
                key: ScanJobKey::new(&self.namespace, name),
                owner: JobOwner {
                    workload: workload.key.clone(),
                    uid: workload.uid.clone(),
                },
                container: container.name.clone(),
                image: container.image.clone(),
                image_hash: container.image_hash.clone(),
                scanner: SCANNER_ID.into(),
                attempt,
                phase: ScanJobPhase::Pending,
                failure: None,
                spec: self.job_spec(container),
                labels: self.job_labels(workload, container),
                owner_reference: owner_reference.clone(),
                created_at: Utc::now(),
            };

            match self.substrate.create(job.clone()).await {
                Ok(CreateOutcome::Created) => {
                    debug!(
                        target: "vulnwatch::scanner",
                        job = %job.key,
                        workload = %workload.key,
                        container = %container.name,
                        "scan job created"
                    );
                    return Ok(ScanStart::Dispatched(job));
                }
                Ok(CreateOutcome::AlreadyExists(existing))
                    if existing.targets(&workload.key, &container.name)
                        && existing.image_hash == container.image_hash =>
                {
                    return Ok(ScanStart::Dispatched(*existing));
                }
                Ok(CreateOutcome::AlreadyExists(existing)) => {
                    warn!(
                        target: "vulnwatch::scanner",
                        job = %existing.key,
                        "scan job name collision, regenerating"
                    );
                }
                Err(err) => {
                    return Err(ScanError::retryable(format!(
                        "failed to create scan job: {err}"
                    )));
                }
            }
        }

        Err(ScanError::retryable(format!(
            "could not allocate a unique scan job name for {}/{}",
            workload.key, container.name
        )))
    }

    pub(super) async fn retrieve(&self, job: &ScanJobRef) -> ScannerResult {
        let output = match self.substrate.output(&job.key).await {
            Ok(Some(output)) => output,
            Ok(None) => {
                return ScannerResult::Retryable(format!(
                    "output of scan job {} is not available yet",
                    job.key
                ));
            }
            Err(err) => {
                return ScannerResult::Retryable(format!(
                    "failed to fetch output of scan job {}: {err}",
                    job.key
                ));
            }
        };

        match trivy_output::parse(&output) {
            Ok(findings) => {
                ScannerResult::Findings(ScanFindings::new(self.info(), findings))
            }
            Err(err) => ScannerResult::Fatal(format!(
                "scan job {} produced unreadable output: {err}",
                job.key
            )),
        }
    }

    fn job_labels(
        &self,
        workload: &WorkloadRef,
        container: &ContainerImage,
    ) -> BTreeMap<String, String> {
        let mut stamped =
            ScanJobRef::target_labels(&workload.key, &container.name, &container.image_hash);
        stamped.insert(labels::OPERATOR_VERSION.into(), self.build.version.clone());
        stamped
    }

    fn job_spec(&self, container: &ContainerImage) -> ScanJobSpec {
        let mut args = vec![
            "--quiet".to_string(),
            "image".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--no-progress".to_string(),
        ];
        match &self.settings.server_url {
            Some(server) => {
                args.push("--server".into());
                args.push(server.clone());
            }
            None if self.settings.skip_db_update => {
                args.push("--skip-db-update".into());
            }
            None => {}
        }
        args.push(container.image.to_string());

        ScanJobSpec {
            scanner_image: self.settings.image_ref(),
            args,
            env: Default::default(),
            active_deadline_secs: self.settings.active_deadline_secs,
            service_account: self.service_account.clone(),
        }
    }
}
