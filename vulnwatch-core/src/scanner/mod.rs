//! Scanner abstraction.
//!
//! A deployment runs exactly one backend, chosen at startup:
//!
//! - [`TrivyScanner`] dispatches a scan job per target and hands the result
//!   back later through [`Scanner::retrieve`].
//! - [`AquaCspScanner`] scans inline and returns findings from
//!   [`Scanner::start`].
//!
//! Either way `start` yields a result or a job, never both.

pub mod aqua;
pub mod naming;
pub mod trivy;
mod trivy_output;

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;

pub use aqua::{AquaCspScanner, HttpScanApi, ImageScanApi};
pub use naming::{NameGenerator, RandomNameGenerator, compose_job_name};
pub use trivy::{HttpServiceProbe, ServiceProbe, TrivyScanner};

use crate::{
    config::{AquaCspSettings, OperatorConfig, TrivySettings},
    error::{CoreError, Result, ScanError},
    model::{ScanFindings, ScanJobRef, ScannerInfo, WorkloadRef},
    registry::KindRegistry,
    substrate::ExecutionSubstrate,
};

/// Outcome of [`Scanner::start`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanStart {
    /// Synchronous backends return findings right away.
    Completed(ScanFindings),
    /// Asynchronous backends hand back the job they created.
    Dispatched(ScanJobRef),
}

/// Outcome of retrieving the result of a finished scan job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScannerResult {
    Findings(ScanFindings),
    Retryable(String),
    Fatal(String),
}

impl From<ScanError> for ScannerResult {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Retryable(msg) => ScannerResult::Retryable(msg),
            ScanError::Fatal(msg) => ScannerResult::Fatal(msg),
        }
    }
}

#[derive(Debug)]
pub enum Scanner {
    Job(TrivyScanner),
    Api(AquaCspScanner),
}

impl Scanner {
    /// Identifier stamped on scan jobs and used in logs.
    pub fn id(&self) -> &'static str {
        match self {
            Scanner::Job(_) => trivy::SCANNER_ID,
            Scanner::Api(_) => aqua::SCANNER_ID,
        }
    }

    pub fn info(&self) -> ScannerInfo {
        match self {
            Scanner::Job(scanner) => scanner.info(),
            Scanner::Api(scanner) => scanner.info(),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Scanner::Job(_))
    }

    /// Starts a scan of one container of `workload`. Running past
    /// `deadline` is a retryable failure.
    pub async fn start(
        &self,
        workload: &WorkloadRef,
        container_index: usize,
        attempt: u16,
        deadline: Instant,
    ) -> std::result::Result<ScanStart, ScanError> {
        let run = async {
            match self {
                Scanner::Job(scanner) => {
                    scanner.start(workload, container_index, attempt).await
                }
                Scanner::Api(scanner) => scanner.start(workload, container_index).await,
            }
        };

        match tokio::time::timeout_at(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::retryable(format!(
                "{} scan of {} timed out",
                self.id(),
                workload.key
            ))),
        }
    }

    pub async fn retrieve(&self, job: &ScanJobRef) -> ScannerResult {
        match self {
            Scanner::Job(scanner) => scanner.retrieve(job).await,
            Scanner::Api(_) => ScannerResult::Fatal(format!(
                "{} does not run scan jobs; cannot retrieve {}",
                aqua::SCANNER_ID,
                job.key
            )),
        }
    }
}

/// Which backend a configuration enables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScannerSelection {
    Trivy,
    AquaCsp,
}

impl ScannerSelection {
    /// Exactly one backend must be enabled.
    pub fn from_settings(
        trivy: &TrivySettings,
        aqua: &AquaCspSettings,
    ) -> Result<Self> {
        match (trivy.enabled, aqua.enabled) {
            (true, false) => Ok(ScannerSelection::Trivy),
            (false, true) => Ok(ScannerSelection::AquaCsp),
            (true, true) => Err(CoreError::Config(
                "multiple vulnerability scanners enabled".into(),
            )),
            (false, false) => Err(CoreError::Config(
                "no vulnerability scanner enabled".into(),
            )),
        }
    }

    pub fn from_config(config: &OperatorConfig) -> Result<Self> {
        Self::from_settings(&config.scanner_trivy, &config.scanner_aqua_csp)
    }
}

/// Builds the configured backend with its production collaborators.
pub fn build_scanner(
    config: &OperatorConfig,
    substrate: Arc<dyn ExecutionSubstrate>,
    registry: Arc<KindRegistry>,
    names: Arc<dyn NameGenerator>,
) -> Result<Scanner> {
    match ScannerSelection::from_config(config)? {
        ScannerSelection::Trivy => {
            let settings = config.scanner_trivy.clone();
            let probe = settings
                .server_url
                .as_deref()
                .map(|url| HttpServiceProbe::new(url, Duration::from_secs(10)))
                .transpose()
                .map_err(|e| CoreError::Config(e.message().to_string()))?;

            let mut scanner = TrivyScanner::new(
                settings,
                &config.operator,
                substrate,
                names,
                registry,
            );
            if let Some(probe) = probe {
                scanner = scanner.with_probe(Arc::new(probe));
            }
            Ok(Scanner::Job(scanner))
        }
        ScannerSelection::AquaCsp => {
            let settings = config.scanner_aqua_csp.clone();
            let api = HttpScanApi::new(&settings)
                .map_err(|e| CoreError::Config(e.message().to_string()))?;
            Ok(Scanner::Api(AquaCspScanner::new(settings, Arc::new(api))))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        model::{
            ContainerImage, Finding, ImageHash, ImageReference, PullPolicy,
            ScanJobPhase, Severity, WorkloadKey, labels,
        },
        substrate::InMemorySubstrate,
    };

    struct FixedApi(std::result::Result<Vec<Finding>, ScanError>);

    #[async_trait]
    impl ImageScanApi for FixedApi {
        async fn scan(
            &self,
            _image: &ImageReference,
        ) -> std::result::Result<Vec<Finding>, ScanError> {
            self.0.clone()
        }
    }

    struct SlowApi;

    #[async_trait]
    impl ImageScanApi for SlowApi {
        async fn scan(
            &self,
            _image: &ImageReference,
        ) -> std::result::Result<Vec<Finding>, ScanError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    struct DownProbe;

    #[async_trait]
    impl ServiceProbe for DownProbe {
        async fn check(&self) -> std::result::Result<(), ScanError> {
            Err(ScanError::retryable("connection refused"))
        }
    }

    fn workload_ref(pull_policy: PullPolicy) -> WorkloadRef {
        let image = ImageReference::parse("img@sha256:AAA").unwrap();
        WorkloadRef {
            key: WorkloadKey::new("default", "web-1"),
            uid: "uid-1".into(),
            containers: vec![ContainerImage {
                name: "app".into(),
                image_hash: ImageHash::derive(&image, None),
                image,
                pull_policy,
            }],
        }
    }

    fn trivy(substrate: Arc<InMemorySubstrate>) -> TrivyScanner {
        let config = OperatorConfig::default();
        TrivyScanner::new(
            TrivySettings {
                enabled: true,
                ..TrivySettings::default()
            },
            &config.operator,
            substrate,
            Arc::new(RandomNameGenerator::with_seed(1)),
            Arc::new(KindRegistry::default()),
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn finding(id: &str) -> Finding {
        Finding {
            vulnerability_id: id.into(),
            severity: Severity::High,
            package: "openssl".into(),
            installed_version: "1.0".into(),
            fixed_version: None,
            title: None,
            primary_link: None,
        }
    }

    #[test]
    fn selection_requires_exactly_one_scanner() {
        let mut config = OperatorConfig::default();
        let err = ScannerSelection::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("no vulnerability scanner enabled"));

        config.scanner_trivy.enabled = true;
        config.scanner_aqua_csp.enabled = true;
        let err = ScannerSelection::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("multiple vulnerability scanners enabled"));

        config.scanner_aqua_csp.enabled = false;
        assert_eq!(
            ScannerSelection::from_config(&config).unwrap(),
            ScannerSelection::Trivy
        );
    }

    #[tokio::test]
    async fn job_backend_dispatches_and_creates_one_job() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let scanner = Scanner::Job(trivy(substrate.clone()));

        let started = scanner
            .start(&workload_ref(PullPolicy::IfNotPresent), 0, 1, far_deadline())
            .await
            .unwrap();

        let ScanStart::Dispatched(job) = started else {
            panic!("expected a dispatched job");
        };
        assert!(job.key.name.starts_with("scan-web-1-app-"));
        assert_eq!(job.image_hash.as_str(), "AAA");
        assert_eq!(job.phase, ScanJobPhase::Pending);
        assert_eq!(job.owner_reference.kind, "Pod");
        assert_eq!(
            job.labels.get(labels::OPERATOR_VERSION).map(String::as_str),
            Some(env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(substrate.len(), 1);
    }

    #[tokio::test]
    async fn never_pull_policy_is_fatal() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let scanner = Scanner::Job(trivy(substrate.clone()));

        let err = scanner
            .start(&workload_ref(PullPolicy::Never), 0, 1, far_deadline())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(substrate.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let scanner = Scanner::Job(trivy(substrate.clone()).with_probe(Arc::new(DownProbe)));

        let err = scanner
            .start(&workload_ref(PullPolicy::Always), 0, 1, far_deadline())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(substrate.is_empty());
    }

    #[tokio::test]
    async fn retrieve_parses_output_or_reports_missing() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let scanner = Scanner::Job(trivy(substrate.clone()));
        let ScanStart::Dispatched(job) = scanner
            .start(&workload_ref(PullPolicy::IfNotPresent), 0, 1, far_deadline())
            .await
            .unwrap()
        else {
            panic!("expected a dispatched job");
        };

        assert!(matches!(
            scanner.retrieve(&job).await,
            ScannerResult::Retryable(_)
        ));

        substrate.set_output(&job.key, "not json at all");
        assert!(matches!(scanner.retrieve(&job).await, ScannerResult::Fatal(_)));

        substrate.set_output(
            &job.key,
            r#"{"Results":[{"Vulnerabilities":[{"VulnerabilityID":"CVE-1","PkgName":"a","Severity":"LOW"}]}]}"#,
        );
        match scanner.retrieve(&job).await {
            ScannerResult::Findings(scan) => {
                assert_eq!(scan.findings.len(), 1);
                assert_eq!(scan.scanner.name, "Trivy");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn api_backend_completes_inline() {
        let scanner = Scanner::Api(AquaCspScanner::new(
            AquaCspSettings::default(),
            Arc::new(FixedApi(Ok(vec![finding("CVE-2"), finding("CVE-1")]))),
        ));

        let started = scanner
            .start(&workload_ref(PullPolicy::Never), 0, 1, far_deadline())
            .await
            .unwrap();
        let ScanStart::Completed(scan) = started else {
            panic!("expected inline findings");
        };
        assert_eq!(scan.findings[0].vulnerability_id, "CVE-1");
    }

    #[tokio::test(start_paused = true)]
    async fn api_backend_timeout_is_retryable() {
        let scanner = Scanner::Api(AquaCspScanner::new(
            AquaCspSettings::default(),
            Arc::new(SlowApi),
        ));

        let err = scanner
            .start(
                &workload_ref(PullPolicy::Always),
                0,
                1,
                Instant::now() + Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.message().contains("timed out"));
    }
}
