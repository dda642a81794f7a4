#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use vulnwatch_core::{
    config::{OperatorConfig, RetryConfig},
    events::InProcEventBus,
    model::{
        ContainerSpec, ContainerStatus, PullPolicy, ScanJobRef, Workload, WorkloadKey,
        WorkloadPhase,
    },
    registry::KindRegistry,
    runtime::{ObservationKind, Operator, WorkloadObservation},
    scanner::{RandomNameGenerator, Scanner, TrivyScanner},
    store::InMemoryReportStore,
    substrate::InMemorySubstrate,
};

pub const THREE_FINDINGS: &str = r#"{"SchemaVersion":2,"Results":[{"Target":"img","Vulnerabilities":[
    {"VulnerabilityID":"CVE-2024-0001","PkgName":"openssl","InstalledVersion":"3.0.1","FixedVersion":"3.0.2","Severity":"CRITICAL"},
    {"VulnerabilityID":"CVE-2024-0002","PkgName":"zlib","InstalledVersion":"1.2.11","Severity":"MEDIUM"},
    {"VulnerabilityID":"CVE-2024-0003","PkgName":"bash","InstalledVersion":"5.1","Severity":"LOW"}
]}]}"#;

pub struct TestOperator {
    pub operator: Operator,
    pub substrate: Arc<InMemorySubstrate>,
    pub store: Arc<InMemoryReportStore>,
    pub events: Arc<InProcEventBus>,
}

pub fn fast_config() -> OperatorConfig {
    let mut config = OperatorConfig::default();
    config.scanner_trivy.enabled = true;
    config.reconciler.stale_job_requeue_ms = 10;
    config.reconciler.owner_wait_requeue_ms = 10;
    config.reconciler.reconcile_timeout_ms = 2_000;
    config.retry = RetryConfig {
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        jitter_ratio: 0.1,
        jitter_min_ms: 1,
    };
    config
}

pub fn operator_with(
    config: OperatorConfig,
    substrate: Arc<InMemorySubstrate>,
    store: Arc<InMemoryReportStore>,
) -> TestOperator {
    let events = Arc::new(InProcEventBus::default());
    let scanner = Scanner::Job(TrivyScanner::new(
        config.scanner_trivy.clone(),
        &config.operator,
        substrate.clone(),
        Arc::new(RandomNameGenerator::with_seed(17)),
        Arc::new(KindRegistry::default()),
    ));
    let operator = Operator::new(
        config,
        substrate.clone(),
        store.clone(),
        scanner,
        events.clone(),
    )
    .expect("valid operator config");

    TestOperator {
        operator,
        substrate,
        store,
        events,
    }
}

pub fn operator() -> TestOperator {
    operator_with(
        fast_config(),
        Arc::new(InMemorySubstrate::new()),
        Arc::new(InMemoryReportStore::new()),
    )
}

pub fn pod(name: &str, uid: &str, version: u64, containers: &[(&str, &str)]) -> Workload {
    Workload {
        namespace: "default".into(),
        name: name.into(),
        uid: uid.into(),
        resource_version: version,
        terminating: false,
        phase: WorkloadPhase::Running,
        containers: containers
            .iter()
            .map(|(name, image)| ContainerSpec {
                name: (*name).into(),
                image: (*image).into(),
                image_pull_policy: PullPolicy::IfNotPresent,
            })
            .collect(),
        container_statuses: containers
            .iter()
            .map(|(name, image)| ContainerStatus {
                name: (*name).into(),
                image_id: format!("docker-pullable://{image}"),
                ready: true,
            })
            .collect(),
    }
}

pub fn web_key() -> WorkloadKey {
    WorkloadKey::new("default", "web-1")
}

pub fn added(workload: Workload) -> WorkloadObservation {
    WorkloadObservation {
        kind: ObservationKind::Added,
        workload,
    }
}

pub fn modified(workload: Workload) -> WorkloadObservation {
    WorkloadObservation {
        kind: ObservationKind::Modified,
        workload,
    }
}

pub fn deleted(workload: Workload) -> WorkloadObservation {
    WorkloadObservation {
        kind: ObservationKind::Deleted,
        workload,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn single_job(substrate: &InMemorySubstrate) -> ScanJobRef {
    eventually("a scan job", || async move { substrate.len() == 1 }).await;
    substrate.snapshot().remove(0)
}
