use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::BuildInfo;

/// Global knobs that tune the operator.
///
/// All fields carry defaults so a deployment only has to supply the scanner
/// it wants to enable.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OperatorConfig {
    /// Where scan jobs run and which namespaces are watched.
    pub operator: OperatorSettings,
    /// Job-based scanner (asynchronous).
    pub scanner_trivy: TrivySettings,
    /// API-based scanner (synchronous).
    pub scanner_aqua_csp: AquaCspSettings,
    /// Worker pools, timeouts and the scan-job retry budget.
    pub reconciler: ReconcilerConfig,
    /// Backoff applied to failed reconciles.
    pub retry: RetryConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSettings {
    /// Namespace scan jobs are created in.
    pub namespace: String,
    /// Namespaces whose workloads are scanned. Empty means all.
    pub target_namespaces: Vec<String>,
    /// Service account scan jobs run as.
    pub service_account: Option<String>,
    /// Build of this operator; never read from configuration files.
    #[serde(skip, default = "BuildInfo::current")]
    pub build: BuildInfo,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            namespace: "vulnwatch".into(),
            target_namespaces: Vec::new(),
            service_account: None,
            build: BuildInfo::current(),
        }
    }
}

impl OperatorSettings {
    pub fn watches(&self, namespace: &str) -> bool {
        self.target_namespaces.is_empty()
            || self.target_namespaces.iter().any(|ns| ns == namespace)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrivySettings {
    pub enabled: bool,
    pub version: String,
    /// Scanner image; `{version}` is substituted.
    pub image: String,
    /// Optional Trivy server. When set, scan jobs run in client mode and the
    /// server is probed before dispatch.
    pub server_url: Option<String>,
    /// Upper bound on a scan job's runtime (seconds).
    pub active_deadline_secs: u64,
    /// Skip the vulnerability DB update inside scan jobs.
    pub skip_db_update: bool,
}

impl Default for TrivySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            version: "0.50.1".into(),
            image: "aquasec/trivy:{version}".into(),
            server_url: None,
            active_deadline_secs: 600,
            skip_db_update: false,
        }
    }
}

impl TrivySettings {
    pub fn image_ref(&self) -> String {
        self.image.replace("{version}", &self.version)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AquaCspSettings {
    pub enabled: bool,
    pub version: String,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout for the synchronous scan API (milliseconds).
    pub request_timeout_ms: u64,
}

impl Default for AquaCspSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            version: "5.0".into(),
            base_url: "http://aqua-console.aqua:8080".into(),
            username: None,
            password: None,
            request_timeout_ms: 120_000,
        }
    }
}

impl AquaCspSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub workload_workers: usize,
    pub job_workers: usize,
    /// Deadline for a single reconcile call (milliseconds).
    pub reconcile_timeout_ms: u64,
    /// Dispatch attempts per (workload, container, image) before the target
    /// is parked with a terminal failure.
    pub job_retry_budget: u16,
    /// Delay before revisiting a workload whose stale scan job was deleted
    /// (milliseconds).
    pub stale_job_requeue_ms: u64,
    /// Delay before revisiting a finished scan job whose owner has not been
    /// observed yet (milliseconds).
    pub owner_wait_requeue_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workload_workers: 4,
            job_workers: 2,
            reconcile_timeout_ms: 60_000,
            job_retry_budget: 3,
            stale_job_requeue_ms: 1_000,
            owner_wait_requeue_ms: 5_000,
        }
    }
}

impl ReconcilerConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }

    pub fn stale_job_requeue(&self) -> Duration {
        Duration::from_millis(self.stale_job_requeue_ms)
    }

    pub fn owner_wait_requeue(&self) -> Duration {
        Duration::from_millis(self.owner_wait_requeue_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
    /// Minimum jitter in milliseconds so tiny delays still randomise a bit.
    pub jitter_min_ms: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 1_000,
            backoff_max_ms: 5 * 60 * 1_000,
            jitter_ratio: 0.25,
            jitter_min_ms: 100,
        }
    }
}
