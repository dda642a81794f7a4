//! Synchronous scanner: asks an Aqua CSP console to scan the image inline.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ScanStart;
use crate::{
    config::AquaCspSettings,
    error::ScanError,
    model::{Finding, ImageReference, ScanFindings, ScannerInfo, WorkloadRef},
};

pub const SCANNER_ID: &str = "aqua-csp";

/// Remote API that scans an image and answers with its findings.
#[async_trait]
pub trait ImageScanApi: Send + Sync {
    async fn scan(&self, image: &ImageReference) -> Result<Vec<Finding>, ScanError>;
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    vulnerabilities: Vec<ApiVulnerability>,
}

#[derive(Debug, Deserialize)]
struct ApiVulnerability {
    name: String,
    #[serde(default)]
    severity: String,
    resource: ApiResource,
    #[serde(default)]
    fix_version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nvd_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResource {
    name: String,
    #[serde(default)]
    version: String,
}

impl From<ApiVulnerability> for Finding {
    fn from(v: ApiVulnerability) -> Self {
        Finding {
            vulnerability_id: v.name,
            severity: v.severity.parse().unwrap_or_default(),
            package: v.resource.name,
            installed_version: v.resource.version,
            fixed_version: v.fix_version.filter(|fixed| !fixed.is_empty()),
            title: v.description,
            primary_link: v.nvd_url,
        }
    }
}

/// reqwest-backed client for the console's scan endpoint.
#[derive(Clone)]
pub struct HttpScanApi {
    client: reqwest::Client,
    endpoint: url::Url,
    username: Option<String>,
    password: Option<String>,
}

impl fmt::Debug for HttpScanApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpScanApi")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpScanApi {
    pub fn new(settings: &AquaCspSettings) -> Result<Self, ScanError> {
        let mut base = settings.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = url::Url::parse(&base)
            .and_then(|url| url.join("api/v1/scanner/scan"))
            .map_err(|e| {
                ScanError::fatal(format!(
                    "invalid scanner base url {}: {e}",
                    settings.base_url
                ))
            })?;
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ScanError::fatal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }
}

#[async_trait]
impl ImageScanApi for HttpScanApi {
    async fn scan(&self, image: &ImageReference) -> Result<Vec<Finding>, ScanError> {
        let image = image.to_string();
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&ScanRequest { image: &image });
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            ScanError::retryable(format!("scanner api unreachable: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("scanner api rejected {image}: {status} {body}");
            return Err(if is_retryable_status(status) {
                ScanError::Retryable(msg)
            } else {
                ScanError::Fatal(msg)
            });
        }

        let body: ScanResponse = response.json().await.map_err(|e| {
            ScanError::retryable(format!("scanner api returned malformed body: {e}"))
        })?;
        Ok(body.vulnerabilities.into_iter().map(Finding::from).collect())
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::UNAUTHORIZED
}

pub struct AquaCspScanner {
    settings: AquaCspSettings,
    api: Arc<dyn ImageScanApi>,
}

impl fmt::Debug for AquaCspScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AquaCspScanner")
            .field("base_url", &self.settings.base_url)
            .field("version", &self.settings.version)
            .finish()
    }
}

impl AquaCspScanner {
    pub fn new(settings: AquaCspSettings, api: Arc<dyn ImageScanApi>) -> Self {
        Self { settings, api }
    }

    pub fn info(&self) -> ScannerInfo {
        ScannerInfo {
            name: "Aqua CSP".into(),
            vendor: "Aqua Security".into(),
            version: self.settings.version.clone(),
        }
    }

    pub(super) async fn start(
        &self,
        workload: &WorkloadRef,
        container_index: usize,
    ) -> Result<ScanStart, ScanError> {
        let container = workload.container(container_index).ok_or_else(|| {
            ScanError::fatal(format!(
                "{} has no container at index {container_index}",
                workload.key
            ))
        })?;

        debug!(
            target: "vulnwatch::scanner",
            workload = %workload.key,
            container = %container.name,
            image = %container.image,
            "scanning image inline"
        );
        let findings = self.api.scan(&container.image).await?;
        Ok(ScanStart::Completed(ScanFindings::new(self.info(), findings)))
    }
}
