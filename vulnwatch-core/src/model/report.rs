use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    build::BuildInfo,
    image::{ImageHash, ImageReference},
    workload::WorkloadKey,
};

#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Severity {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    /// Unrecognised severities map to `Unknown` rather than failing the
    /// whole report.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" | "NEGLIGIBLE" => Severity::Low,
            _ => Severity::Unknown,
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
            Severity::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A single vulnerability record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub vulnerability_id: String,
    pub severity: Severity,
    pub package: String,
    pub installed_version: String,
    #[serde(default)]
    pub fixed_version: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub primary_link: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScannerInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

/// Findings produced by one scan, before they are bound to a report key.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanFindings {
    pub scanner: ScannerInfo,
    pub findings: Vec<Finding>,
}

impl ScanFindings {
    pub fn new(scanner: ScannerInfo, mut findings: Vec<Finding>) -> Self {
        sort_findings(&mut findings);
        Self { scanner, findings }
    }
}

/// Most severe first, then by id and package so reports diff cleanly.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.vulnerability_id.cmp(&b.vulnerability_id))
            .then_with(|| a.package.cmp(&b.package))
    });
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

impl SeveritySummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        findings.iter().fold(Self::default(), |mut acc, finding| {
            match finding.severity {
                Severity::Critical => acc.critical += 1,
                Severity::High => acc.high += 1,
                Severity::Medium => acc.medium += 1,
                Severity::Low => acc.low += 1,
                Severity::Unknown => acc.unknown += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.unknown
    }
}

/// At most one current report exists per key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportKey {
    pub namespace: String,
    pub workload: String,
    pub container: String,
}

impl ReportKey {
    pub fn new(workload: &WorkloadKey, container: impl Into<String>) -> Self {
        Self {
            namespace: workload.namespace.clone(),
            workload: workload.name.clone(),
            container: container.into(),
        }
    }

    pub fn workload_key(&self) -> WorkloadKey {
        WorkloadKey::new(&self.namespace, &self.workload)
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.workload, self.container)
    }
}

/// Persisted vulnerability report for one (workload, container) at one
/// image version. Superseded wholesale when the image changes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub key: ReportKey,
    pub owner_uid: String,
    pub image: ImageReference,
    pub image_hash: ImageHash,
    pub scanner: ScannerInfo,
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<Finding>,
    pub summary: SeveritySummary,
    /// Operator build that wrote the report.
    #[serde(default)]
    pub operator: BuildInfo,
    /// Bumped by the store on every upsert.
    #[serde(default)]
    pub revision: u64,
}

impl Report {
    pub fn new(
        key: ReportKey,
        owner_uid: impl Into<String>,
        image: ImageReference,
        image_hash: ImageHash,
        scan: ScanFindings,
    ) -> Self {
        let ScanFindings {
            scanner,
            mut findings,
        } = scan;
        sort_findings(&mut findings);
        let summary = SeveritySummary::from_findings(&findings);
        Self {
            key,
            owner_uid: owner_uid.into(),
            image,
            image_hash,
            scanner,
            generated_at: Utc::now(),
            findings,
            summary,
            operator: BuildInfo::default(),
            revision: 0,
        }
    }

    pub fn with_operator(mut self, operator: BuildInfo) -> Self {
        self.operator = operator;
        self
    }
}
