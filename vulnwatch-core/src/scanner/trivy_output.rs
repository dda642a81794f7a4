//! Decoding of Trivy JSON output captured from a finished scan job.

use serde::Deserialize;

use crate::model::{Finding, Severity};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrivyOutput {
    Envelope {
        #[serde(rename = "Results", default)]
        results: Vec<TrivyResult>,
    },
    /// Output of releases before the `Results` envelope was introduced.
    Legacy(Vec<TrivyResult>),
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    #[serde(rename = "PkgName")]
    pkg_name: String,
    #[serde(rename = "InstalledVersion", default)]
    installed_version: String,
    #[serde(rename = "FixedVersion", default)]
    fixed_version: Option<String>,
    #[serde(rename = "Severity", default)]
    severity: String,
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "PrimaryURL", default)]
    primary_url: Option<String>,
}

impl From<TrivyVulnerability> for Finding {
    fn from(v: TrivyVulnerability) -> Self {
        let severity = v.severity.parse().unwrap_or(Severity::Unknown);
        Finding {
            vulnerability_id: v.vulnerability_id,
            severity,
            package: v.pkg_name,
            installed_version: v.installed_version,
            fixed_version: v.fixed_version.filter(|fixed| !fixed.is_empty()),
            title: v.title,
            primary_link: v.primary_url,
        }
    }
}

/// Parses the raw job output. Log lines printed before the JSON document
/// (progress messages) are skipped.
pub fn parse(raw: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let start = raw
        .find(['{', '['])
        .unwrap_or(0);
    let output: TrivyOutput = serde_json::from_str(raw[start..].trim())?;
    let results = match output {
        TrivyOutput::Envelope { results } => results,
        TrivyOutput::Legacy(results) => results,
    };

    Ok(results
        .into_iter()
        .flat_map(|result| result.vulnerabilities.unwrap_or_default())
        .map(Finding::from)
        .collect())
}
