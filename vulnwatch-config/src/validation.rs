//! Guard rails applied after a configuration is assembled.
//!
//! Hard errors come from the core crate (scanner selection, zero-sized worker
//! pools); everything here only produces warnings.

use vulnwatch_core::{
    config::OperatorConfig,
    runtime::validate_config,
    scanner::ScannerSelection,
};

use crate::loader::error::ConfigLoadError;

/// Scan jobs below this deadline rarely finish pulling the vulnerability DB.
const MIN_ACTIVE_DEADLINE_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, message: impl Into<String>, hint: Option<&str>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: hint.map(str::to_string),
        });
    }
}

pub fn validate(
    config: &OperatorConfig,
) -> Result<(ScannerSelection, ConfigWarnings), ConfigLoadError> {
    let selection = validate_config(config)?;
    let mut warnings = ConfigWarnings::default();

    match selection {
        ScannerSelection::Trivy => {
            let trivy = &config.scanner_trivy;
            if trivy.active_deadline_secs < MIN_ACTIVE_DEADLINE_SECS {
                warnings.push(
                    format!(
                        "scan job deadline of {}s is very short",
                        trivy.active_deadline_secs
                    ),
                    Some("use at least 60s unless skip_db_update is set"),
                );
            }
            if trivy.server_url.is_none() && trivy.skip_db_update {
                warnings.push(
                    "skip_db_update without a Trivy server scans against a stale database",
                    Some("set OPERATOR_SCANNER_TRIVY_SERVER_URL"),
                );
            }
        }
        ScannerSelection::AquaCsp => {
            let aqua = &config.scanner_aqua_csp;
            if aqua.username.is_none() || aqua.password.is_none() {
                warnings.push(
                    "Aqua CSP scanner enabled without credentials",
                    Some(
                        "set OPERATOR_SCANNER_AQUA_CSP_USERNAME and OPERATOR_SCANNER_AQUA_CSP_PASSWORD",
                    ),
                );
            }
            if aqua.request_timeout_ms >= config.reconciler.reconcile_timeout_ms {
                warnings.push(
                    "Aqua CSP request timeout is not shorter than the reconcile timeout",
                    Some("slow scans will surface as reconcile timeouts"),
                );
            }
        }
    }

    Ok((selection, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivy() -> OperatorConfig {
        let mut config = OperatorConfig::default();
        config.scanner_trivy.enabled = true;
        config
    }

    #[test]
    fn defaults_with_trivy_are_clean() {
        let (selection, warnings) = validate(&trivy()).unwrap();
        assert_eq!(selection, ScannerSelection::Trivy);
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn short_deadline_warns() {
        let mut config = trivy();
        config.scanner_trivy.active_deadline_secs = 10;
        let (_, warnings) = validate(&config).unwrap();
        assert_eq!(warnings.items.len(), 1);
        assert!(warnings.items[0].message.contains("10s"));
    }

    #[test]
    fn aqua_without_credentials_warns() {
        let mut config = OperatorConfig::default();
        config.scanner_aqua_csp.enabled = true;
        let (selection, warnings) = validate(&config).unwrap();
        assert_eq!(selection, ScannerSelection::AquaCsp);
        // Default request timeout (120s) also exceeds the default reconcile timeout (60s).
        assert_eq!(warnings.items.len(), 2);
    }

    #[test]
    fn invalid_config_is_an_error() {
        let err = validate(&OperatorConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
    }
}
