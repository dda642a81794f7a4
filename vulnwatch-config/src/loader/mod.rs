//! Operator configuration loading.
//!
//! Evaluation order:
//! 1) `$VULNWATCH_CONFIG_PATH` (TOML or JSON file),
//! 2) `$VULNWATCH_CONFIG_JSON` (inline JSON),
//! 3) the first default file found under the base directory,
//! 4) built-in defaults.
//!
//! `OPERATOR_*` variables are applied on top of whichever source won.

pub mod error;

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;
use vulnwatch_core::{config::OperatorConfig, scanner::ScannerSelection};

use crate::{
    util::{parse_bool, parse_csv, parse_duration},
    validation::{self, ConfigWarnings},
};
use error::ConfigLoadError;

pub const CONFIG_PATH_VAR: &str = "VULNWATCH_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "VULNWATCH_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &[
    "vulnwatch.toml",
    "vulnwatch.json",
    "config/vulnwatch.toml",
    "config/vulnwatch.json",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// A loaded, validated configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: OperatorConfig,
    pub source: ConfigSource,
    pub selection: ScannerSelection,
    /// Environment variables that overrode file values.
    pub overrides: Vec<String>,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    vars: HashMap<String, String>,
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Snapshot of the process environment, resolving default files against
    /// the working directory.
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Loads `.env` (when present) into the process environment before
    /// taking the snapshot. Returns whether a file was found.
    pub fn from_env_file(path: Option<&Path>) -> Result<(Self, bool), ConfigLoadError> {
        let loaded = match path {
            Some(path) if path.exists() => {
                dotenvy::from_path(path)?;
                true
            }
            Some(_) => false,
            None => dotenvy::dotenv().is_ok(),
        };
        Ok((Self::from_env(), loaded))
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            base_dir: PathBuf::from("."),
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Forces the file source, as if `$VULNWATCH_CONFIG_PATH` were set.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.vars
            .insert(CONFIG_PATH_VAR.to_string(), path.display().to_string());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (mut config, source) = self.load_base()?;
        let overrides = self.apply_overrides(&mut config)?;
        let (selection, warnings) = validation::validate(&config)?;

        debug!(source = ?source, overrides = overrides.len(), "operator config loaded");

        Ok(ConfigLoad {
            config,
            source,
            selection,
            overrides,
            warnings,
        })
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    fn load_base(&self) -> Result<(OperatorConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = self.var(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path);
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = self.var(CONFIG_JSON_VAR) {
            let config = parse_json(raw, CONFIG_JSON_VAR)?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = DEFAULT_FILES
            .iter()
            .map(|candidate| self.base_dir.join(candidate))
            .find(|path| path.exists())
        {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((OperatorConfig::default(), ConfigSource::Default))
    }

    fn apply_overrides(
        &self,
        config: &mut OperatorConfig,
    ) -> Result<Vec<String>, ConfigLoadError> {
        let mut applied = Vec::new();
        let mut mark = |name: &str| applied.push(name.to_string());

        if let Some(v) = self.var("OPERATOR_NAMESPACE") {
            config.operator.namespace = v.to_string();
            mark("OPERATOR_NAMESPACE");
        }
        if let Some(v) = self.var("OPERATOR_TARGET_NAMESPACES") {
            config.operator.target_namespaces = parse_csv(v);
            mark("OPERATOR_TARGET_NAMESPACES");
        }
        if let Some(v) = self.var("OPERATOR_SERVICE_ACCOUNT") {
            config.operator.service_account = Some(v.to_string());
            mark("OPERATOR_SERVICE_ACCOUNT");
        }

        if let Some(v) = self.bool_var("OPERATOR_SCANNER_TRIVY_ENABLED")? {
            config.scanner_trivy.enabled = v;
            mark("OPERATOR_SCANNER_TRIVY_ENABLED");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_TRIVY_VERSION") {
            config.scanner_trivy.version = v.to_string();
            mark("OPERATOR_SCANNER_TRIVY_VERSION");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_TRIVY_IMAGE") {
            config.scanner_trivy.image = v.to_string();
            mark("OPERATOR_SCANNER_TRIVY_IMAGE");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_TRIVY_SERVER_URL") {
            config.scanner_trivy.server_url = Some(v.to_string());
            mark("OPERATOR_SCANNER_TRIVY_SERVER_URL");
        }

        if let Some(v) = self.bool_var("OPERATOR_SCANNER_AQUA_CSP_ENABLED")? {
            config.scanner_aqua_csp.enabled = v;
            mark("OPERATOR_SCANNER_AQUA_CSP_ENABLED");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_AQUA_CSP_VERSION") {
            config.scanner_aqua_csp.version = v.to_string();
            mark("OPERATOR_SCANNER_AQUA_CSP_VERSION");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_AQUA_CSP_BASE_URL") {
            config.scanner_aqua_csp.base_url = v.to_string();
            mark("OPERATOR_SCANNER_AQUA_CSP_BASE_URL");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_AQUA_CSP_USERNAME") {
            config.scanner_aqua_csp.username = Some(v.to_string());
            mark("OPERATOR_SCANNER_AQUA_CSP_USERNAME");
        }
        if let Some(v) = self.var("OPERATOR_SCANNER_AQUA_CSP_PASSWORD") {
            config.scanner_aqua_csp.password = Some(v.to_string());
            mark("OPERATOR_SCANNER_AQUA_CSP_PASSWORD");
        }

        if let Some(v) = self.parsed_var::<usize>("OPERATOR_WORKLOAD_WORKERS")? {
            config.reconciler.workload_workers = v;
            mark("OPERATOR_WORKLOAD_WORKERS");
        }
        if let Some(v) = self.parsed_var::<usize>("OPERATOR_JOB_WORKERS")? {
            config.reconciler.job_workers = v;
            mark("OPERATOR_JOB_WORKERS");
        }
        if let Some(v) = self.parsed_var::<u16>("OPERATOR_JOB_RETRY_BUDGET")? {
            config.reconciler.job_retry_budget = v;
            mark("OPERATOR_JOB_RETRY_BUDGET");
        }
        if let Some(v) = self.duration_ms_var("OPERATOR_RECONCILE_TIMEOUT")? {
            config.reconciler.reconcile_timeout_ms = v;
            mark("OPERATOR_RECONCILE_TIMEOUT");
        }
        if let Some(v) = self.duration_ms_var("OPERATOR_OWNER_WAIT_REQUEUE")? {
            config.reconciler.owner_wait_requeue_ms = v;
            mark("OPERATOR_OWNER_WAIT_REQUEUE");
        }

        Ok(applied)
    }

    fn bool_var(&self, name: &str) -> Result<Option<bool>, ConfigLoadError> {
        self.var(name)
            .map(|raw| {
                parse_bool(raw).ok_or_else(|| invalid_env(name, raw, "expected a boolean"))
            })
            .transpose()
    }

    fn parsed_var<T>(&self, name: &str) -> Result<Option<T>, ConfigLoadError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.var(name)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| invalid_env(name, raw, &e.to_string()))
            })
            .transpose()
    }

    fn duration_ms_var(&self, name: &str) -> Result<Option<u64>, ConfigLoadError> {
        self.var(name)
            .map(|raw| {
                parse_duration(raw)
                    .map(|d| d.as_millis() as u64)
                    .ok_or_else(|| invalid_env(name, raw, "expected a duration"))
            })
            .transpose()
    }
}

fn invalid_env(var: &str, value: &str, reason: &str) -> ConfigLoadError {
    ConfigLoadError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

pub fn load_from_file(path: &Path) -> Result<OperatorConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") => parse_toml(&contents, &origin),
        _ => parse_toml(&contents, &origin).or_else(|toml_err| {
            parse_json(&contents, &origin).map_err(|json_err| ConfigLoadError::Parse {
                origin: origin.clone(),
                message: format!("toml error: {toml_err}; json error: {json_err}"),
            })
        }),
    }
}

fn parse_toml(contents: &str, origin: &str) -> Result<OperatorConfig, ConfigLoadError> {
    toml::from_str(contents).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        message: err.to_string(),
    })
}

fn parse_json(contents: &str, origin: &str) -> Result<OperatorConfig, ConfigLoadError> {
    serde_json::from_str(contents).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        message: err.to_string(),
    })
}
