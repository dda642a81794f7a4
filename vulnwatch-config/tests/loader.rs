use std::fs;

use tempfile::TempDir;
use vulnwatch_config::{ConfigLoadError, ConfigLoader, ConfigSource};
use vulnwatch_core::scanner::ScannerSelection;

fn empty_dir() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn defaults_need_a_scanner() {
    let dir = empty_dir();
    let err = ConfigLoader::from_vars(Vec::<(String, String)>::new())
        .with_base_dir(dir.path())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Invalid(_)));
    assert!(err.to_string().contains("no vulnerability scanner enabled"));
}

#[test]
fn env_overrides_apply_to_defaults() {
    let dir = empty_dir();
    let load = ConfigLoader::from_vars([
        ("OPERATOR_SCANNER_TRIVY_ENABLED", "true"),
        ("OPERATOR_TARGET_NAMESPACES", "default, payments,"),
        ("OPERATOR_JOB_RETRY_BUDGET", "5"),
        ("OPERATOR_RECONCILE_TIMEOUT", "90s"),
    ])
    .with_base_dir(dir.path())
    .load()
    .unwrap();

    assert_eq!(load.source, ConfigSource::Default);
    assert_eq!(load.selection, ScannerSelection::Trivy);
    assert_eq!(
        load.config.operator.target_namespaces,
        vec!["default".to_string(), "payments".to_string()]
    );
    assert_eq!(load.config.reconciler.job_retry_budget, 5);
    assert_eq!(load.config.reconciler.reconcile_timeout_ms, 90_000);
    assert_eq!(load.overrides.len(), 4);
}

#[test]
fn owner_wait_override_and_build_stamp() {
    let dir = empty_dir();
    let load = ConfigLoader::from_vars([
        ("OPERATOR_SCANNER_TRIVY_ENABLED", "true"),
        ("OPERATOR_OWNER_WAIT_REQUEUE", "2s"),
    ])
    .with_base_dir(dir.path())
    .load()
    .unwrap();

    assert_eq!(load.config.reconciler.owner_wait_requeue_ms, 2_000);
    assert!(!load.config.operator.build.version.is_empty());
    assert!(load.overrides.contains(&"OPERATOR_OWNER_WAIT_REQUEUE".to_string()));
}

#[test]
fn default_file_is_picked_up_from_base_dir() {
    let dir = empty_dir();
    fs::write(
        dir.path().join("vulnwatch.toml"),
        r#"
[operator]
namespace = "security"

[scanner_trivy]
enabled = true
version = "0.49.0"
"#,
    )
    .unwrap();

    let load = ConfigLoader::from_vars([("OPERATOR_SCANNER_TRIVY_VERSION", "0.51.0")])
        .with_base_dir(dir.path())
        .load()
        .unwrap();

    assert_eq!(load.source, ConfigSource::File(dir.path().join("vulnwatch.toml")));
    assert_eq!(load.config.operator.namespace, "security");
    assert_eq!(load.config.scanner_trivy.version, "0.51.0");
    assert_eq!(load.config.scanner_trivy.image_ref(), "aquasec/trivy:0.51.0");
}

#[test]
fn explicit_path_wins_over_inline_json() {
    let dir = empty_dir();
    let path = dir.path().join("operator.json");
    fs::write(
        &path,
        r#"{"scanner_aqua_csp": {"enabled": true, "username": "u", "password": "p", "request_timeout_ms": 1000}}"#,
    )
    .unwrap();

    let load = ConfigLoader::from_vars([
        ("VULNWATCH_CONFIG_PATH", path.display().to_string()),
        (
            "VULNWATCH_CONFIG_JSON",
            r#"{"scanner_trivy": {"enabled": true}}"#.to_string(),
        ),
    ])
    .with_base_dir(dir.path())
    .load()
    .unwrap();

    assert_eq!(load.source, ConfigSource::EnvPath(path));
    assert_eq!(load.selection, ScannerSelection::AquaCsp);
    assert!(load.warnings.is_empty(), "{:?}", load.warnings);
}

#[test]
fn inline_json_is_used_without_a_path() {
    let dir = empty_dir();
    let load = ConfigLoader::from_vars([(
        "VULNWATCH_CONFIG_JSON",
        r#"{"scanner_trivy": {"enabled": true}, "reconciler": {"job_workers": 8}}"#,
    )])
    .with_base_dir(dir.path())
    .load()
    .unwrap();

    assert_eq!(load.source, ConfigSource::EnvInline);
    assert_eq!(load.config.reconciler.job_workers, 8);
}

#[test]
fn both_scanners_enabled_is_rejected() {
    let dir = empty_dir();
    let err = ConfigLoader::from_vars([
        ("OPERATOR_SCANNER_TRIVY_ENABLED", "1"),
        ("OPERATOR_SCANNER_AQUA_CSP_ENABLED", "yes"),
    ])
    .with_base_dir(dir.path())
    .load()
    .unwrap_err();
    assert!(err.to_string().contains("multiple vulnerability scanners enabled"));
}

#[test]
fn malformed_values_name_the_variable() {
    let dir = empty_dir();
    let err = ConfigLoader::from_vars([
        ("OPERATOR_SCANNER_TRIVY_ENABLED", "true"),
        ("OPERATOR_JOB_WORKERS", "many"),
    ])
    .with_base_dir(dir.path())
    .load()
    .unwrap_err();

    match err {
        ConfigLoadError::InvalidEnv { var, value, .. } => {
            assert_eq!(var, "OPERATOR_JOB_WORKERS");
            assert_eq!(value, "many");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unparsable_file_reports_origin() {
    let dir = empty_dir();
    let path = dir.path().join("broken.conf");
    fs::write(&path, "scanner_trivy = [").unwrap();

    let err = ConfigLoader::from_vars(Vec::<(String, String)>::new())
        .with_config_path(&path)
        .load()
        .unwrap_err();
    match err {
        ConfigLoadError::Parse { origin, message } => {
            assert!(origin.ends_with("broken.conf"));
            assert!(message.contains("toml error"));
            assert!(message.contains("json error"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = empty_dir();
    let err = ConfigLoader::from_vars(Vec::<(String, String)>::new())
        .with_config_path(dir.path().join("absent.toml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Read { .. }));
}
