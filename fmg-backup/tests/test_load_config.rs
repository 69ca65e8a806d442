use fmg_backup::load_config::{load_config, load_env_file, API_KEY_ENV};
use fmg_backup_core::config::DEFAULT_CONCURRENCY;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

/// A full config maps every key onto the resolved configuration.
#[tokio::test]
#[serial]
async fn test_load_config_maps_all_fields() {
    let file = config_file(
        r#"
controller:
  address: fmg.example.net
  verify_tls: false
  timeout_secs: 10
  retry:
    max_attempts: 5
    backoff_ms: 100
filter:
  since: "2025-03-03"
output_dir: ./tmp/revisions
concurrency: 8
"#,
    );
    env::set_var(API_KEY_ENV, "abc123");

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.controller.address, "fmg.example.net");
    assert_eq!(config.controller.api_key, "abc123");
    assert!(!config.controller.verify_tls);
    assert_eq!(config.controller.timeout, Duration::from_secs(10));
    assert_eq!(config.controller.retry.max_attempts, 5);
    assert_eq!(config.controller.retry.backoff_base, Duration::from_millis(100));
    assert_eq!(config.cutoff.to_string(), "2025-03-03 00:00:00");
    assert_eq!(config.output_dir, PathBuf::from("./tmp/revisions"));
    assert_eq!(config.concurrency, 8);
}

/// Optional keys fall back to their defaults.
#[tokio::test]
#[serial]
async fn test_load_config_applies_defaults() {
    let file = config_file(
        r#"
controller:
  address: 192.168.1.99
filter:
  since: "2025-03-03 08:30:00"
"#,
    );
    env::set_var(API_KEY_ENV, "abc123");

    let config = load_config(file.path()).expect("Config should load");

    assert!(config.controller.verify_tls);
    assert_eq!(config.controller.timeout, Duration::from_secs(30));
    assert_eq!(config.controller.retry.max_attempts, 3);
    assert_eq!(config.output_dir, PathBuf::from("config_revisions"));
    assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    assert_eq!(config.cutoff.to_string(), "2025-03-03 08:30:00");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_without_api_key() {
    let file = config_file("controller:\n  address: 192.168.1.99\nfilter:\n  since: \"2025-03-03\"\n");
    env::remove_var(API_KEY_ENV);

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("FMG_API_KEY"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_bad_cutoff() {
    let file = config_file("controller:\n  address: 192.168.1.99\nfilter:\n  since: \"03/03/2025\"\n");
    env::set_var(API_KEY_ENV, "abc123");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("cutoff"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_zero_concurrency() {
    let file = config_file(
        "controller:\n  address: 192.168.1.99\nfilter:\n  since: \"2025-03-03\"\nconcurrency: 0\n",
    );
    env::set_var(API_KEY_ENV, "abc123");

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("concurrency"), "got: {err}");
}

/// This test ensures that if the config file is not valid YAML, load_config errors and reports as such.
#[tokio::test]
#[serial]
async fn test_load_config_errors_for_invalid_file() {
    let file = config_file("not-yaml: [:::");
    env::set_var(API_KEY_ENV, "abc123");

    let msg = load_config(file.path()).unwrap_err().to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[tokio::test]
#[serial]
async fn test_load_config_errors_for_missing_file() {
    let err = load_config("/definitely/not/here.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"), "got: {err}");
}

#[tokio::test]
#[serial]
async fn test_env_file_provides_api_key() {
    env::remove_var(API_KEY_ENV);
    let env_file = config_file("FMG_API_KEY=from-env-file\n");
    load_env_file(Some(env_file.path())).expect("env file should load");

    let file = config_file("controller:\n  address: 192.168.1.99\nfilter:\n  since: \"2025-03-03\"\n");
    let config = load_config(file.path()).expect("Config should load");
    assert_eq!(config.controller.api_key, "from-env-file");
    env::remove_var(API_KEY_ENV);
}

#[tokio::test]
#[serial]
async fn test_explicit_env_file_must_exist() {
    assert!(load_env_file(Some(std::path::Path::new("/definitely/not/here.env"))).is_err());
}
