//! Config loading tests.
//!
//! Exercises `ConfigLoader` against files on disk: nested tables, defaults
//! for optional fields, and the error variants callers branch on.

use rtbridge_common::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
use serde::Deserialize;
use std::fs;
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    shared: SharedConfig,
    #[serde(default)]
    workers: Vec<Worker>,
}

#[derive(Debug, Deserialize)]
struct Worker {
    name: String,
    #[serde(default)]
    trace: bool,
}

fn write(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn loads_nested_tables_and_arrays() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "proxy.toml",
        r#"
[shared]
log_level = "warn"
service_name = "rtproxy-test"

[[workers]]
name = "echo"
trace = true

[[workers]]
name = "demo"
"#,
    );

    let config = ServiceConfig::load(&path).unwrap();
    config.shared.validate().unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Warn);
    assert_eq!(config.workers.len(), 2);
    assert!(config.workers[0].trace);
    assert_eq!(config.workers[1].name, "demo");
    assert!(!config.workers[1].trace);
}

#[test]
fn missing_required_field_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "proxy.toml", "[shared]\nlog_level = \"info\"\n");

    let result = ServiceConfig::load(&path);
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn unknown_log_level_is_parse_error() {
    let result = ServiceConfig::from_toml("[shared]\nservice_name = \"x\"\nlog_level = \"loud\"\n");
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn missing_file_is_reported_as_not_found() {
    let dir = TempDir::new().unwrap();
    let result = ServiceConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}
