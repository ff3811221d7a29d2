//! Loading proxy configuration from disk.

use rtbridge_common::config::{ConfigError, ConfigLoader};
use rtbridge_proxy::{ActorRoles, ProxyConfig, ProxyCore, ProxyError};
use rtbridge_shm::BackendChoice;
use std::io::Write;

const SHIPPED: &str = include_str!("../../config/proxy.toml");

#[test]
fn shipped_config_is_valid() {
    let config = ProxyConfig::from_toml(SHIPPED).unwrap();
    config.validate().unwrap();

    assert_eq!(config.registry.backend, BackendChoice::Auto);
    let names: Vec<&str> = config.actors.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["echo", "halcmd", "events"]);
    assert!(
        config.actors[2]
            .role_flags()
            .contains(ActorRoles::INJECTOR | ActorRoles::PUBLISHER | ActorRoles::TRACE)
    );
}

#[test]
fn load_config_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[shared]
service_name = "from-disk"

[[actors]]
name = "echo"
roles = ["echo"]
"#
    )
    .unwrap();

    let config = ProxyCore::load_config(&path).unwrap();
    assert_eq!(config.shared.service_name, "from-disk");
    assert_eq!(config.actors.len(), 1);
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ProxyCore::load_config(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ProxyError::Config(ConfigError::FileNotFound)));
}

#[test]
fn unknown_role_fails_to_parse() {
    let err = ProxyConfig::from_toml(
        r#"
[shared]
service_name = "x"

[[actors]]
name = "a"
roles = ["oracle"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}
