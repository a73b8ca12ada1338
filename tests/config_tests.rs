//! Config loading, TOML parsing, and env var override tests.
//!
//! The env override test is `#[ignore]` (env mutation conflicts with
//! parallel tests). Run it with:
//! `cargo test --test config_tests -- --ignored --test-threads=1`

use provstore::Config;
use std::fs;
use tempfile::TempDir;

// Default Configuration Tests

#[test]
fn test_config_default_server_address() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9190);
}

#[test]
fn test_config_default_session_settings() {
    let config = Config::default();
    assert!(config.session.apply_transforms);
    assert_eq!(config.session.max_write_failures, 3);
}

#[test]
fn test_config_default_environment_settings() {
    let config = Config::default();
    assert_eq!(config.environment.universe_label, "provenance");
    assert!(config.environment.gc_on_startup);
}

#[test]
fn test_config_default_logging() {
    let config = Config::default();
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "text");
    assert!(config.logging.file.is_none());
}

// File Loading Tests

#[test]
fn test_config_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("provstore.toml");
    fs::write(
        &path,
        r#"
[server]
host = "0.0.0.0"
port = 9999

[session]
apply_transforms = false

[environment]
universe_label = "audit"

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9999);
    assert!(!config.session.apply_transforms);
    assert_eq!(config.environment.universe_label, "audit");
    assert_eq!(config.logging.level, "debug");
    // Unspecified fields keep their defaults.
    assert_eq!(config.session.max_write_failures, 3);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_config_from_partial_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("provstore.toml");
    fs::write(&path, "[server]\nport = 7001\n").unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.server.port, 7001);
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(config.session.apply_transforms);
}

#[test]
fn test_config_from_missing_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let config = Config::from_file(temp.path().join("nope.toml")).unwrap();
    assert_eq!(config.server.port, 9190);
}

#[test]
fn test_config_rejects_malformed_toml() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("provstore.toml");
    fs::write(&path, "[server\nport = oops").unwrap();
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = Config::default();
    let rendered = toml::to_string(&config).unwrap();
    assert!(rendered.contains("[server]"));
    assert!(rendered.contains("[session]"));

    let temp = TempDir::new().unwrap();
    let path = temp.path().join("provstore.toml");
    fs::write(&path, rendered).unwrap();
    let reloaded = Config::from_file(&path).unwrap();
    assert_eq!(reloaded.server.port, config.server.port);
    assert_eq!(
        reloaded.environment.universe_label,
        config.environment.universe_label
    );
}

// Environment Variable Override Tests

#[test]
#[ignore = "mutates process env; run single-threaded"]
fn test_env_vars_override_file_values() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("provstore.toml");
    fs::write(&path, "[server]\nport = 7001\n").unwrap();

    std::env::set_var("PROVSTORE_SERVER__PORT", "7002");
    let config = Config::from_file(&path).unwrap();
    std::env::remove_var("PROVSTORE_SERVER__PORT");

    assert_eq!(config.server.port, 7002);
}
