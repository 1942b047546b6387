//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

mod common;

use std::fs;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use modnet::allocation::CapacityPolicy;
use modnet::config::{generate_default_config, init_config, NodeConfig};
use modnet::error::Error;
use modnet::types::ModuleType;

use common::ConfigFixture;

fn validate_cmd(fixture: &ConfigFixture) -> Command {
    let mut cmd = Command::cargo_bin("modnet").unwrap();
    cmd.env_remove("MODNET_STATUS_TIMEOUT_MS")
        .env_remove("MODNET_HEARTBEAT_INTERVAL_MS")
        .env_remove("MODNET_LOG_LEVEL")
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(fixture.path());
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
timeout_ms = 2000
"#,
    );

    let config = NodeConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.status_timeout(), Some(Duration::from_millis(2000)));
    assert_eq!(config.heartbeat_interval(), Duration::from_millis(1000));
    assert_eq!(config.sweep_interval(), Duration::from_millis(5000));
    assert_eq!(config.transport.discovery_topic, "module_status");
    assert!(config.modules.is_empty());
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::with_content(
        r#"
[heartbeat]
interval_ms = 250

[registry]
sweep_interval_ms = 500
timeout_ms = 1500

[transport]
discovery_topic = "status_bus"
queue_size = 32

[logging]
level = "debug"
json_format = true

[[modules]]
name = "Tutor"
module_type = "TUTOR"
address = "tutor_1"
capacity = { policy = "single_tenant" }

[[modules]]
name = "Learner Model"
module_type = "LEARNER"
capacity = { policy = "fixed", max_sessions = 10 }
"#,
    );

    let config = NodeConfig::load(Some(fixture.path())).unwrap();
    assert_eq!(config.transport.queue_size, 32);
    assert!(config.logging.json_format);

    let nodes = config.module_nodes();
    assert_eq!(nodes.len(), 2);

    let (tutor, tutor_settings) = &nodes[0];
    assert_eq!(tutor.address, "tutor_1");
    assert_eq!(tutor_settings.policy, CapacityPolicy::SingleTenant);
    assert_eq!(tutor_settings.heartbeat_interval, Duration::from_millis(250));
    assert_eq!(tutor_settings.discovery_topic, "status_bus");

    let (learner, learner_settings) = &nodes[1];
    assert_eq!(learner.module_type, ModuleType::Learner);
    assert!(learner.address.starts_with("learner_"));
    assert_eq!(learner_settings.policy, CapacityPolicy::Fixed { max_sessions: 10 });

    validate_cmd(&fixture).assert().success();
}

#[test]
fn test_generated_default_is_valid() {
    let fixture = ConfigFixture::with_content(&generate_default_config());
    validate_cmd(&fixture)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_missing_timeout() {
    let fixture = ConfigFixture::with_content(
        r#"
[heartbeat]
interval_ms = 1000
"#,
    );

    validate_cmd(&fixture)
        .assert()
        .failure()
        .stderr(predicate::str::contains("registry.timeout_ms"));
}

#[test]
fn test_zero_sweep_interval() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
sweep_interval_ms = 0
timeout_ms = 5000
"#,
    );

    let err = NodeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigValidation { .. }));
    assert!(err.to_string().contains("sweep_interval_ms"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
timeout_ms = 5000

[logging]
level = "verbose"
"#,
    );

    validate_cmd(&fixture)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_duplicate_module_address() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
timeout_ms = 5000

[[modules]]
name = "A"
module_type = "SENSOR"
address = "sensor_1"

[[modules]]
name = "B"
module_type = "SENSOR"
address = "sensor_1"
"#,
    );

    validate_cmd(&fixture)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate module address"));
}

#[test]
fn test_zero_capacity_rejected() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
timeout_ms = 5000

[[modules]]
name = "Sensor"
module_type = "SENSOR"
capacity = { policy = "fixed", max_sessions = 0 }
"#,
    );

    let err = NodeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(err.to_string().contains("max_sessions"));
}

#[test]
fn test_unknown_module_type() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
timeout_ms = 5000

[[modules]]
name = "Mystery"
module_type = "TOASTER"
"#,
    );

    let err = NodeConfig::load(Some(fixture.path())).unwrap_err();
    assert!(matches!(err, Error::ConfigParse { .. }));
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::with_content("[registry\ntimeout_ms = ");

    validate_cmd(&fixture)
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("E101"));
}

// ─────────────────────────────────────────────────────────────────
// Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("modnet.toml");

    Command::cargo_bin("modnet")
        .unwrap()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(&path)
        .assert()
        .success();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("[registry]"));
    assert!(content.contains("timeout_ms"));
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::with_content("# keep me\n");

    let err = init_config(Some(fixture.path()), false).unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert_eq!(fs::read_to_string(&fixture.config_path).unwrap(), "# keep me\n");
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::with_content("# replace me\n");

    let written = init_config(Some(fixture.path()), true).unwrap();
    assert_eq!(written, fixture.config_path);
    assert!(fs::read_to_string(&written).unwrap().contains("[heartbeat]"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_supplies_timeout() {
    let fixture = ConfigFixture::with_content(
        r#"
[heartbeat]
interval_ms = 1000
"#,
    );

    validate_cmd(&fixture)
        .env("MODNET_STATUS_TIMEOUT_MS", "4000")
        .assert()
        .success();
}

#[test]
fn test_env_override_log_level_validated() {
    let fixture = ConfigFixture::with_content(
        r#"
[registry]
timeout_ms = 5000
"#,
    );

    validate_cmd(&fixture)
        .env("MODNET_LOG_LEVEL", "loud")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}
