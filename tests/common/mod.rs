//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use modnet::allocation::{AllocationNegotiator, AllocationTracker, CapacityPolicy};
use modnet::heartbeat::StatusSource;
use modnet::transport::LocalBus;
use modnet::types::{ModuleIdentity, ModuleState, ModuleStatus, ModuleType};

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// A config file in its own temporary directory
pub struct ConfigFixture {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
}

impl ConfigFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("modnet.toml");
        Self { temp_dir, config_path }
    }

    pub fn with_content(content: &str) -> Self {
        let fixture = Self::new();
        fixture.write(content);
        fixture
    }

    pub fn write(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    pub fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

/// Running status for a module whose name equals its address
pub fn running(address: &str, module_type: ModuleType) -> ModuleStatus {
    ModuleStatus::new(
        ModuleIdentity::new(address, address, module_type),
        ModuleState::Running,
    )
}

/// Status source that always reports the same status
pub struct FixedStatus(pub ModuleStatus);

impl StatusSource for FixedStatus {
    fn module_status(&self) -> ModuleStatus {
        self.0.clone()
    }
}

/// Candidate-side negotiator for `address` with the given policy
pub fn negotiator(address: &str, module_type: ModuleType, policy: CapacityPolicy) -> AllocationNegotiator {
    AllocationNegotiator::new(
        Arc::new(FixedStatus(running(address, module_type))),
        Arc::new(AllocationTracker::new()),
        policy,
        Arc::new(LocalBus::new()),
    )
}

#[test]
fn test_fixtures_exist() {
    assert!(valid_config_fixture().exists(), "Valid config fixture should exist");
    assert!(invalid_config_fixture().exists(), "Invalid config fixture should exist");
}
