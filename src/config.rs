//! Configuration system for modnet
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (MODNET_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! The status timeout has no default. A deployment must supply it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::allocation::CapacityPolicy;
use crate::error::{Error, Result};
use crate::node::NodeSettings;
use crate::types::{ModuleIdentity, ModuleType};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Heartbeat emitter settings
    pub heartbeat: HeartbeatSettings,

    /// Module registry settings
    pub registry: RegistrySettings,

    /// Transport settings
    pub transport: TransportSettings,

    /// Logging configuration
    pub logging: LoggingSettings,

    /// Module instances hosted by this process
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleSettings>,
}

/// Heartbeat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Time between status announcements in milliseconds
    pub interval_ms: u64,
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Time between sweeps in milliseconds
    pub sweep_interval_ms: u64,

    /// Silence after which a module is considered gone (required)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Topic heartbeats are published on
    pub discovery_topic: String,

    /// Per-inbox message buffer
    pub queue_size: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

/// One hosted module instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Display name
    pub name: String,

    /// Module type
    pub module_type: ModuleType,

    /// Routing address; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Capacity policy
    #[serde(default)]
    pub capacity: CapacityPolicy,
}

// ─────────────────────────────────────────────────────────────────
// Default implementations
// ─────────────────────────────────────────────────────────────────

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 5000,
            timeout_ms: None,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            discovery_topic: "module_status".to_string(),
            queue_size: crate::transport::DEFAULT_QUEUE_SIZE,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ModuleSettings {
    /// Configured address, or `<type>_<short uuid>` when none is set
    pub fn resolve_address(&self) -> String {
        match self.address {
            Some(ref address) => address.clone(),
            None => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("{}_{}", self.module_type.as_str(), &id[..8])
            }
        }
    }
}

impl NodeConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::parse_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            } else {
                return Err(Error::ConfigNotFound { path });
            }
        }

        // Search in standard locations
        let search_paths = [
            // Current directory
            PathBuf::from("modnet.toml"),
            // User config directory
            dirs::config_dir()
                .map(|p| p.join("modnet").join("modnet.toml"))
                .unwrap_or_default(),
            // Home directory
            dirs::home_dir()
                .map(|p| p.join(".modnet").join("modnet.toml"))
                .unwrap_or_default(),
            // System config (Linux)
            PathBuf::from("/etc/modnet/modnet.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("MODNET_HEARTBEAT_INTERVAL_MS") {
            self.heartbeat.interval_ms = n;
        }
        if let Some(n) = env_parse("MODNET_SWEEP_INTERVAL_MS") {
            self.registry.sweep_interval_ms = n;
        }
        if let Some(n) = env_parse("MODNET_STATUS_TIMEOUT_MS") {
            self.registry.timeout_ms = Some(n);
        }
        if let Ok(val) = std::env::var("MODNET_DISCOVERY_TOPIC") {
            self.transport.discovery_topic = val;
        }

        // Logging settings
        if let Ok(val) = std::env::var("MODNET_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("MODNET_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("MODNET_LOG_JSON") {
            self.logging.json_format = val == "1" || val.to_lowercase() == "true";
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "heartbeat.interval_ms",
                "heartbeat.interval_ms must be greater than 0",
            ));
        }
        if self.registry.sweep_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "registry.sweep_interval_ms",
                "registry.sweep_interval_ms must be greater than 0",
            ));
        }
        match self.registry.timeout_ms {
            None => {
                return Err(Error::config_field_invalid(
                    "registry.timeout_ms",
                    "registry.timeout_ms is required (or set MODNET_STATUS_TIMEOUT_MS)",
                ))
            }
            Some(0) => {
                return Err(Error::config_field_invalid(
                    "registry.timeout_ms",
                    "registry.timeout_ms must be greater than 0",
                ))
            }
            Some(_) => {}
        }

        if self.transport.discovery_topic.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "transport.discovery_topic",
                "transport.discovery_topic cannot be empty",
            ));
        }
        if self.transport.queue_size == 0 {
            return Err(Error::config_field_invalid(
                "transport.queue_size",
                "transport.queue_size must be greater than 0",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(Error::config_field_invalid("modules.name", "module name cannot be empty"));
            }
            if let CapacityPolicy::Fixed { max_sessions: 0 } = module.capacity {
                return Err(Error::config_field_invalid(
                    "modules.capacity",
                    format!("module '{}': max_sessions must be greater than 0", module.name),
                ));
            }
            if let Some(ref address) = module.address {
                if address.trim().is_empty() {
                    return Err(Error::config_field_invalid(
                        "modules.address",
                        format!("module '{}': address cannot be empty", module.name),
                    ));
                }
                if !seen.insert(address.as_str()) {
                    return Err(Error::config_field_invalid(
                        "modules.address",
                        format!("duplicate module address '{}'", address),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.registry.sweep_interval_ms)
    }

    /// Status timeout; `None` until configured
    pub fn status_timeout(&self) -> Option<Duration> {
        self.registry.timeout_ms.map(Duration::from_millis)
    }

    /// Identity and node settings for every configured module
    pub fn module_nodes(&self) -> Vec<(ModuleIdentity, NodeSettings)> {
        self.modules
            .iter()
            .map(|m| {
                let identity = ModuleIdentity::new(&m.name, m.resolve_address(), m.module_type);
                let settings = NodeSettings {
                    policy: m.capacity,
                    heartbeat_interval: self.heartbeat_interval(),
                    discovery_topic: self.transport.discovery_topic.clone(),
                };
                (identity, settings)
            })
            .collect()
    }
}

fn env_parse(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modnet")
        .join("modnet.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# modnet configuration

[heartbeat]
# Time between status announcements in milliseconds
interval_ms = 1000

[registry]
# Time between liveness sweeps in milliseconds
sweep_interval_ms = 5000

# Silence in milliseconds after which a module is considered gone.
# Required: there is no universal default.
timeout_ms = 5000

[transport]
# Topic heartbeats are published on
discovery_topic = "module_status"

# Per-inbox message buffer
queue_size = 256

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.modnet/logs/modnet.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

# Hosted module instances. capacity.policy is one of
# "unlimited", "single_tenant" or "fixed" (with max_sessions).

[[modules]]
name = "Learning Management System"
module_type = "LMS"
address = "lms_1"
capacity = { policy = "unlimited" }

[[modules]]
name = "Sensor"
module_type = "SENSOR"
address = "sensor_1"
capacity = { policy = "single_tenant" }
"#
    .to_string()
}
