//! Module identity and status snapshots

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Module Type
// ─────────────────────────────────────────────────────────────────

/// Kinds of modules participating in a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleType {
    /// User management (accounts, survey storage)
    Ums,
    /// Learning management (course records)
    Lms,
    /// Learner state modeling
    Learner,
    /// Pedagogical strategy selection
    Pedagogical,
    /// Physiological / behavioral sensors
    Sensor,
    /// Domain content and assessment
    Domain,
    /// Tutor user interface
    Tutor,
    /// Training application gateway
    Gateway,
    /// Operator monitoring
    Monitor,
}

impl ModuleType {
    /// Get all module types
    pub fn all() -> &'static [ModuleType] {
        &[
            ModuleType::Ums,
            ModuleType::Lms,
            ModuleType::Learner,
            ModuleType::Pedagogical,
            ModuleType::Sensor,
            ModuleType::Domain,
            ModuleType::Tutor,
            ModuleType::Gateway,
            ModuleType::Monitor,
        ]
    }

    /// Lowercase name used in addresses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Ums => "ums",
            ModuleType::Lms => "lms",
            ModuleType::Learner => "learner",
            ModuleType::Pedagogical => "pedagogical",
            ModuleType::Sensor => "sensor",
            ModuleType::Domain => "domain",
            ModuleType::Tutor => "tutor",
            ModuleType::Gateway => "gateway",
            ModuleType::Monitor => "monitor",
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleType::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown module type: {}", s))
    }
}

// ─────────────────────────────────────────────────────────────────
// Module State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle state reported in a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    #[default]
    Unknown,
    Starting,
    Running,
    ShuttingDown,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleState::Unknown => write!(f, "unknown"),
            ModuleState::Starting => write!(f, "starting"),
            ModuleState::Running => write!(f, "running"),
            ModuleState::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Identity and Status
// ─────────────────────────────────────────────────────────────────

/// Who a module is and where it can be reached.
///
/// `address` is the routing key and identifies exactly one live instance;
/// `name` is for display only and may repeat across instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub name: String,
    pub address: String,
    pub module_type: ModuleType,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, address: impl Into<String>, module_type: ModuleType) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            module_type,
        }
    }
}

impl std::fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' @ {}", self.module_type, self.name, self.address)
    }
}

/// Immutable point-in-time snapshot of a module, produced on every heartbeat
/// tick. Copies handed out by the registry are independent of its tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    identity: ModuleIdentity,
    #[serde(default)]
    state: ModuleState,
}

impl ModuleStatus {
    pub fn new(identity: ModuleIdentity, state: ModuleState) -> Self {
        Self { identity, state }
    }

    /// Same module, different lifecycle state
    pub fn with_state(&self, state: ModuleState) -> Self {
        Self {
            identity: self.identity.clone(),
            state,
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn module_type(&self) -> ModuleType {
        self.identity.module_type
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }
}

impl std::fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} ({})]", self.identity, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_type_parse() {
        assert_eq!("sensor".parse::<ModuleType>().unwrap(), ModuleType::Sensor);
        assert_eq!("GATEWAY".parse::<ModuleType>().unwrap(), ModuleType::Gateway);
        assert!("toaster".parse::<ModuleType>().is_err());
    }

    #[test]
    fn test_module_type_serialize() {
        let json = serde_json::to_string(&ModuleType::Pedagogical).unwrap();
        assert_eq!(json, "\"PEDAGOGICAL\"");
    }

    #[test]
    fn test_state_defaults_to_unknown() {
        let json = r#"{"identity":{"name":"t","address":"tutor_1","module_type":"TUTOR"}}"#;
        let status: ModuleStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.state(), ModuleState::Unknown);
        assert_eq!(status.module_type(), ModuleType::Tutor);
    }

    #[test]
    fn test_with_state_keeps_identity() {
        let status = ModuleStatus::new(
            ModuleIdentity::new("Sensor", "sensor_1", ModuleType::Sensor),
            ModuleState::Running,
        );
        let leaving = status.with_state(ModuleState::ShuttingDown);

        assert_eq!(leaving.identity(), status.identity());
        assert_eq!(leaving.state(), ModuleState::ShuttingDown);
        assert_eq!(status.state(), ModuleState::Running);
    }
}
