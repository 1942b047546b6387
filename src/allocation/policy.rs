//! Capacity policies

use serde::{Deserialize, Serialize};

use super::AllocationStatus;

/// How many sessions a module instance may serve at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Never reports full
    Unlimited,

    /// One session at a time, for resources tied to a single display or
    /// device
    SingleTenant,

    /// Full once `max_sessions` distinct sessions hold claims
    Fixed { max_sessions: usize },
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        CapacityPolicy::Unlimited
    }
}

impl CapacityPolicy {
    /// Whether `status` can take no further sessions
    pub fn is_full(&self, status: &AllocationStatus) -> bool {
        match *self {
            CapacityPolicy::Unlimited => false,
            CapacityPolicy::SingleTenant => !status.is_empty(),
            CapacityPolicy::Fixed { max_sessions } => status.claim_count() >= max_sessions,
        }
    }
}

impl std::fmt::Display for CapacityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapacityPolicy::Unlimited => write!(f, "unlimited"),
            CapacityPolicy::SingleTenant => write!(f, "single tenant"),
            CapacityPolicy::Fixed { max_sessions } => write!(f, "fixed ({})", max_sessions),
        }
    }
}
