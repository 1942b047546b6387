//! modnet - module discovery, liveness detection and allocation negotiation
//!
//! Module instances announce their status on a discovery topic at a fixed
//! interval. A [`registry::ModuleRegistry`] keeps the last known status of
//! every instance and drops the ones that went silent. Instances claim each
//! other for user sessions through [`allocation::AllocationNegotiator`],
//! with replies matched to requests by the [`correlator`].

pub mod allocation;
pub mod cli;
pub mod config;
pub mod correlator;
pub mod error;
pub mod heartbeat;
pub mod logging;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod types;

pub use allocation::{AllocationNegotiator, AllocationOutcome, AllocationTracker, CapacityPolicy};
pub use config::NodeConfig;
pub use error::{Error, ErrorCode, Result};
pub use heartbeat::{HeartbeatEmitter, StatusSource};
pub use node::{ModuleNode, NodeSettings};
pub use registry::{ModuleRegistry, ModuleStatusListener, RemovalReason, StatusRecord};
pub use transport::{Destination, LocalBus, Transport};
pub use types::{ModuleIdentity, ModuleState, ModuleStatus, ModuleType, SessionKey, UserSession};
