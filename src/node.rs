//! Module node
//!
//! One module instance: its identity and lifecycle state, its allocation
//! tracker and negotiator, and its heartbeat. The node handles messages
//! arriving on its own queue; discovery traffic goes to the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::allocation::{AllocationNegotiator, AllocationOutcome, AllocationTracker, CapacityPolicy};
use crate::error::Result;
use crate::heartbeat::{HeartbeatEmitter, StatusSource};
use crate::protocol::{Message, MessageEnvelope};
use crate::transport::{Destination, MessageHandler, Transport};
use crate::types::{ModuleIdentity, ModuleState, ModuleStatus, UserSession};

/// Live identity and state of a node, read on every heartbeat tick
pub struct NodeStatus {
    identity: ModuleIdentity,
    state: RwLock<ModuleState>,
}

impl NodeStatus {
    pub fn new(identity: ModuleIdentity) -> Self {
        Self {
            identity,
            state: RwLock::new(ModuleState::Starting),
        }
    }

    pub fn set_state(&self, state: ModuleState) {
        *self.state.write() = state;
    }

    pub fn state(&self) -> ModuleState {
        *self.state.read()
    }
}

impl StatusSource for NodeStatus {
    fn module_status(&self) -> ModuleStatus {
        ModuleStatus::new(self.identity.clone(), self.state())
    }
}

/// Node settings that come from configuration
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub policy: CapacityPolicy,
    pub heartbeat_interval: Duration,
    pub discovery_topic: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            policy: CapacityPolicy::Unlimited,
            heartbeat_interval: crate::heartbeat::DEFAULT_HEARTBEAT_INTERVAL,
            discovery_topic: "module_status".to_string(),
        }
    }
}

/// A single module instance participating in discovery and allocation
pub struct ModuleNode {
    status: Arc<NodeStatus>,
    negotiator: AllocationNegotiator,
    heartbeat: HeartbeatEmitter,
}

impl ModuleNode {
    pub fn new(identity: ModuleIdentity, settings: NodeSettings, transport: Arc<dyn Transport>) -> Self {
        let status = Arc::new(NodeStatus::new(identity));
        let source: Arc<dyn StatusSource> = status.clone();

        let negotiator = AllocationNegotiator::new(
            Arc::clone(&source),
            Arc::new(AllocationTracker::new()),
            settings.policy,
            Arc::clone(&transport),
        );

        let heartbeat = HeartbeatEmitter::new(
            source,
            transport,
            Destination::topic(settings.discovery_topic),
        )
        .with_interval(settings.heartbeat_interval);

        Self {
            status,
            negotiator,
            heartbeat,
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.status.identity
    }

    pub fn address(&self) -> &str {
        &self.status.identity.address
    }

    pub fn status(&self) -> ModuleStatus {
        self.status.module_status()
    }

    pub fn negotiator(&self) -> &AllocationNegotiator {
        &self.negotiator
    }

    pub fn tracker(&self) -> &Arc<AllocationTracker> {
        self.negotiator.tracker()
    }

    /// Mark the node running and start announcing it
    pub fn start(&self) {
        self.status.set_state(ModuleState::Running);
        self.heartbeat.init();
        info!(
            address = %self.address(),
            module_type = %self.identity().module_type,
            policy = %self.negotiator.policy(),
            "Module node started"
        );
    }

    /// Announce departure and stop the heartbeat.
    ///
    /// The final status carries `ShuttingDown`, which registries treat as a
    /// graceful cancellation rather than a failure.
    pub async fn close(&self) -> Result<()> {
        self.heartbeat.shutdown();
        self.status.set_state(ModuleState::ShuttingDown);

        let result = self.heartbeat.emit_now().await;
        if let Err(ref e) = result {
            warn!(address = %self.address(), error = %e, "Failed to announce shutdown");
        }
        info!(address = %self.address(), "Module node closed");
        result
    }

    /// Claim `target` for `session`
    pub async fn request_allocation(
        &self,
        target: &ModuleStatus,
        session: Option<&UserSession>,
    ) -> Result<AllocationOutcome> {
        self.negotiator.request_allocation(target, session).await
    }

    /// Session teardown
    pub fn release_session(&self, session: &UserSession) -> bool {
        self.negotiator.release_session(session)
    }
}

#[async_trait]
impl MessageHandler for ModuleNode {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        match envelope.payload {
            Message::AllocationRequest(_) => {
                self.negotiator.handle_request(envelope).await?;
            }
            Message::AllocationReply(ref reply) => {
                debug!(address = %self.address(), reply = %reply, "Ignoring unsolicited allocation reply");
            }
            Message::Status(ref status) => {
                debug!(address = %self.address(), from = %status.address(), "Ignoring status sent to module queue");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBus;
    use crate::types::ModuleType;

    fn node(bus: &Arc<LocalBus>, address: &str, module_type: ModuleType, policy: CapacityPolicy) -> Arc<ModuleNode> {
        let settings = NodeSettings {
            policy,
            ..NodeSettings::default()
        };
        let node = Arc::new(ModuleNode::new(
            ModuleIdentity::new(address, address, module_type),
            settings,
            bus.clone(),
        ));
        bus.attach(address, node.clone());
        node
    }

    #[tokio::test]
    async fn test_request_allocation_round_trip() {
        let bus = Arc::new(LocalBus::new());
        let domain = node(&bus, "domain_1", ModuleType::Domain, CapacityPolicy::Unlimited);
        let sensor = node(&bus, "sensor_1", ModuleType::Sensor, CapacityPolicy::SingleTenant);
        let session = UserSession::new(1);

        let outcome = domain
            .request_allocation(&sensor.status(), Some(&session))
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        assert!(sensor.tracker().holds(&session));
        assert_eq!(
            domain.negotiator().allocated_modules(&session)[&ModuleType::Sensor].address(),
            "sensor_1"
        );

        let outcome = domain
            .request_allocation(&sensor.status(), Some(&UserSession::new(2)))
            .await
            .unwrap();
        assert!(!outcome.is_accepted());
    }

    #[tokio::test]
    async fn test_request_to_unknown_target_fails_immediately() {
        let bus = Arc::new(LocalBus::new());
        let domain = node(&bus, "domain_1", ModuleType::Domain, CapacityPolicy::Unlimited);
        let ghost = ModuleStatus::new(
            ModuleIdentity::new("ghost", "ghost_1", ModuleType::Tutor),
            ModuleState::Running,
        );

        let err = domain
            .request_allocation(&ghost, Some(&UserSession::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::UnknownDestination(_)));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let bus = Arc::new(LocalBus::new());
        let lms = node(&bus, "lms_1", ModuleType::Lms, CapacityPolicy::Unlimited);
        assert_eq!(lms.status().state(), ModuleState::Starting);

        lms.start();
        assert_eq!(lms.status().state(), ModuleState::Running);

        // No discovery subscribers: the final announcement still succeeds
        lms.close().await.unwrap();
        assert_eq!(lms.status().state(), ModuleState::ShuttingDown);
    }
}
