//! Message transport seam
//!
//! The core only depends on two things from a transport:
//! - `send(destination, envelope, on_reply)` for queue and topic addressing
//! - a dispatch callback invoked for every envelope that arrives
//!
//! [`LocalBus`] is the in-process implementation used by the binary and the
//! tests. Networked transports implement the same [`Transport`] trait.

pub mod local;

pub use local::*;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::protocol::{MessageEnvelope, PROTOCOL_VERSION};

// ─────────────────────────────────────────────────────────────────
// Addressing
// ─────────────────────────────────────────────────────────────────

/// Where a message goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Point-to-point, one consumer (a module's inbox)
    Queue(String),

    /// Broadcast to every subscriber (discovery)
    Topic(String),
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination::Queue(name.into())
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Destination::Topic(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue://{}", name),
            Destination::Topic(name) => write!(f, "topic://{}", name),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Reply Callbacks
// ─────────────────────────────────────────────────────────────────

/// What a transport reports back about a request it carried
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// A reply referencing the request arrived
    Received(MessageEnvelope),

    /// The exchange is over; no further replies will be delivered
    Completed,

    /// The exchange failed after the send was accepted
    Failed(String),
}

/// Callback-style reply sink handed to [`Transport::send`]
pub type ReplyHandler = Box<dyn FnMut(ReplyEvent) + Send>;

// ─────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────

/// Outbound side of a transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand `envelope` to the transport for delivery to `destination`.
    ///
    /// An `Err` means the message was not accepted; `on_reply` will not be
    /// invoked in that case.
    async fn send(
        &self,
        destination: &Destination,
        envelope: MessageEnvelope,
        on_reply: Option<ReplyHandler>,
    ) -> Result<()>;
}

/// Inbound side: invoked once per delivered envelope, in receipt order
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────────────────────────
// Dispatch Loop
// ─────────────────────────────────────────────────────────────────

/// Drain `inbox` into `handler` one envelope at a time.
///
/// Envelopes from an incompatible protocol major version are dropped. Handler
/// errors are logged and never stop the loop.
/// Reject an envelope whose major protocol version differs from ours
pub fn check_version(envelope: &MessageEnvelope) -> Result<()> {
    if envelope.version.is_compatible_with(&PROTOCOL_VERSION) {
        Ok(())
    } else {
        Err(Error::ProtocolVersion {
            expected: PROTOCOL_VERSION.to_string(),
            actual: envelope.version.to_string(),
        })
    }
}

pub fn spawn_dispatch(
    name: String,
    mut inbox: mpsc::Receiver<MessageEnvelope>,
    handler: Arc<dyn MessageHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(inbox = %name, "Dispatch loop started");

        while let Some(envelope) = inbox.recv().await {
            if let Err(e) = check_version(&envelope) {
                warn!(
                    inbox = %name,
                    message_id = %envelope.id,
                    error = %e.format_for_log(),
                    "Dropping message"
                );
                continue;
            }

            let message_type = envelope.message_type();
            let message_id = envelope.id;
            if let Err(e) = handler.handle(envelope).await {
                error!(
                    inbox = %name,
                    message_id = %message_id,
                    message_type = %message_type,
                    error = %e,
                    "Message handler failed"
                );
            }
        }

        debug!(inbox = %name, "Dispatch loop ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::queue("tutor_1").to_string(), "queue://tutor_1");
        assert_eq!(Destination::topic("module_status").to_string(), "topic://module_status");
        assert_eq!(Destination::topic("module_status").name(), "module_status");
    }

    #[test]
    fn test_check_version() {
        use crate::error::ErrorCode;
        use crate::protocol::{Message, ProtocolVersion};
        use crate::types::{ModuleIdentity, ModuleState, ModuleStatus, ModuleType};

        let status = ModuleStatus::new(
            ModuleIdentity::new("Tutor", "tutor_1", ModuleType::Tutor),
            ModuleState::Running,
        );
        let mut envelope = MessageEnvelope::new(Message::Status(status));
        assert!(check_version(&envelope).is_ok());

        envelope.version = ProtocolVersion::new(PROTOCOL_VERSION.major, PROTOCOL_VERSION.minor + 1);
        assert!(check_version(&envelope).is_ok());

        envelope.version = ProtocolVersion::new(PROTOCOL_VERSION.major + 1, 0);
        let err = check_version(&envelope).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolVersion);
        assert!(err.format_for_log().starts_with("[E400]"));
        assert!(err.to_string().contains(&envelope.version.to_string()));
    }

    struct Counting(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _envelope: MessageEnvelope) -> anyhow::Result<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_drops_incompatible_version() {
        use crate::protocol::{Message, ProtocolVersion};
        use crate::types::{ModuleIdentity, ModuleState, ModuleStatus, ModuleType};

        let status = ModuleStatus::new(
            ModuleIdentity::new("Tutor", "tutor_1", ModuleType::Tutor),
            ModuleState::Running,
        );
        let mut stale = MessageEnvelope::new(Message::Status(status.clone()));
        stale.version = ProtocolVersion::new(PROTOCOL_VERSION.major + 1, 0);

        let handler = Arc::new(Counting(std::sync::atomic::AtomicUsize::new(0)));
        let (tx, rx) = mpsc::channel(4);
        let task = spawn_dispatch("tutor_1".into(), rx, handler.clone());

        tx.send(stale).await.unwrap();
        tx.send(MessageEnvelope::new(Message::Status(status))).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(handler.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
