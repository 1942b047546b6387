//! Protocol message definitions
//!
//! All payloads relevant to discovery and allocation. Payloads travel inside
//! a [`MessageEnvelope`] that carries the correlation data replies need.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProtocolVersion;
use crate::types::{ModuleStatus, ModuleType, UserSession};

// ─────────────────────────────────────────────────────────────────
// Message Type Taxonomy
// ─────────────────────────────────────────────────────────────────

/// Closed set of message types handled by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Status,
    AllocationRequest,
    AllocationReply,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Status => write!(f, "STATUS"),
            MessageType::AllocationRequest => write!(f, "ALLOCATION_REQUEST"),
            MessageType::AllocationReply => write!(f, "ALLOCATION_REPLY"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Message Envelope
// ─────────────────────────────────────────────────────────────────

/// Wrapper for all payloads with routing and correlation metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique message ID
    pub id: Uuid,

    /// When the sender created the message
    pub timestamp: DateTime<Utc>,

    /// Protocol version
    pub version: ProtocolVersion,

    /// Address replies should be sent to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// ID of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,

    /// The actual payload
    #[serde(flatten)]
    pub payload: Message,
}

impl MessageEnvelope {
    /// Create a new envelope
    pub fn new(payload: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            version: ProtocolVersion::default(),
            reply_to: None,
            in_reply_to: None,
            payload,
        }
    }

    /// Set the address replies should go to
    pub fn with_reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Build a reply to `request`, correlated by its id
    pub fn reply(request: &MessageEnvelope, payload: Message) -> Self {
        let mut envelope = Self::new(payload);
        envelope.in_reply_to = Some(request.id);
        envelope
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Sender time in milliseconds since the Unix epoch
    pub fn sent_time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Whether this envelope answers another one
    pub fn is_reply(&self) -> bool {
        self.in_reply_to.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────
// Payloads (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// All payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Heartbeat snapshot
    Status(ModuleStatus),

    /// Request to claim a module for a session
    AllocationRequest(AllocationRequest),

    /// Answer to an allocation request
    AllocationReply(AllocationReply),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Status(_) => MessageType::Status,
            Message::AllocationRequest(_) => MessageType::AllocationRequest,
            Message::AllocationReply(_) => MessageType::AllocationReply,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Status(status) => write!(f, "STATUS {}", status),
            Message::AllocationRequest(request) => write!(f, "ALLOCATION_REQUEST {}", request),
            Message::AllocationReply(reply) => write!(f, "ALLOCATION_REPLY {}", reply),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Allocation Messages
// ─────────────────────────────────────────────────────────────────

/// Sent by a module that wants to use another module for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// Status of the requesting module
    pub requestor: ModuleStatus,

    /// Session the claim is for; `None` when allocating outside a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<UserSession>,

    /// Modules already allocated to the requester for this session
    #[serde(default)]
    pub allocated_modules: BTreeMap<ModuleType, ModuleStatus>,
}

impl std::fmt::Display for AllocationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[requestor = {}", self.requestor)?;
        match self.session {
            Some(ref session) => write!(f, ", session = {}", session)?,
            None => write!(f, ", session = none")?,
        }
        write!(f, ", allocated = {{")?;
        for (i, module_type) in self.allocated_modules.keys().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", module_type)?;
        }
        write!(f, "}}]")
    }
}

/// Outcome of an allocation request as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationReply {
    /// The module is now claimed for the session
    Accept,

    /// The module refused; carries diagnostics for operators
    Deny {
        reason: String,
        #[serde(default)]
        holders: Vec<UserSession>,
    },
}

impl AllocationReply {
    pub fn is_accept(&self) -> bool {
        matches!(self, AllocationReply::Accept)
    }
}

impl std::fmt::Display for AllocationReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationReply::Accept => write!(f, "ACCEPT"),
            AllocationReply::Deny { reason, holders } => {
                write!(f, "DENY ({}; {} holder(s))", reason, holders.len())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModuleIdentity, ModuleState};

    fn status(address: &str, module_type: ModuleType) -> ModuleStatus {
        ModuleStatus::new(
            ModuleIdentity::new(address, address, module_type),
            ModuleState::Running,
        )
    }

    #[test]
    fn test_message_type_names() {
        let msg = Message::Status(status("tutor_1", ModuleType::Tutor));
        assert_eq!(msg.message_type(), MessageType::Status);
        assert_eq!(MessageType::AllocationReply.to_string(), "ALLOCATION_REPLY");
    }

    #[test]
    fn test_envelope_serializes_type_tag() {
        let envelope = MessageEnvelope::new(Message::Status(status("ped_1", ModuleType::Pedagogical)));
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"type\":\"STATUS\""));
        assert!(!json.contains("in_reply_to"));
    }

    #[test]
    fn test_reply_correlates_to_request() {
        let request = MessageEnvelope::new(Message::AllocationRequest(AllocationRequest {
            requestor: status("domain_1", ModuleType::Domain),
            session: Some(UserSession::new(1)),
            allocated_modules: BTreeMap::new(),
        }))
        .with_reply_to("domain_1");

        let reply = MessageEnvelope::reply(&request, Message::AllocationReply(AllocationReply::Accept));
        assert_eq!(reply.in_reply_to, Some(request.id));
        assert!(reply.is_reply());
        assert!(!request.is_reply());
    }

    #[test]
    fn test_deny_parses_with_holders() {
        let json = r#"{"outcome":"DENY","reason":"full","holders":[{"user_id":4}]}"#;
        let reply: AllocationReply = serde_json::from_str(json).unwrap();
        match reply {
            AllocationReply::Deny { reason, holders } => {
                assert_eq!(reason, "full");
                assert_eq!(holders[0].user_id, 4);
            }
            _ => panic!("Expected Deny"),
        }
    }

    #[test]
    fn test_request_display_lists_allocated_types() {
        let mut allocated = BTreeMap::new();
        allocated.insert(ModuleType::Ums, status("ums_1", ModuleType::Ums));
        allocated.insert(ModuleType::Lms, status("lms_1", ModuleType::Lms));
        let request = AllocationRequest {
            requestor: status("tutor_1", ModuleType::Tutor),
            session: None,
            allocated_modules: allocated,
        };

        let text = request.to_string();
        assert!(text.contains("session = none"));
        assert!(text.contains("ums"));
        assert!(text.contains("lms"));
    }
}
