//! Allocation negotiation
//!
//! Both sides of the request/reply exchange that lets one module claim
//! another on behalf of a session. As the candidate, a module decides under
//! its tracker lock: it accepts when the session already holds a claim or
//! the module is not at capacity, and denies otherwise with a reason that
//! names the current holders. As the requester, a module sends the request
//! through the correlator and records accepted modules per session.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{AllocationTracker, CapacityPolicy};
use crate::correlator;
use crate::error::{Error, Result};
use crate::heartbeat::StatusSource;
use crate::protocol::{AllocationReply, AllocationRequest, Message, MessageEnvelope};
use crate::transport::{Destination, Transport};
use crate::types::{ModuleStatus, ModuleType, SessionKey, UserSession};

/// Base text of every capacity denial
pub const FULLY_ALLOCATED_REASON: &str =
    "This module can't be allocated to another user because it is fully allocated already.";

/// Modules claimed for one session, by type
pub type AllocatedModules = BTreeMap<ModuleType, ModuleStatus>;

/// Requester-side view of a negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    Accepted,
    Denied {
        reason: String,
        holders: Vec<UserSession>,
    },
}

impl AllocationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AllocationOutcome::Accepted)
    }
}

impl From<AllocationReply> for AllocationOutcome {
    fn from(reply: AllocationReply) -> Self {
        match reply {
            AllocationReply::Accept => AllocationOutcome::Accepted,
            AllocationReply::Deny { reason, holders } => AllocationOutcome::Denied { reason, holders },
        }
    }
}

/// Negotiates allocations for one module instance
pub struct AllocationNegotiator {
    source: Arc<dyn StatusSource>,
    tracker: Arc<AllocationTracker>,
    policy: CapacityPolicy,
    transport: Arc<dyn Transport>,
    allocated: RwLock<HashMap<SessionKey, AllocatedModules>>,
}

impl AllocationNegotiator {
    pub fn new(
        source: Arc<dyn StatusSource>,
        tracker: Arc<AllocationTracker>,
        policy: CapacityPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            source,
            tracker,
            policy,
            transport,
            allocated: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    pub fn tracker(&self) -> &Arc<AllocationTracker> {
        &self.tracker
    }

    // ─────────────────────────────────────────────────────────────
    // Candidate Side
    // ─────────────────────────────────────────────────────────────

    /// Decide on an allocation request.
    ///
    /// The session's module set stays write-locked for the whole decision,
    /// and the claim check, capacity evaluation and claim insert happen under
    /// the tracker lock inside it. Concurrent requests for the same module
    /// are therefore decided one at a time. Lock order is module sets, then
    /// tracker.
    pub fn decide(&self, request: &AllocationRequest) -> AllocationReply {
        let me = self.source.module_status();

        let Some(ref session) = request.session else {
            debug!(requestor = %request.requestor.address(), "Accepting allocation outside a session");
            return AllocationReply::Accept;
        };

        let mut allocated = self.allocated.write();
        let plan = plan_merge(&me, allocated.get(&session.key()), &request.allocated_modules);

        let decision = self.tracker.with_lock(|status| {
            let already_held = status.holds(session);
            let full = self.policy.is_full(status);
            status.set_fully_allocated(full);

            if !already_held {
                // Conflicts only block a session that has no claim yet
                if let Some(conflict) = plan.conflicts.first() {
                    return Decision::Conflict(conflict.clone());
                }
                if full {
                    return Decision::Full(status.holders());
                }
            }

            status.add_session(session);
            status.set_fully_allocated(self.policy.is_full(status));
            Decision::Accept { already_held }
        });

        match decision {
            Decision::Accept { already_held } => {
                for conflict in &plan.conflicts {
                    warn!(
                        session = %session,
                        conflict = %conflict,
                        "Keeping recorded module for held session"
                    );
                }
                if !plan.adopted.is_empty() {
                    let set = allocated.entry(session.key()).or_default();
                    for (module_type, status) in plan.adopted {
                        debug!(module_type = %module_type, address = %status.address(), "Using same module as requester");
                        set.entry(module_type).or_insert(status);
                    }
                }
                info!(
                    requestor = %request.requestor.address(),
                    session = %session,
                    already_held,
                    "Allocated module"
                );
                AllocationReply::Accept
            }
            Decision::Conflict(conflict) => {
                warn!(
                    requestor = %request.requestor.address(),
                    session = %session,
                    conflict = %conflict,
                    "Rejecting allocation with conflicting module set"
                );
                AllocationReply::Deny {
                    reason: format!(
                        "Module should be able to satisfy request but failed to do so: {}",
                        conflict
                    ),
                    holders: self.tracker.holders(),
                }
            }
            Decision::Full(holders) => {
                info!(
                    requestor = %request.requestor.address(),
                    session = %session,
                    holders = holders.len(),
                    "Not able to allocate this module"
                );
                AllocationReply::Deny {
                    reason: deny_reason(&holders),
                    holders,
                }
            }
        }
    }

    /// Handle an inbound ALLOCATION_REQUEST and send the reply
    pub async fn handle_request(&self, envelope: MessageEnvelope) -> Result<()> {
        let request = match envelope.payload {
            Message::AllocationRequest(ref request) => request,
            ref other => {
                return Err(Error::UnexpectedPayload {
                    expected: "ALLOCATION_REQUEST".to_string(),
                    actual: other.message_type().to_string(),
                })
            }
        };

        let reply = self.decide(request);

        let Some(ref reply_to) = envelope.reply_to else {
            warn!(message_id = %envelope.id, "Allocation request without reply address, reply dropped");
            return Ok(());
        };

        let response = MessageEnvelope::reply(&envelope, Message::AllocationReply(reply));
        self.transport
            .send(&Destination::queue(reply_to.as_str()), response, None)
            .await
    }

    // ─────────────────────────────────────────────────────────────
    // Requester Side
    // ─────────────────────────────────────────────────────────────

    /// Ask `target` to allocate itself to `session`.
    ///
    /// Denial is an outcome, not an error. Errors are transport or protocol
    /// failures reported through the correlator.
    pub async fn request_allocation(
        &self,
        target: &ModuleStatus,
        session: Option<&UserSession>,
    ) -> Result<AllocationOutcome> {
        let me = self.source.module_status();
        let request = AllocationRequest {
            requestor: me.clone(),
            session: session.cloned(),
            allocated_modules: session.map(|s| self.allocated_modules(s)).unwrap_or_default(),
        };

        let envelope =
            MessageEnvelope::new(Message::AllocationRequest(request)).with_reply_to(me.address());
        debug!(target = %target.address(), request_id = %envelope.id, "Sending allocation request");

        let reply = correlator::request(
            self.transport.as_ref(),
            &Destination::queue(target.address()),
            envelope,
        )
        .await?;

        let outcome = match reply.payload {
            Message::AllocationReply(reply) => AllocationOutcome::from(reply),
            other => {
                return Err(Error::UnexpectedPayload {
                    expected: "ALLOCATION_REPLY".to_string(),
                    actual: other.message_type().to_string(),
                })
            }
        };

        match outcome {
            AllocationOutcome::Accepted => {
                if let Some(session) = session {
                    self.allocated
                        .write()
                        .entry(session.key())
                        .or_default()
                        .insert(target.module_type(), target.clone());
                }
                info!(target = %target.address(), "Allocation accepted");
            }
            AllocationOutcome::Denied { ref reason, .. } => {
                info!(target = %target.address(), reason = %reason, "Allocation denied");
            }
        }

        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────
    // Session Teardown
    // ─────────────────────────────────────────────────────────────

    /// Drop the claim and module set held for `session`.
    /// Returns whether a claim was removed.
    pub fn release_session(&self, session: &UserSession) -> bool {
        let mut allocated = self.allocated.write();
        let removed = self.tracker.with_lock(|status| {
            let removed = status.remove_session(session);
            status.set_fully_allocated(self.policy.is_full(status));
            removed
        });
        allocated.remove(&session.key());
        drop(allocated);

        if removed {
            info!(session = %session, "Released session");
        }
        removed
    }

    /// Modules recorded for `session`
    pub fn allocated_modules(&self, session: &UserSession) -> AllocatedModules {
        self.allocated
            .read()
            .get(&session.key())
            .cloned()
            .unwrap_or_default()
    }
}

enum Decision {
    Accept { already_held: bool },
    Conflict(String),
    Full(Vec<UserSession>),
}

#[derive(Default)]
struct MergePlan {
    adopted: AllocatedModules,
    conflicts: Vec<String>,
}

/// Split the requester's module set into entries to adopt and conflicts.
///
/// Entries of this module's own type are skipped. An entry whose type is
/// already recorded for the session at a different address is a conflict.
fn plan_merge(me: &ModuleStatus, current: Option<&AllocatedModules>, offered: &AllocatedModules) -> MergePlan {
    let mut plan = MergePlan::default();

    for (module_type, status) in offered {
        if *module_type == me.module_type() {
            continue;
        }
        match current.and_then(|set| set.get(module_type)) {
            Some(existing) if existing.address() != status.address() => {
                plan.conflicts.push(format!(
                    "session already uses {} at {}, request offered {}",
                    module_type,
                    existing.address(),
                    status.address()
                ));
            }
            Some(_) => {}
            None => {
                plan.adopted.insert(*module_type, status.clone());
            }
        }
    }

    plan
}

fn deny_reason(holders: &[UserSession]) -> String {
    let mut reason = FULLY_ALLOCATED_REASON.to_string();
    if !holders.is_empty() {
        reason.push_str("\nThe following user sessions are using this module: {\n");
        for holder in holders {
            reason.push_str(&holder.to_string());
            reason.push('\n');
        }
        reason.push('}');
    }
    reason
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
