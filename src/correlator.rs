//! Async reply correlator
//!
//! Turns the transport's send-plus-callback style into a single future. The
//! callback side and the awaiting side share one [`Correlation`] whose
//! atomic `resolved` guard lets exactly one outcome through:
//!
//! - the first reply is held until the transport reports the exchange
//!   complete, then resolves the future with it
//! - a second, distinct reply while still pending resolves with
//!   [`Error::DuplicateReply`]; after resolution it is logged and counted
//! - a transport failure, or a send error, resolves with that failure
//!
//! There is no cancellation or timeout here; both belong to the transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::MessageEnvelope;
use crate::transport::{Destination, ReplyEvent, ReplyHandler, Transport};

// ─────────────────────────────────────────────────────────────────
// Correlation State
// ─────────────────────────────────────────────────────────────────

struct Correlation {
    request_id: Uuid,
    resolved: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Result<MessageEnvelope>>>>,
    first: Mutex<Option<MessageEnvelope>>,
    first_id: Mutex<Option<Uuid>>,
    violations: AtomicU64,
    // Set while `send_request` awaits the transport; a send error then
    // takes precedence over the dropped handler
    in_flight: AtomicBool,
    handler_dropped: AtomicBool,
}

impl Correlation {
    fn new(request_id: Uuid, sender: oneshot::Sender<Result<MessageEnvelope>>) -> Self {
        Self {
            request_id,
            resolved: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            first: Mutex::new(None),
            first_id: Mutex::new(None),
            violations: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            handler_dropped: AtomicBool::new(false),
        }
    }

    /// Returns false if an outcome was already delivered
    fn resolve(&self, outcome: Result<MessageEnvelope>) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if let Some(tx) = self.sender.lock().take() {
            // The awaiting side may have gone away; nothing to report to
            let _ = tx.send(outcome);
        }
        true
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }

    fn close_unresolved(&self) {
        if !self.is_resolved() {
            self.resolve(Err(Error::ChannelClosed(format!(
                "reply handler for request {} dropped",
                self.request_id
            ))));
        }
    }

    fn on_event(&self, event: ReplyEvent) {
        match event {
            ReplyEvent::Received(reply) => self.on_reply(reply),
            ReplyEvent::Completed => {
                if self.is_resolved() {
                    return;
                }
                match self.first.lock().take() {
                    Some(reply) => {
                        self.resolve(Ok(reply));
                    }
                    None => {
                        self.resolve(Err(Error::MissingReply {
                            request_id: self.request_id.to_string(),
                        }));
                    }
                }
            }
            ReplyEvent::Failed(reason) => {
                if self.resolve(Err(Error::ReplyFailed {
                    request_id: self.request_id.to_string(),
                    reason: reason.clone(),
                })) {
                    warn!(request_id = %self.request_id, reason = %reason, "Request failed in transport");
                }
            }
        }
    }

    fn on_reply(&self, reply: MessageEnvelope) {
        {
            let mut first_id = self.first_id.lock();
            match *first_id {
                None => {
                    *first_id = Some(reply.id);
                    *self.first.lock() = Some(reply);
                    return;
                }
                // At-least-once delivery may hand us the same reply twice
                Some(id) if id == reply.id => {
                    debug!(request_id = %self.request_id, reply_id = %reply.id, "Ignoring redelivered reply");
                    return;
                }
                Some(_) => {}
            }
        }

        self.violations.fetch_add(1, Ordering::SeqCst);
        warn!(
            request_id = %self.request_id,
            reply_id = %reply.id,
            reply = %reply.payload,
            "A second reply was received"
        );

        self.first.lock().take();
        self.resolve(Err(Error::DuplicateReply {
            request_id: self.request_id.to_string(),
            reply: reply.payload.to_string(),
        }));
    }
}

/// Drops after a transport discards the handler without finishing the
/// exchange; resolves the waiter instead of leaving it hanging.
struct HandlerGuard(Arc<Correlation>);

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.0.handler_dropped.store(true, Ordering::SeqCst);
        if !self.0.in_flight.load(Ordering::SeqCst) {
            self.0.close_unresolved();
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────

/// The awaiting half of a correlation
pub struct PendingReply {
    correlation: Arc<Correlation>,
    rx: oneshot::Receiver<Result<MessageEnvelope>>,
}

impl PendingReply {
    pub fn request_id(&self) -> Uuid {
        self.correlation.request_id
    }

    /// Resolve with `error` unless something already resolved
    pub fn fail(&self, error: Error) -> bool {
        self.correlation.resolve(Err(error))
    }

    pub fn is_resolved(&self) -> bool {
        self.correlation.is_resolved()
    }

    /// Duplicate replies seen so far
    pub fn protocol_violations(&self) -> u64 {
        self.correlation.violations.load(Ordering::SeqCst)
    }

    /// A cloneable view that outlives the wait
    pub fn monitor(&self) -> ReplyMonitor {
        ReplyMonitor {
            correlation: Arc::clone(&self.correlation),
        }
    }

    /// Wait for the single outcome
    pub async fn wait(self) -> Result<MessageEnvelope> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ChannelClosed(format!(
                "reply channel for request {} closed",
                self.correlation.request_id
            ))),
        }
    }
}

/// Observes a correlation after its outcome was consumed
#[derive(Clone)]
pub struct ReplyMonitor {
    correlation: Arc<Correlation>,
}

impl ReplyMonitor {
    pub fn protocol_violations(&self) -> u64 {
        self.correlation.violations.load(Ordering::SeqCst)
    }

    pub fn is_resolved(&self) -> bool {
        self.correlation.is_resolved()
    }
}

/// Create a reply handler for `request_id` and the future it resolves
pub fn correlate(request_id: Uuid) -> (ReplyHandler, PendingReply) {
    let (tx, rx) = oneshot::channel();
    let correlation = Arc::new(Correlation::new(request_id, tx));

    let guard = HandlerGuard(Arc::clone(&correlation));
    let handler: ReplyHandler = Box::new(move |event| guard.0.on_event(event));

    (handler, PendingReply { correlation, rx })
}

/// Send `envelope` and return the future for its single reply.
///
/// A send error resolves the future immediately with that error.
pub async fn send_request(
    transport: &dyn Transport,
    destination: &Destination,
    envelope: MessageEnvelope,
) -> PendingReply {
    let (handler, pending) = correlate(envelope.id);
    let message_type = envelope.message_type();
    let correlation = Arc::clone(&pending.correlation);

    correlation.in_flight.store(true, Ordering::SeqCst);
    let sent = transport.send(destination, envelope, Some(handler)).await;
    correlation.in_flight.store(false, Ordering::SeqCst);

    match sent {
        Err(e) => {
            debug!(
                destination = %destination,
                message_type = %message_type,
                error = %e,
                "Request send failed"
            );
            pending.fail(e);
        }
        Ok(()) if correlation.handler_dropped.load(Ordering::SeqCst) => {
            correlation.close_unresolved();
        }
        Ok(()) => {}
    }

    pending
}

/// [`send_request`] and wait for the outcome
pub async fn request(
    transport: &dyn Transport,
    destination: &Destination,
    envelope: MessageEnvelope,
) -> Result<MessageEnvelope> {
    send_request(transport, destination, envelope).await.wait().await
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
