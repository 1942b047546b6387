//! Per-address liveness record

use std::time::Duration;

use tokio::time::Instant;

use crate::types::{ModuleState, ModuleStatus};

/// Why a record left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// No status arrived within the timeout threshold
    TimedOut,

    /// Monitoring was cancelled; a graceful departure
    Cancelled,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalReason::TimedOut => write!(f, "timed out"),
            RemovalReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Last known status of one module instance, owned by the registry
#[derive(Debug, Clone)]
pub struct StatusRecord {
    status: ModuleStatus,

    /// Sender clock, milliseconds since the Unix epoch
    sent_time_ms: i64,

    /// Local receipt time of the latest status
    last_received: Instant,

    /// Silence observed when the record was removed; zero while live
    timeout_value: Duration,

    cancelled: bool,

    removal: Option<RemovalReason>,
}

impl StatusRecord {
    pub(crate) fn new(status: ModuleStatus, sent_time_ms: i64, received: Instant) -> Self {
        Self {
            status,
            sent_time_ms,
            last_received: received,
            timeout_value: Duration::ZERO,
            cancelled: false,
            removal: None,
        }
    }

    /// Apply a newer status. A module heard from again in any state other
    /// than `ShuttingDown` is live, so a pending cancellation is withdrawn.
    pub(crate) fn update(&mut self, status: ModuleStatus, sent_time_ms: i64, received: Instant) {
        if status.state() != ModuleState::ShuttingDown {
            self.cancelled = false;
        }
        self.status = status;
        self.sent_time_ms = sent_time_ms;
        self.last_received = received;
    }

    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Silence since the last receipt as of `now`
    pub(crate) fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    pub(crate) fn mark_removed(&mut self, now: Instant, reason: RemovalReason) {
        self.timeout_value = self.silence(now);
        self.removal = Some(reason);
    }

    pub fn status(&self) -> &ModuleStatus {
        &self.status
    }

    pub fn address(&self) -> &str {
        self.status.address()
    }

    pub fn sent_time_ms(&self) -> i64 {
        self.sent_time_ms
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    pub fn timeout_value(&self) -> Duration {
        self.timeout_value
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Set only on records handed to `removed` listeners
    pub fn removal_reason(&self) -> Option<RemovalReason> {
        self.removal
    }
}

impl std::fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[StatusRecord: sent = {}, timeout = {}ms, cancelled = {}, status = {}]",
            self.sent_time_ms,
            self.timeout_value.as_millis(),
            self.cancelled,
            self.status
        )
    }
}
