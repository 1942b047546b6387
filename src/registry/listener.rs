//! Registry observers
//!
//! Listeners are kept in a copy-on-write list: delivery iterates a snapshot,
//! so adding or removing a listener never races with a notification in
//! flight. Each callback is isolated; an `Err` or a panic is logged and the
//! remaining listeners still run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::{RemovalReason, StatusRecord};
use crate::types::ModuleStatus;

/// Observer of registry transitions
pub trait ModuleStatusListener: Send + Sync {
    /// First status seen for an address
    fn module_status_added(&self, _sent_time_ms: i64, _status: &ModuleStatus) -> anyhow::Result<()> {
        Ok(())
    }

    /// Any later status for a known address
    fn module_status_changed(&self, _sent_time_ms: i64, _status: &ModuleStatus) -> anyhow::Result<()> {
        Ok(())
    }

    /// The address left the registry; see [`StatusRecord::removal_reason`]
    fn module_status_removed(&self, _record: &StatusRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Listener Set
// ─────────────────────────────────────────────────────────────────

pub(crate) struct ListenerSet {
    listeners: RwLock<Arc<Vec<Arc<dyn ModuleStatusListener>>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn add(&self, listener: Arc<dyn ModuleStatusListener>) {
        let mut guard = self.listeners.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(listener);
        *guard = Arc::new(next);
    }

    pub fn remove(&self, listener: &Arc<dyn ModuleStatusListener>) -> bool {
        let mut guard = self.listeners.write();
        let before = guard.len();
        let next: Vec<_> = guard
            .iter()
            .filter(|l| !Arc::ptr_eq(l, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *guard = Arc::new(next);
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn ModuleStatusListener>>> {
        Arc::clone(&self.listeners.read())
    }

    pub fn added(&self, sent_time_ms: i64, status: &ModuleStatus) {
        self.deliver("added", status.address(), |l| l.module_status_added(sent_time_ms, status));
    }

    pub fn changed(&self, sent_time_ms: i64, status: &ModuleStatus) {
        self.deliver("changed", status.address(), |l| {
            l.module_status_changed(sent_time_ms, status)
        });
    }

    pub fn removed(&self, record: &StatusRecord) {
        self.deliver("removed", record.address(), |l| l.module_status_removed(record));
    }

    fn deliver<F>(&self, event: &'static str, address: &str, notify: F)
    where
        F: Fn(&dyn ModuleStatusListener) -> anyhow::Result<()>,
    {
        for listener in self.snapshot().iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| notify(listener.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event, address = %address, error = %e, "Module status listener failed");
                }
                Err(payload) => {
                    error!(
                        event,
                        address = %address,
                        panic = %panic_message(payload.as_ref()),
                        "Module status listener panicked"
                    );
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────
// Logging Listener
// ─────────────────────────────────────────────────────────────────

/// Writes every registry transition to the log
#[derive(Debug, Default)]
pub struct LoggingListener;

impl ModuleStatusListener for LoggingListener {
    fn module_status_added(&self, sent_time_ms: i64, status: &ModuleStatus) -> anyhow::Result<()> {
        info!(
            address = %status.address(),
            module_type = %status.module_type(),
            state = %status.state(),
            sent_time_ms,
            "Discovered module"
        );
        Ok(())
    }

    fn module_status_changed(&self, _sent_time_ms: i64, status: &ModuleStatus) -> anyhow::Result<()> {
        tracing::trace!(address = %status.address(), state = %status.state(), "Module status updated");
        Ok(())
    }

    fn module_status_removed(&self, record: &StatusRecord) -> anyhow::Result<()> {
        match record.removal_reason() {
            Some(RemovalReason::Cancelled) => info!(
                address = %record.address(),
                module_type = %record.status().module_type(),
                "Module departed"
            ),
            _ => warn!(
                address = %record.address(),
                module_type = %record.status().module_type(),
                silent_ms = record.timeout_value().as_millis() as u64,
                "Module lost"
            ),
        }
        Ok(())
    }
}
