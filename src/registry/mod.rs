//! Module registry
//!
//! Central table of the last known status of every module instance,
//! partitioned by module type and keyed by address. A single periodic sweep
//! removes entries that went silent for longer than the timeout threshold,
//! or whose monitoring was cancelled.
//!
//! Per address the lifecycle is `unseen -> active -> removed`: `added` fires
//! on the first receipt, `changed` on every later one, and `removed` exactly
//! once, labelled either timed out or cancelled.

mod listener;
mod record;

pub use listener::*;
pub use record::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::protocol::{Message, MessageEnvelope};
use crate::transport::MessageHandler;
use crate::types::{ModuleState, ModuleStatus, ModuleType};

/// Default time between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(5000);

type StatusTable = HashMap<String, StatusRecord>;

/// Registry of live module instances
pub struct ModuleRegistry {
    tables: RwLock<HashMap<ModuleType, StatusTable>>,
    listeners: ListenerSet,

    /// Serializes notification delivery so listeners observe transitions
    /// in the order they were applied. Reentrant so a listener may call
    /// back into the registry.
    delivery: ReentrantMutex<()>,

    timeout: Duration,
    sweep_interval: Duration,
    running: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ModuleRegistry {
    /// Create a registry that times entries out after `timeout` of silence
    pub fn new(timeout: Duration) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            listeners: ListenerSet::new(),
            delivery: ReentrantMutex::new(()),
            timeout,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            running: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Start the shared sweep task. Calling it again while running is a no-op.
    pub fn init(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be stale yet
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.sweep();
                    }
                    None => break,
                }
            }
        });

        *self.sweeper.lock() = Some(handle);
        info!(
            timeout_ms = self.timeout.as_millis() as u64,
            sweep_interval_ms = self.sweep_interval.as_millis() as u64,
            "Module registry started"
        );
    }

    /// Stop the sweep task. Entries are kept.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        info!("Module registry closed");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────
    // Listeners
    // ─────────────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn ModuleStatusListener>) {
        self.listeners.add(listener);
    }

    /// Returns whether the listener was registered
    pub fn remove_listener(&self, listener: &Arc<dyn ModuleStatusListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ─────────────────────────────────────────────────────────────
    // Receipt
    // ─────────────────────────────────────────────────────────────

    /// Record a status received now
    pub fn receive(&self, status: ModuleStatus, sent_time_ms: i64) {
        self.receive_at(status, sent_time_ms, Instant::now());
    }

    /// Record a status received at `received`
    pub fn receive_at(&self, status: ModuleStatus, sent_time_ms: i64, received: Instant) {
        let _delivery = self.delivery.lock();

        let is_new = {
            let mut tables = self.tables.write();
            let table = tables.entry(status.module_type()).or_default();
            match table.get_mut(status.address()) {
                Some(record) => {
                    record.update(status.clone(), sent_time_ms, received);
                    false
                }
                None => {
                    table.insert(
                        status.address().to_string(),
                        StatusRecord::new(status.clone(), sent_time_ms, received),
                    );
                    true
                }
            }
        };

        if is_new {
            debug!(address = %status.address(), module_type = %status.module_type(), "Status record created");
            self.listeners.added(sent_time_ms, &status);
        } else {
            self.listeners.changed(sent_time_ms, &status);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────

    /// Mark the record for `status` as gracefully departing. The next sweep
    /// removes it and reports the removal as cancelled.
    ///
    /// Returns false when no record exists, which includes the case where a
    /// sweep already removed it as timed out.
    pub fn cancel(&self, status: &ModuleStatus) -> bool {
        let mut tables = self.tables.write();
        let record = tables
            .get_mut(&status.module_type())
            .and_then(|table| table.get_mut(status.address()));

        match record {
            Some(record) => {
                record.cancel();
                info!(address = %status.address(), "Module status monitoring cancelled");
                true
            }
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Sweep
    // ─────────────────────────────────────────────────────────────

    /// Run one sweep against the current time
    pub fn sweep(&self) -> Vec<StatusRecord> {
        self.sweep_at(Instant::now())
    }

    /// Remove every record that is cancelled or silent for longer than the
    /// timeout as of `now`, notify `removed` for each, and return them.
    pub fn sweep_at(&self, now: Instant) -> Vec<StatusRecord> {
        let _delivery = self.delivery.lock();

        let removed = {
            let mut tables = self.tables.write();
            let mut removed = Vec::new();

            for table in tables.values_mut() {
                let expired: Vec<String> = table
                    .iter()
                    .filter(|(_, r)| r.is_cancelled() || r.silence(now) > self.timeout)
                    .map(|(address, _)| address.clone())
                    .collect();

                for address in expired {
                    if let Some(mut record) = table.remove(&address) {
                        let reason = if record.is_cancelled() {
                            RemovalReason::Cancelled
                        } else {
                            RemovalReason::TimedOut
                        };
                        record.mark_removed(now, reason);
                        removed.push(record);
                    }
                }
            }

            tables.retain(|_, table| !table.is_empty());
            removed
        };

        for record in &removed {
            match record.removal_reason() {
                Some(RemovalReason::Cancelled) => info!(
                    address = %record.address(),
                    "Module status monitoring gracefully ended"
                ),
                _ => warn!(
                    address = %record.address(),
                    module_type = %record.status().module_type(),
                    silent_ms = record.timeout_value().as_millis() as u64,
                    "Module timed out"
                ),
            }
            self.listeners.removed(record);
        }

        removed
    }

    // ─────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────

    /// Copies of every live status of `module_type`, ordered by address
    pub fn get_all(&self, module_type: ModuleType) -> Vec<ModuleStatus> {
        let mut statuses: Vec<ModuleStatus> = self
            .tables
            .read()
            .get(&module_type)
            .map(|table| table.values().map(|r| r.status().clone()).collect())
            .unwrap_or_default();
        statuses.sort_by(|a, b| a.address().cmp(b.address()));
        statuses
    }

    /// Copy of the live status at `address`
    pub fn get_one(&self, module_type: ModuleType, address: &str) -> Option<ModuleStatus> {
        self.tables
            .read()
            .get(&module_type)
            .and_then(|table| table.get(address))
            .map(|r| r.status().clone())
    }

    /// Copy of the full record at `address`
    pub fn record(&self, module_type: ModuleType, address: &str) -> Option<StatusRecord> {
        self.tables
            .read()
            .get(&module_type)
            .and_then(|table| table.get(address))
            .cloned()
    }

    /// Number of live entries across all types
    pub fn len(&self) -> usize {
        self.tables.read().values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Discovery topic subscriber: feeds STATUS messages into the registry.
/// A module announcing `ShuttingDown` is cancelled so its removal is graceful.
#[async_trait]
impl MessageHandler for ModuleRegistry {
    async fn handle(&self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let sent_time_ms = envelope.sent_time_ms();
        match envelope.payload {
            Message::Status(status) => {
                let departing = status.state() == ModuleState::ShuttingDown;
                let snapshot = departing.then(|| status.clone());
                self.receive(status, sent_time_ms);
                if let Some(status) = snapshot {
                    self.cancel(&status);
                }
                Ok(())
            }
            other => {
                debug!(message_type = %other.message_type(), "Registry ignoring non-status message");
                Ok(())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
