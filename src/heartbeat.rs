//! Heartbeat emitter
//!
//! Periodically announces a module's status on the discovery topic. Each
//! tick is independent: a failed send is logged and the next tick proceeds
//! as normal. Retrying belongs to the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{Message, MessageEnvelope};
use crate::transport::{Destination, Transport};
use crate::types::ModuleStatus;

/// Default time between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Produces the snapshot sent on each tick
pub trait StatusSource: Send + Sync {
    fn module_status(&self) -> ModuleStatus;
}

/// Fixed-interval status announcer for one module instance
pub struct HeartbeatEmitter {
    source: Arc<dyn StatusSource>,
    transport: Arc<dyn Transport>,
    destination: Destination,
    interval: Duration,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatEmitter {
    pub fn new(
        source: Arc<dyn StatusSource>,
        transport: Arc<dyn Transport>,
        destination: Destination,
    ) -> Self {
        Self {
            source,
            transport,
            destination,
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the timer. No-op if already running.
    pub fn init(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(destination = %self.destination, "Heartbeat already running");
            return;
        }

        let source = Arc::clone(&self.source);
        let transport = Arc::clone(&self.transport);
        let destination = self.destination.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let status = source.module_status();
                if let Err(e) = send_status(transport.as_ref(), &destination, status).await {
                    warn!(destination = %destination, error = %e, "Failed to send heartbeat");
                }
            }
        });

        *self.task.lock() = Some(handle);
        info!(
            destination = %self.destination,
            interval_ms = self.interval.as_millis() as u64,
            "Heartbeat started"
        );
    }

    /// Stop the timer. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        info!(destination = %self.destination, "Heartbeat stopped");
    }

    /// Send one status outside the timer (used for the final announcement)
    pub async fn emit_now(&self) -> Result<()> {
        send_status(
            self.transport.as_ref(),
            &self.destination,
            self.source.module_status(),
        )
        .await
    }
}

impl Drop for HeartbeatEmitter {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn send_status(
    transport: &dyn Transport,
    destination: &Destination,
    status: ModuleStatus,
) -> Result<()> {
    let envelope = MessageEnvelope::new(Message::Status(status));
    transport.send(destination, envelope, None).await
}
