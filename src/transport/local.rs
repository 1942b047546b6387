//! In-process message bus
//!
//! Every queue and topic subscription owns a bounded channel drained by its
//! own dispatch task, so envelopes for one inbox are handled strictly in
//! receipt order. Replies are routed by `in_reply_to` to the handler that
//! was registered when the request was sent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{spawn_dispatch, Destination, MessageHandler, ReplyEvent, ReplyHandler, Transport};
use crate::error::{Error, Result};
use crate::protocol::MessageEnvelope;

/// Default per-inbox channel capacity
pub const DEFAULT_QUEUE_SIZE: usize = 256;

struct Subscriber {
    id: String,
    tx: mpsc::Sender<MessageEnvelope>,
}

/// Process-local [`Transport`]
pub struct LocalBus {
    queue_size: usize,
    queues: RwLock<HashMap<String, mpsc::Sender<MessageEnvelope>>>,
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    pending: Mutex<HashMap<Uuid, ReplyHandler>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_queue_size(DEFAULT_QUEUE_SIZE)
    }

    pub fn with_queue_size(queue_size: usize) -> Self {
        Self {
            queue_size: queue_size.max(1),
            queues: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a queue and return its receiving end. Rebinding replaces the old inbox.
    pub fn bind_queue(&self, address: &str) -> mpsc::Receiver<MessageEnvelope> {
        let (tx, rx) = mpsc::channel(self.queue_size);
        if self.queues.write().insert(address.to_string(), tx).is_some() {
            warn!(address = %address, "Queue rebound, previous inbox detached");
        }
        rx
    }

    /// Subscribe to a topic and return the receiving end
    pub fn subscribe(&self, topic: &str, subscriber_id: &str) -> mpsc::Receiver<MessageEnvelope> {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let mut topics = self.topics.write();
        let subscribers = topics.entry(topic.to_string()).or_default();
        subscribers.retain(|s| s.id != subscriber_id);
        subscribers.push(Subscriber {
            id: subscriber_id.to_string(),
            tx,
        });
        rx
    }

    /// Bind `address` and dispatch everything it receives to `handler`
    pub fn attach(&self, address: &str, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
        let inbox = self.bind_queue(address);
        debug!(address = %address, "Handler attached to queue");
        spawn_dispatch(format!("queue://{}", address), inbox, handler)
    }

    /// Subscribe `subscriber_id` to `topic` and dispatch to `handler`
    pub fn attach_topic(
        &self,
        topic: &str,
        subscriber_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> JoinHandle<()> {
        let inbox = self.subscribe(topic, subscriber_id);
        debug!(topic = %topic, subscriber = %subscriber_id, "Handler attached to topic");
        spawn_dispatch(format!("topic://{}", topic), inbox, handler)
    }

    /// Remove a queue binding and every topic subscription held under that id.
    /// Dispatch tasks end once their channel drains.
    pub fn detach(&self, address: &str) {
        self.queues.write().remove(address);
        for subscribers in self.topics.write().values_mut() {
            subscribers.retain(|s| s.id != address);
        }
    }

    /// Number of requests still waiting for a reply
    pub fn pending_replies(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fail every outstanding request and drop all bindings
    pub fn close(&self) {
        let drained: Vec<(Uuid, ReplyHandler)> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Failing outstanding requests on bus close");
        }
        for (_, mut handler) in drained {
            handler(ReplyEvent::Failed("transport closed".to_string()));
        }

        self.queues.write().clear();
        self.topics.write().clear();
    }

    fn deliver_reply(&self, request_id: Uuid, envelope: MessageEnvelope) {
        // Taken out of the map so the callback never runs under the lock
        let handler = self.pending.lock().remove(&request_id);
        match handler {
            Some(mut handler) => {
                handler(ReplyEvent::Received(envelope));
                handler(ReplyEvent::Completed);
            }
            None => {
                warn!(
                    request_id = %request_id,
                    message_id = %envelope.id,
                    "Reply for unknown or completed request dropped"
                );
            }
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn send(
        &self,
        destination: &Destination,
        envelope: MessageEnvelope,
        on_reply: Option<ReplyHandler>,
    ) -> Result<()> {
        if let Some(request_id) = envelope.in_reply_to {
            self.deliver_reply(request_id, envelope);
            return Ok(());
        }

        let message_type = envelope.message_type();

        match destination {
            Destination::Queue(address) => {
                let tx = self
                    .queues
                    .read()
                    .get(address)
                    .cloned()
                    .ok_or_else(|| Error::UnknownDestination(destination.to_string()))?;

                let request_id = envelope.id;
                if let Some(handler) = on_reply {
                    self.pending.lock().insert(request_id, handler);
                }

                if tx.send(envelope).await.is_err() {
                    self.pending.lock().remove(&request_id);
                    self.queues.write().remove(address);
                    return Err(Error::send_failed(
                        destination.to_string(),
                        message_type.to_string(),
                        "inbox closed",
                    ));
                }
            }
            Destination::Topic(topic) => {
                let targets: Vec<(String, mpsc::Sender<MessageEnvelope>)> = self
                    .topics
                    .read()
                    .get(topic)
                    .map(|subs| subs.iter().map(|s| (s.id.clone(), s.tx.clone())).collect())
                    .unwrap_or_default();

                if on_reply.is_some() {
                    debug!(topic = %topic, "Reply handler ignored for topic send");
                }

                for (subscriber, tx) in targets {
                    if tx.send(envelope.clone()).await.is_err() {
                        debug!(topic = %topic, subscriber = %subscriber, "Removing closed subscriber");
                        if let Some(subs) = self.topics.write().get_mut(topic) {
                            subs.retain(|s| s.id != subscriber);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
