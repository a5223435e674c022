//! In-process loopback bus
//!
//! A broker that lives entirely inside the process. It backs the test suite
//! and lets higher-level behavior be validated without a real broker binding,
//! while exercising the same transport seam a production binding would.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::message::{Message, MessageType};
use crate::transport::{Transport, TransportEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

const BUS_CAPACITY: usize = 1024;
const ENDPOINT_CAPACITY: usize = 256;

/// Shared in-process broker. Endpoints created from the same bus see each
/// other's traffic; the last publication per topic is retained so late
/// joiners can catch up.
pub struct LoopbackBus {
    sender: broadcast::Sender<Message>,
    retained: DashMap<Address, Message>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Arc::new(Self {
            sender,
            retained: DashMap::new(),
        })
    }

    /// Attach a new endpoint for the given entity.
    ///
    /// Must be called from within a tokio runtime; each endpoint runs a
    /// filter task that narrows the bus firehose down to its own traffic.
    pub fn endpoint(self: &Arc<Self>, entity: &str) -> Arc<LoopbackTransport> {
        let shared = Arc::new(EndpointShared {
            connected: AtomicBool::new(false),
            enabled: DashMap::new(),
        });
        let (event_tx, event_rx) = mpsc::channel(ENDPOINT_CAPACITY);

        let mut bus_receiver = self.sender.subscribe();
        let task_shared = shared.clone();
        let task_tx = event_tx.clone();
        let task_entity = entity.to_string();
        let filter_task = tokio::spawn(async move {
            loop {
                match bus_receiver.recv().await {
                    Ok(msg) => {
                        if !task_shared.connected.load(Ordering::SeqCst) {
                            continue;
                        }
                        if !should_receive(&msg, &task_entity, &task_shared.enabled) {
                            continue;
                        }
                        if task_tx.send(TransportEvent::Inbound(msg)).await.is_err() {
                            break; // endpoint dropped
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "loopback endpoint {} lagged, skipped {} messages",
                            task_entity,
                            skipped
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Arc::new(LoopbackTransport {
            entity: entity.to_string(),
            bus: self.clone(),
            shared,
            events: RwLock::new(event_rx),
            event_tx,
            _filter_task: filter_task,
        })
    }
}

struct EndpointShared {
    connected: AtomicBool,
    /// Addresses the broker is currently asked to dispatch, with the number
    /// of enable calls observed per address
    enabled: DashMap<Address, u64>,
}

/// Addressed messages are delivered by sink entity; broadcasts only reach
/// endpoints that enabled dispatching for the source address.
fn should_receive(msg: &Message, entity: &str, enabled: &DashMap<Address, u64>) -> bool {
    match &msg.sink {
        Some(sink) => sink.entity() == entity,
        None => enabled.contains_key(&msg.source),
    }
}

/// One endpoint on a [`LoopbackBus`]
pub struct LoopbackTransport {
    entity: String,
    bus: Arc<LoopbackBus>,
    shared: Arc<EndpointShared>,
    events: RwLock<mpsc::Receiver<TransportEvent>>,
    event_tx: mpsc::Sender<TransportEvent>,
    _filter_task: tokio::task::JoinHandle<()>,
}

impl LoopbackTransport {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Sever the binding as a broker would on an unsolicited interruption:
    /// the endpoint goes offline, the broker forgets its dispatch state, and
    /// an `Interrupted` event is surfaced to the receive loop.
    pub async fn inject_interruption(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.enabled.clear();
        let _ = self.event_tx.send(TransportEvent::Interrupted).await;
    }

    /// Number of enable-dispatching calls observed for an address since the
    /// last interruption
    pub fn enable_count(&self, address: &Address) -> u64 {
        self.shared
            .enabled
            .get(address)
            .map(|count| *count.value())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        self.shared.connected.store(true, Ordering::SeqCst);
        tracing::debug!("loopback endpoint {} connected", self.entity);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.connected.store(false, Ordering::SeqCst);
        tracing::debug!("loopback endpoint {} disconnected", self.entity);
        Ok(())
    }

    async fn send(&self, msg: Message) -> Result<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(Error::unavailable_msg("transport is not connected"));
        }
        if msg.msg_type == MessageType::Publish {
            self.bus.retained.insert(msg.source.clone(), msg.clone());
        }
        self.bus
            .sender
            .send(msg)
            .map(|_| ())
            .map_err(|_| Error::unavailable_msg("no endpoints attached to the bus"))
    }

    async fn enable_dispatching(&self, address: &Address) -> Result<()> {
        *self.shared.enabled.entry(address.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn disable_dispatching(&self, address: &Address) -> Result<()> {
        self.shared.enabled.remove(address);
        Ok(())
    }

    async fn pull_last_message(&self, address: &Address) -> Option<Message> {
        self.bus.retained.get(address).map(|entry| entry.value().clone())
    }

    async fn recv(&self) -> Result<TransportEvent> {
        let mut events = self.events.write().await;
        Ok(events.recv().await.unwrap_or(TransportEvent::Closed))
    }
}
