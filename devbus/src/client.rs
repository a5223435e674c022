//! BusClient - public facade over the dispatch core and the connection

use crate::address::Address;
use crate::connection::{Connection, ConnectionState};
use crate::dispatch::{CallOptions, Dispatcher, Listener, RpcListener};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::{Transport, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

/// How often the receive loop wakes to check the shutdown flag
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long shutdown waits for the receive loop to drain
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Client endpoint on a device-local message bus.
///
/// One client wraps one transport binding and owns the registries for
/// everything this process wants from the bus: topic subscriptions, served
/// RPC methods, and in-flight RPC calls. Registrations survive transport
/// interruptions and are replayed to the broker on reconnect; an explicit
/// [`disconnect`](Self::disconnect) tears everything down.
#[derive(Clone)]
pub struct BusClient {
    entity: String,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    connection: Arc<Connection>,
    /// Shutdown signal for graceful termination
    shutdown_signal: Arc<AtomicBool>,
    /// Handle to the receive loop
    recv_loop_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BusClient {
    /// Create a new client over the given transport.
    ///
    /// `authority` and `entity` form the client's own identity: inbound
    /// messages addressed to a different entity are dropped, and RPC
    /// responses come back to this client's reply address. The receive loop
    /// starts immediately; binding to the broker waits for
    /// [`connect`](Self::connect).
    pub async fn new(transport: Arc<dyn Transport>, authority: &str, entity: &str) -> Result<Self> {
        let reply_address = Address::response(authority, entity);
        if reply_address.is_empty() {
            return Err(Error::invalid_argument(
                "client authority and entity must not be empty",
            ));
        }

        let dispatcher = Arc::new(Dispatcher::new(reply_address, transport.clone()));
        let connection = Arc::new(Connection::new(transport.clone(), dispatcher.clone()));

        let client = Self {
            entity: entity.to_string(),
            transport,
            dispatcher,
            connection,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
            recv_loop_handle: Arc::new(RwLock::new(None)),
        };

        let handle = client.start_receive_loop();
        {
            let mut handle_guard = client.recv_loop_handle.write().await;
            *handle_guard = Some(handle);
        }

        Ok(client)
    }

    /// Start the receive loop: classify every transport event and hand
    /// inbound messages to the dispatch core
    fn start_receive_loop(&self) -> tokio::task::JoinHandle<()> {
        let transport = self.transport.clone();
        let dispatcher = self.dispatcher.clone();
        let connection = self.connection.clone();
        let shutdown_signal = self.shutdown_signal.clone();
        let entity = self.entity.clone();

        tokio::spawn(async move {
            tracing::debug!("starting receive loop for {}", entity);

            while !shutdown_signal.load(Ordering::Relaxed) {
                // Use a timeout to periodically check the shutdown signal
                let event =
                    tokio::time::timeout(RECV_POLL_INTERVAL, transport.recv()).await;

                match event {
                    Ok(Ok(TransportEvent::Inbound(msg))) => dispatcher.route(msg).await,
                    Ok(Ok(TransportEvent::Interrupted)) => {
                        connection.handle_interruption();
                        connection.clone().spawn_rebind();
                    }
                    Ok(Ok(TransportEvent::Closed)) => break,
                    Ok(Err(e)) => {
                        tracing::error!("receive error: {}", e);
                        break;
                    }
                    Err(_) => continue,
                }
            }

            tracing::debug!("receive loop stopped for {}", entity);
        })
    }

    // ---- connection --------------------------------------------------------

    /// Bind to the broker; idempotent under concurrent calls
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Unbind and tear down: cancels every outstanding call and clears all
    /// registrations
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_connecting(&self) -> bool {
        self.connection.is_connecting()
    }

    pub fn is_disconnected(&self) -> bool {
        self.connection.is_disconnected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch client readiness; flips to `false` on interruption or disconnect
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.connection.subscribe_ready()
    }

    // ---- messaging ---------------------------------------------------------

    /// Send a prebuilt message through the transport
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.transport.send(msg).await
    }

    /// Publish a payload on a topic
    pub async fn publish(&self, topic: &Address, payload: Vec<u8>) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::invalid_argument("topic address must not be empty"));
        }
        if topic.is_rpc_method() {
            return Err(Error::invalid_argument(
                "cannot publish to a method address",
            ));
        }
        self.transport
            .send(Message::publish(topic.clone(), payload))
            .await
    }

    /// Send a directed notification for a topic to one receiver
    pub async fn notify(&self, topic: &Address, sink: &Address, payload: Vec<u8>) -> Result<()> {
        if topic.is_empty() || sink.is_empty() {
            return Err(Error::invalid_argument(
                "notification topic and sink must not be empty",
            ));
        }
        self.transport
            .send(Message::notification(topic.clone(), sink.clone(), payload))
            .await
    }

    // ---- registration ------------------------------------------------------

    /// Subscribe a listener to a topic address
    pub async fn register_listener(
        &self,
        topic: &Address,
        listener: Arc<dyn Listener>,
    ) -> Result<()> {
        self.dispatcher.register_listener(topic, listener).await
    }

    /// Remove a listener from one topic address
    pub async fn unregister_listener(
        &self,
        topic: &Address,
        listener: &Arc<dyn Listener>,
    ) -> Result<()> {
        self.dispatcher.unregister_listener(topic, listener).await
    }

    /// Remove a listener from every topic it is subscribed to
    pub async fn unregister_listener_everywhere(
        &self,
        listener: &Arc<dyn Listener>,
    ) -> Result<()> {
        self.dispatcher.unregister_listener_everywhere(listener).await
    }

    /// Serve an RPC method with the given handler
    pub async fn register_rpc_listener(
        &self,
        method: &Address,
        listener: Arc<dyn RpcListener>,
    ) -> Result<()> {
        self.dispatcher.register_rpc_listener(method, listener).await
    }

    /// Stop serving one method if the handler matches
    pub async fn unregister_rpc_listener(
        &self,
        method: &Address,
        listener: &Arc<dyn RpcListener>,
    ) -> Result<()> {
        self.dispatcher.unregister_rpc_listener(method, listener).await
    }

    /// Stop serving every method owned by this handler
    pub async fn unregister_rpc_listener_everywhere(
        &self,
        listener: &Arc<dyn RpcListener>,
    ) -> Result<()> {
        self.dispatcher
            .unregister_rpc_listener_everywhere(listener)
            .await
    }

    // ---- RPC ---------------------------------------------------------------

    /// Call a remote method and wait for its response, the timeout, or
    /// client teardown, whichever comes first
    pub async fn invoke_method(
        &self,
        method: Address,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Message> {
        self.dispatcher.invoke_method(method, payload, options).await
    }

    // ---- identity & lifecycle ----------------------------------------------

    /// The entity name this client identifies as
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// This client's RPC response address
    pub fn reply_address(&self) -> &Address {
        self.dispatcher.identity()
    }

    /// Shutdown the client gracefully: disconnect, then stop the receive loop
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("shutting down bus client {}", self.entity);

        let result = self.connection.disconnect().await;
        self.shutdown_signal.store(true, Ordering::Relaxed);

        if let Some(handle) = {
            let mut handle_guard = self.recv_loop_handle.write().await;
            handle_guard.take()
        } {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => tracing::debug!("receive loop stopped"),
                Ok(Err(e)) => tracing::warn!("receive loop stopped with error: {:?}", e),
                Err(_) => tracing::warn!("receive loop shutdown timed out"),
            }
        }

        result
    }
}
