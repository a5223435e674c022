//! Dispatch core: listener registries, receive routing and RPC correlation

use crate::address::Address;
use crate::error::{Code, Error, Result};
use crate::message::{Message, MessageType};
use crate::reply::ReplySlot;
use crate::transport::Transport;
use crate::validator::AttributeValidator;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

/// Default time budget for an RPC call when the caller does not set one
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Listener for topic publications and notifications.
///
/// Listeners are identified by their `Arc` handle: registering the same
/// handle twice is one registration, and unregistration only matches the
/// identical handle.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Handle a delivered message
    async fn on_receive(&self, msg: Message);
}

/// Handler for inbound RPC requests on a method address this client serves
#[async_trait]
pub trait RpcListener: Send + Sync + 'static {
    /// Handle a request; the reply slot must be completed exactly once
    async fn on_invoke(&self, request: Message, reply: ReplySlot);
}

/// Options for an RPC invocation
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Hard deadline for the call; also becomes the request's time-to-live
    pub timeout: Duration,

    /// Opaque authorization token attached to the request
    pub token: Option<String>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            token: None,
        }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CALL_TIMEOUT,
            token: None,
        }
    }
}

type TopicMap = RwLock<HashMap<Address, Vec<Arc<dyn Listener>>>>;
type MethodMap = RwLock<HashMap<Address, Arc<dyn RpcListener>>>;
type PendingMap = RwLock<HashMap<Uuid, oneshot::Sender<Result<Message>>>>;

/// Owns the three registries and every routing decision.
///
/// One dispatcher exists per client. The registries are the source of truth
/// for what the client wants delivered; the transport's dispatch state is a
/// cache of that intent, rebuilt on demand after an interruption.
pub struct Dispatcher {
    /// This client's RPC response address; its entity decides sink matches
    identity: Address,
    transport: Arc<dyn Transport>,
    validator: AttributeValidator,
    topics: TopicMap,
    methods: MethodMap,
    pending: PendingMap,
}

impl Dispatcher {
    pub(crate) fn new(identity: Address, transport: Arc<dyn Transport>) -> Self {
        Self {
            identity,
            transport,
            validator: AttributeValidator::new(),
            topics: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// This client's RPC response address
    pub fn identity(&self) -> &Address {
        &self.identity
    }

    // ---- topic subscription ------------------------------------------------

    /// Register a listener for a topic address.
    ///
    /// The first listener for an address turns on transport dispatching
    /// before it is admitted; if that fails the set stays unchanged. Later
    /// listeners are caught up asynchronously with the topic's retained
    /// message, if the broker kept one.
    pub async fn register_listener(
        &self,
        address: &Address,
        listener: Arc<dyn Listener>,
    ) -> Result<()> {
        if address.is_empty() {
            return Err(Error::invalid_argument("topic address must not be empty"));
        }
        if address.is_rpc_method() {
            return Err(Error::invalid_argument(
                "method addresses are registered through register_rpc_listener",
            ));
        }

        let mut topics = self.topics.write().await;
        match topics.get_mut(address) {
            None => {
                self.transport.enable_dispatching(address).await?;
                topics.insert(address.clone(), vec![listener]);
                Ok(())
            }
            Some(set) => {
                if set.iter().any(|known| Arc::ptr_eq(known, &listener)) {
                    return Ok(());
                }
                set.push(listener.clone());

                // Late joiner: catch up with the retained message off the
                // registration path so a slow listener cannot hold the lock.
                let transport = self.transport.clone();
                let address = address.clone();
                tokio::spawn(async move {
                    if let Some(last) = transport.pull_last_message(&address).await {
                        listener.on_receive(last).await;
                    }
                });
                Ok(())
            }
        }
    }

    /// Remove a listener from a topic address. Unknown listeners and
    /// addresses are a successful no-op.
    pub async fn unregister_listener(
        &self,
        address: &Address,
        listener: &Arc<dyn Listener>,
    ) -> Result<()> {
        let mut topics = self.topics.write().await;
        if let Some(set) = topics.get_mut(address) {
            set.retain(|known| !Arc::ptr_eq(known, listener));
            if set.is_empty() {
                topics.remove(address);
                self.quiet_disable(address).await;
            }
        }
        Ok(())
    }

    /// Remove a listener from every topic address it is registered on
    pub async fn unregister_listener_everywhere(&self, listener: &Arc<dyn Listener>) -> Result<()> {
        let mut topics = self.topics.write().await;
        let mut emptied = Vec::new();
        for (address, set) in topics.iter_mut() {
            set.retain(|known| !Arc::ptr_eq(known, listener));
            if set.is_empty() {
                emptied.push(address.clone());
            }
        }
        for address in emptied {
            topics.remove(&address);
            self.quiet_disable(&address).await;
        }
        Ok(())
    }

    // ---- RPC server side ---------------------------------------------------

    /// Register the handler for a method address. A method has at most one
    /// owner: a second distinct handler fails with `AlreadyExists`, while
    /// re-registering the same handle is a no-op.
    pub async fn register_rpc_listener(
        &self,
        method: &Address,
        listener: Arc<dyn RpcListener>,
    ) -> Result<()> {
        if method.is_empty() {
            return Err(Error::invalid_argument("method address must not be empty"));
        }
        if !method.is_rpc_method() {
            return Err(Error::invalid_argument(
                "address does not name an RPC method",
            ));
        }

        let mut methods = self.methods.write().await;
        if let Some(existing) = methods.get(method) {
            if Arc::ptr_eq(existing, &listener) {
                return Ok(());
            }
            return Err(Error::already_exists(format!(
                "method {method} already has a listener"
            )));
        }
        self.transport.enable_dispatching(method).await?;
        methods.insert(method.clone(), listener);
        Ok(())
    }

    /// Remove the handler for a method address if it is the same handle.
    /// Anything else is a successful no-op.
    pub async fn unregister_rpc_listener(
        &self,
        method: &Address,
        listener: &Arc<dyn RpcListener>,
    ) -> Result<()> {
        let mut methods = self.methods.write().await;
        if let Some(existing) = methods.get(method) {
            if Arc::ptr_eq(existing, listener) {
                methods.remove(method);
                self.quiet_disable(method).await;
            }
        }
        Ok(())
    }

    /// Remove a handler from every method address it owns
    pub async fn unregister_rpc_listener_everywhere(
        &self,
        listener: &Arc<dyn RpcListener>,
    ) -> Result<()> {
        let mut methods = self.methods.write().await;
        let owned: Vec<Address> = methods
            .iter()
            .filter(|(_, known)| Arc::ptr_eq(*known, listener))
            .map(|(address, _)| address.clone())
            .collect();
        for address in owned {
            methods.remove(&address);
            self.quiet_disable(&address).await;
        }
        Ok(())
    }

    // ---- RPC client side ---------------------------------------------------

    /// Invoke a remote method and suspend until its response, the timeout,
    /// or client teardown, whichever resolves first.
    pub async fn invoke_method(
        &self,
        method: Address,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Message> {
        if method.is_empty() {
            return Err(Error::invalid_argument("method address must not be empty"));
        }
        if options.timeout.is_zero() {
            return Err(Error::invalid_argument("call timeout must be positive"));
        }

        let ttl_ms = options.timeout.as_millis() as u64;
        let request = Message::request(
            self.identity.clone(),
            method.clone(),
            payload,
            ttl_ms,
            options.token,
        );
        let request_id = request.id;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.write().await;
            if pending.contains_key(&request_id) {
                return Err(Error::aborted(format!(
                    "duplicated request id {request_id}"
                )));
            }
            pending.insert(request_id, tx);
        }

        if let Err(e) = self.transport.send(request).await {
            self.pending.write().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving: the map was force-cleared.
            Ok(Err(_)) => Err(Error::cancelled("client torn down while call was outstanding")),
            Err(_) => {
                self.pending.write().await.remove(&request_id);
                Err(Error::deadline_exceeded(
                    format!("invoke {method}"),
                    ttl_ms,
                ))
            }
        }
    }

    /// Number of in-flight requests, for diagnostics
    pub async fn pending_requests(&self) -> usize {
        self.pending.read().await.len()
    }

    // ---- receive pipeline --------------------------------------------------

    /// Single entry point for every inbound message. Classification never
    /// blocks on listener execution; fan-out and handlers run on their own
    /// tasks.
    pub async fn route(&self, msg: Message) {
        if let Err(e) = self.validator.validate(&msg) {
            tracing::debug!("dropping malformed message {}: {}", msg.id, e);
            return;
        }
        if self.validator.is_expired(&msg) {
            tracing::debug!("dropping expired message {}", msg.id);
            return;
        }

        match self.validator.classify(&msg) {
            MessageType::Publish | MessageType::Notification => self.route_publication(msg).await,
            MessageType::Request => self.route_request(msg).await,
            MessageType::Response => self.route_response(msg).await,
            MessageType::Unspecified => {
                tracing::debug!("dropping message {} of unknown type", msg.id);
            }
        }
    }

    async fn route_publication(&self, msg: Message) {
        if let Some(sink) = &msg.sink {
            if sink.entity() != self.identity.entity() {
                tracing::debug!("dropping message {}: wrong sink {}", msg.id, sink);
                return;
            }
        }

        let listeners = { self.topics.read().await.get(&msg.source).cloned() };
        let listeners = match listeners {
            Some(set) if !set.is_empty() => set,
            _ => {
                tracing::debug!("dropping message {}: no listener for {}", msg.id, msg.source);
                return;
            }
        };

        for listener in listeners {
            let delivery = msg.clone();
            tokio::spawn(async move {
                listener.on_receive(delivery).await;
            });
        }
    }

    async fn route_request(&self, msg: Message) {
        // The validator guarantees a method sink on requests.
        let Some(method) = msg.sink.clone() else {
            return;
        };

        let handler = { self.methods.read().await.get(&method).cloned() };
        let Some(handler) = handler else {
            tracing::debug!("dropping request {}: no listener for {}", msg.id, method);
            return;
        };

        let reply = ReplySlot::new(
            method,
            msg.source.clone(),
            msg.id,
            msg.metadata.priority,
            self.transport.clone(),
        );
        tokio::spawn(async move {
            handler.on_invoke(msg, reply).await;
        });
    }

    async fn route_response(&self, msg: Message) {
        let Some(request_id) = msg.request_id else {
            return;
        };

        // Removing under the write lock makes resolution race-free against
        // the timeout and cancellation paths: exactly one of them wins.
        let sender = { self.pending.write().await.remove(&request_id) };
        let Some(sender) = sender else {
            tracing::trace!(
                "dropping response for {}: already resolved or unknown",
                request_id
            );
            return;
        };

        let outcome = match msg.commstatus {
            Some(code) if code != Code::Ok => Err(Error::from_code(
                code,
                format!("remote handler failed request {request_id}"),
            )),
            _ => Ok(msg),
        };
        // The send fails if the caller already gave up concurrently.
        let _ = sender.send(outcome);
    }

    // ---- lifecycle support -------------------------------------------------

    /// Re-issue enable-dispatching for every registered address. Called after
    /// a reconnect when the transport lost its dispatch state.
    pub async fn replay_registrations(&self) {
        let mut addresses: Vec<Address> = {
            self.topics.read().await.keys().cloned().collect()
        };
        addresses.extend(self.methods.read().await.keys().cloned());

        let results = futures::future::join_all(
            addresses
                .iter()
                .map(|address| self.transport.enable_dispatching(address)),
        )
        .await;

        for (address, result) in addresses.iter().zip(results) {
            match result {
                Ok(()) => tracing::debug!("replayed dispatch enablement for {}", address),
                Err(e) => tracing::warn!("failed to replay registration for {}: {}", address, e),
            }
        }
    }

    /// Fail every in-flight request with a cancellation
    pub async fn cancel_all_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.write().await;
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!("cancelling {} outstanding requests", drained.len());
        }
        for (_, sender) in drained {
            let _ = sender.send(Err(Error::cancelled(
                "client disconnected while call was outstanding",
            )));
        }
    }

    /// Drop both listener registries
    pub async fn clear_registrations(&self) {
        self.topics.write().await.clear();
        self.methods.write().await.clear();
    }

    /// Disable dispatching without surfacing failure: a transport that is
    /// already torn down is an expected condition here, not an error.
    async fn quiet_disable(&self, address: &Address) {
        if let Err(e) = self.transport.disable_dispatching(address).await {
            tracing::debug!("quiet disable for {} failed: {}", address, e);
        }
    }
}
