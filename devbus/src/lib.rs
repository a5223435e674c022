//! # devbus - reconnect-safe pub/sub and RPC client for device-local buses
//!
//! A client endpoint for a publish/subscribe and RPC message bus connecting
//! processes on one device. The crate owns the hard part of such a client:
//! routing inbound traffic to topic listeners, correlating RPC responses to
//! their requests under timeouts and cancellation, and keeping registrations
//! alive across transport interruptions.
//!
//! ## Quick Start
//!
//! ### Publish/Subscribe
//!
//! ```rust,ignore
//! use devbus::{Address, BusClient, Listener, LoopbackBus, Message, Result};
//! use std::sync::Arc;
//!
//! struct PrintListener;
//!
//! #[devbus::async_trait]
//! impl Listener for PrintListener {
//!     async fn on_receive(&self, msg: Message) {
//!         println!("received {} bytes on {}", msg.payload.len(), msg.source);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = LoopbackBus::new();
//!     let client = BusClient::new(bus.endpoint("display"), "device", "display").await?;
//!     client.connect().await?;
//!
//!     let topic = Address::topic("device", "sensors", "cabin/temperature");
//!     client.register_listener(&topic, Arc::new(PrintListener)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ### RPC
//!
//! ```rust,ignore
//! use devbus::{Address, BusClient, CallOptions, Message, ReplySlot, RpcListener};
//!
//! struct EchoHandler;
//!
//! #[devbus::async_trait]
//! impl RpcListener for EchoHandler {
//!     async fn on_invoke(&self, request: Message, reply: ReplySlot) {
//!         reply.complete(request.payload).await;
//!     }
//! }
//!
//! # async fn example(client: devbus::BusClient) -> devbus::Result<()> {
//! let method = Address::method("device", "display", "echo");
//! let response = client
//!     .invoke_method(method, b"ping".to_vec(), CallOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Inbound classification never blocks on listener execution; fan-out and
//!   request handlers run on their own tasks.
//! - Every in-flight RPC call resolves exactly once: response, remote
//!   failure code, deadline, or cancellation.
//! - Registrations survive transport interruptions; after an automatic
//!   rebind the broker's dispatch state is replayed from the registries.

pub mod address;
pub mod client;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod loopback;
pub mod message;
pub mod reply;
pub mod transport;
pub mod validator;

#[cfg(test)]
mod tests;



#[cfg(test)]
mod error_tests;

// Re-exports
pub use address::{Address, RESPONSE_RESOURCE, RPC_NAMESPACE};
pub use client::BusClient;
pub use connection::ConnectionState;
pub use dispatch::{CallOptions, Dispatcher, Listener, RpcListener, DEFAULT_CALL_TIMEOUT};
pub use error::{Code, Error, Result};
pub use loopback::{LoopbackBus, LoopbackTransport};
pub use message::{Message, MessageMetadata, MessageType, Priority};
pub use reply::ReplySlot;
pub use transport::{Transport, TransportEvent};
pub use validator::AttributeValidator;

// Re-export commonly used dependencies
pub use async_trait::async_trait;
