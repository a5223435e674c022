//! Transport layer seam between the dispatch core and the physical channel

use crate::address::Address;
use crate::message::Message;
use crate::error::Result;
use async_trait::async_trait;

/// Events surfaced by a transport's receive side.
///
/// Inbound traffic and unsolicited lifecycle signals share one stream;
/// outcomes of explicit connect/disconnect calls are their method results.
#[derive(Debug)]
pub enum TransportEvent {
    /// A message arrived from the bus
    Inbound(Message),

    /// The binding to the broker was lost without an explicit disconnect
    Interrupted,

    /// The transport is gone and will produce no further events
    Closed,
}

/// Transport trait for abstracting the connection to the broker
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bind to the broker
    async fn connect(&self) -> Result<()>;

    /// Release the binding
    async fn disconnect(&self) -> Result<()>;

    /// Send a message
    async fn send(&self, msg: Message) -> Result<()>;

    /// Ask the broker to start delivering traffic for an address
    async fn enable_dispatching(&self, address: &Address) -> Result<()>;

    /// Ask the broker to stop delivering traffic for an address
    async fn disable_dispatching(&self, address: &Address) -> Result<()>;

    /// Fetch the last retained message for an address, if the broker kept one
    async fn pull_last_message(&self, address: &Address) -> Option<Message>;

    /// Receive the next transport event
    async fn recv(&self) -> Result<TransportEvent>;
}
