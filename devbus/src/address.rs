//! Structured bus addresses for topics and RPC methods

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource namespace that marks an address as an RPC endpoint
pub const RPC_NAMESPACE: &str = "rpc/";

/// Reserved resource for a client's RPC response sink
pub const RESPONSE_RESOURCE: &str = "rpc/response";

/// Identifier for a topic or an RPC method on the bus.
///
/// An address is `authority/entity/resource`: the authority names the device,
/// the entity names the software component, and the resource names the topic
/// or method within it. Equality and hashing cover the full structured value,
/// so addresses are usable as registry keys throughout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    authority: String,
    entity: String,
    resource: String,
}

impl Address {
    /// Create an address from its three segments
    pub fn new(
        authority: impl Into<String>,
        entity: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            entity: entity.into(),
            resource: resource.into(),
        }
    }

    /// Create a topic address
    pub fn topic(
        authority: impl Into<String>,
        entity: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self::new(authority, entity, topic)
    }

    /// Create an RPC method address under the `rpc/` namespace
    pub fn method(
        authority: impl Into<String>,
        entity: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self::new(
            authority,
            entity,
            format!("{RPC_NAMESPACE}{}", method.into()),
        )
    }

    /// Create the reserved RPC response address for an entity
    pub fn response(authority: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::new(authority, entity, RESPONSE_RESOURCE)
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// True if any segment is missing
    pub fn is_empty(&self) -> bool {
        self.authority.is_empty() || self.entity.is_empty() || self.resource.is_empty()
    }

    /// True if this address names an RPC method (and not the response sink)
    pub fn is_rpc_method(&self) -> bool {
        self.resource.starts_with(RPC_NAMESPACE) && self.resource != RESPONSE_RESOURCE
    }

    /// True if this address is a client's RPC response sink
    pub fn is_rpc_response(&self) -> bool {
        self.resource == RESPONSE_RESOURCE
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.authority, self.entity, self.resource)
    }
}
