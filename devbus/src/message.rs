//! Message envelope and serialization

use crate::address::Address;
use crate::error::Code;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Core message envelope carried over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID, time-ordered so correlation ids sort by creation
    pub id: Uuid,

    /// Message classification
    pub msg_type: MessageType,

    /// Origin address (topic for publications, caller for requests)
    pub source: Address,

    /// Destination address (absent for broadcast publications)
    pub sink: Option<Address>,

    /// Opaque payload bytes
    pub payload: Vec<u8>,

    /// ID of the originating request, carried on responses only
    pub request_id: Option<Uuid>,

    /// Remote failure code, carried on failed responses only
    pub commstatus: Option<Code>,

    /// Message metadata
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Unspecified,
    Publish,
    Notification,
    Request,
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Creation timestamp in milliseconds since the epoch
    pub timestamp_ms: u64,

    /// Message priority
    pub priority: Priority,

    /// Time-to-live in milliseconds
    pub ttl_ms: Option<u64>,

    /// Opaque authorization token
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    /// Reserved for RPC traffic
    Control,
}

impl Message {
    /// Create a broadcast publication for a topic
    pub fn publish(topic: Address, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            msg_type: MessageType::Publish,
            source: topic,
            sink: None,
            payload,
            request_id: None,
            commstatus: None,
            metadata: MessageMetadata::default(),
        }
    }

    /// Create a directed notification for a topic
    pub fn notification(topic: Address, sink: Address, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            msg_type: MessageType::Notification,
            source: topic,
            sink: Some(sink),
            payload,
            request_id: None,
            commstatus: None,
            metadata: MessageMetadata::default(),
        }
    }

    /// Create an RPC request. The reply address becomes the source so the
    /// remote side knows where to send the response; the time-to-live bounds
    /// how long the request may sit on the bus before it is dropped as stale.
    pub fn request(
        reply_to: Address,
        method: Address,
        payload: Vec<u8>,
        ttl_ms: u64,
        token: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            msg_type: MessageType::Request,
            source: reply_to,
            sink: Some(method),
            payload,
            request_id: None,
            commstatus: None,
            metadata: MessageMetadata {
                priority: Priority::Control,
                ttl_ms: Some(ttl_ms),
                ..MessageMetadata::default()
            },
        }
    }

    /// Create a successful RPC response correlated to a request
    pub fn response(
        method: Address,
        requester: Address,
        request_id: Uuid,
        priority: Priority,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            msg_type: MessageType::Response,
            source: method,
            sink: Some(requester),
            payload,
            request_id: Some(request_id),
            commstatus: None,
            metadata: MessageMetadata {
                priority,
                ..MessageMetadata::default()
            },
        }
    }

    /// Create a failed RPC response carrying a communication status
    pub fn failure_response(
        method: Address,
        requester: Address,
        request_id: Uuid,
        priority: Priority,
        code: Code,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            msg_type: MessageType::Response,
            source: method,
            sink: Some(requester),
            payload: Vec::new(),
            request_id: Some(request_id),
            commstatus: Some(code),
            metadata: MessageMetadata {
                priority,
                ..MessageMetadata::default()
            },
        }
    }
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            timestamp_ms: now_ms(),
            priority: Priority::Normal,
            ttl_ms: None,
            token: None,
        }
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
