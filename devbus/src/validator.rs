//! Attribute validation for inbound messages

use crate::error::{Error, Result};
use crate::message::{now_ms, Message, MessageType};

/// Validates the attribute set of an inbound message before it is routed.
///
/// The validator only judges envelope consistency; payload bytes are opaque
/// to it. A message it rejects never reaches a listener.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeValidator;

impl AttributeValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check that the message carries the attributes its type requires
    pub fn validate(&self, msg: &Message) -> Result<()> {
        if msg.source.is_empty() {
            return Err(Error::invalid_argument("message source must not be empty"));
        }
        if let Some(sink) = &msg.sink {
            if sink.is_empty() {
                return Err(Error::invalid_argument("message sink must not be empty"));
            }
        }

        match msg.msg_type {
            MessageType::Publish => {
                if msg.source.is_rpc_method() {
                    return Err(Error::invalid_argument(
                        "publication source must be a topic address",
                    ));
                }
                Ok(())
            }
            MessageType::Notification => {
                if msg.sink.is_none() {
                    return Err(Error::invalid_argument("notification requires a sink"));
                }
                Ok(())
            }
            MessageType::Request => {
                let sink = msg
                    .sink
                    .as_ref()
                    .ok_or_else(|| Error::invalid_argument("request requires a method sink"))?;
                if !sink.is_rpc_method() {
                    return Err(Error::invalid_argument(
                        "request sink must be an RPC method address",
                    ));
                }
                if msg.metadata.ttl_ms.is_none() {
                    return Err(Error::invalid_argument("request requires a time-to-live"));
                }
                Ok(())
            }
            MessageType::Response => {
                if msg.request_id.is_none() {
                    return Err(Error::invalid_argument("response requires a request id"));
                }
                if msg.sink.is_none() {
                    return Err(Error::invalid_argument("response requires a sink"));
                }
                Ok(())
            }
            // Typing is the routing pipeline's concern; an unknown type is
            // dropped there, not rejected here.
            MessageType::Unspecified => Ok(()),
        }
    }

    /// True if the message's time-to-live has elapsed
    pub fn is_expired(&self, msg: &Message) -> bool {
        match msg.metadata.ttl_ms {
            Some(ttl_ms) => now_ms() > msg.metadata.timestamp_ms.saturating_add(ttl_ms),
            None => false,
        }
    }

    /// Report the message classification
    pub fn classify(&self, msg: &Message) -> MessageType {
        msg.msg_type
    }
}
