//! Single-assignment reply slot for RPC handlers

use crate::address::Address;
use crate::error::Code;
use crate::message::{Message, Priority};
use crate::transport::Transport;
use std::sync::Arc;
use uuid::Uuid;

/// Reply slot handed to an RPC handler alongside the request.
///
/// The handler completes it exactly once, with a payload or a failure code;
/// completion builds and sends the matching Response. Both paths consume the
/// slot, so a second completion is unrepresentable. Sending is fire-and-forget
/// from the handler's point of view: transport failures are logged, never
/// surfaced back.
pub struct ReplySlot {
    method: Address,
    requester: Address,
    request_id: Uuid,
    priority: Priority,
    transport: Arc<dyn Transport>,
}

impl ReplySlot {
    pub(crate) fn new(
        method: Address,
        requester: Address,
        request_id: Uuid,
        priority: Priority,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            method,
            requester,
            request_id,
            priority,
            transport,
        }
    }

    /// ID of the request this slot answers
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The method address the request was sent to
    pub fn method(&self) -> &Address {
        &self.method
    }

    /// Complete the request successfully with a response payload
    pub async fn complete(self, payload: Vec<u8>) {
        log::trace!("request {} completed by handler", self.request_id);
        let response = Message::response(
            self.method.clone(),
            self.requester.clone(),
            self.request_id,
            self.priority,
            payload,
        );
        self.finish(response).await;
    }

    /// Complete the request with a failure code, carried to the caller as
    /// the response's communication status
    pub async fn fail(self, code: Code) {
        log::trace!("request {} failed by handler: {}", self.request_id, code);
        let response = Message::failure_response(
            self.method.clone(),
            self.requester.clone(),
            self.request_id,
            self.priority,
            code,
        );
        self.finish(response).await;
    }

    async fn finish(self, response: Message) {
        if let Err(e) = self.transport.send(response).await {
            log::warn!(
                "failed to send response for request {}: {}",
                self.request_id,
                e
            );
        }
    }
}
