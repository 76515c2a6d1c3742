//! Queue transport trait: send/receive/delete/visibility primitives.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Message;

/// Proof of a claim on a received message.
///
/// The token is minted per claim; after a lease expires and the message
/// is re-claimed elsewhere, operations with the stale receipt fail with
/// a transport error rather than acting on the new claimant's lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: String,
    pub claim_token: String,
}

/// A claimed message in wire form, plus the receipt needed to delete
/// or release it.
///
/// The queue moves string attributes and an opaque body; it does not
/// validate them. Consumers [`parse`](Self::parse) at ingress and are
/// expected to release (never delete) anything that fails to parse.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub attributes: HashMap<String, String>,
    pub body: String,
    pub receipt: Receipt,
}

impl ReceivedMessage {
    /// Validate the wire attributes into a typed [`Message`].
    pub fn parse(&self) -> Result<Message> {
        Message::from_attributes(&self.attributes, self.body.clone())
    }
}

/// Send/receive/delete/visibility primitives over one shared queue.
///
/// The lease granted by `receive` (the visibility timeout) is the only
/// concurrency-control primitive in the system. `set_visibility` with a
/// zero timeout releases a message so another consumer can claim it
/// immediately.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Publish one message. Returns the queue-assigned message id.
    async fn send(&self, message: &Message) -> Result<String>;

    /// Claim the next visible message, long-polling up to `max_wait`.
    /// Returns `None` when the wait elapses with nothing claimable.
    async fn receive(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>>;

    /// Acknowledge a claimed message, removing it from the queue.
    async fn delete(&self, receipt: &Receipt) -> Result<()>;

    /// Reset the lease on a claimed message. A zero timeout makes the
    /// message instantly re-claimable.
    async fn set_visibility(&self, receipt: &Receipt, timeout: Duration) -> Result<()>;
}
