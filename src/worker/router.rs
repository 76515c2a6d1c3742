//! Command router: the claim/dispatch/ack loop of a worker process.
//!
//! Each worker runs two tasks joined by a single-slot handoff: the poll
//! loop claims inbound messages and the process task runs the handler.
//! The poll loop blocks until the handler reports back before it
//! deletes the claimed message and polls again, so at most one message
//! is in flight per process. Messages the worker does not own — wrong
//! command type, or malformed — are released (visibility zero), never
//! deleted, so the right worker type can claim them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::protocol::{Command, Message};
use crate::transport::{QueueTransport, Receipt};

/// Pause after releasing a message. A released message is instantly
/// claimable again, and the releaser must not win every rematch for it.
const RELEASE_BACKOFF: Duration = Duration::from_millis(25);

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// One worker type's message processing.
///
/// Implementations must tolerate redelivery: a lease that expires
/// mid-processing hands the same message to another instance, so a
/// duplicate echo or search reply is acceptable and expected.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The command this worker type owns.
    fn command(&self) -> Command;

    /// Process one owned, validated message.
    async fn handle(&self, message: &Message) -> Result<()>;
}

/// Claim/dispatch/ack loop over the shared inbound queue.
#[derive(Clone)]
pub struct Router {
    inbox: Arc<dyn QueueTransport>,
    handler: Arc<dyn Handler>,
    /// Bounded long-poll wait per receive call.
    wait: Duration,
}

impl Router {
    pub fn new(inbox: Arc<dyn QueueTransport>, handler: Arc<dyn Handler>, wait: Duration) -> Self {
        Self {
            inbox,
            handler,
            wait,
        }
    }

    /// Run until the shutdown signal flips to `true`.
    ///
    /// In-flight operations are not rolled back on shutdown; a claimed
    /// but unfinished message simply reappears after its lease lapses.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (work_tx, mut work_rx) = mpsc::channel::<Message>(1);
        let (done_tx, mut done_rx) = mpsc::channel::<Result<()>>(1);

        let handler = self.handler.clone();
        let process = tokio::spawn(async move {
            while let Some(message) = work_rx.recv().await {
                let result = handler.handle(&message).await;
                if done_tx.send(result).await.is_err() {
                    break;
                }
            }
        });

        tracing::info!("{} worker polling for commands", self.handler.command());

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                r = self.inbox.receive(self.wait) => r,
            };

            let received = match received {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("Error while receiving message: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let message = match received.parse() {
                Ok(m) => m,
                Err(e) => {
                    // Quarantine by release: logged, given back, never
                    // deleted, never fatal.
                    tracing::warn!(
                        "Releasing malformed message {}: {}",
                        received.receipt.message_id,
                        e
                    );
                    self.release(&received.receipt).await;
                    continue;
                }
            };

            if message.command != self.handler.command() {
                tracing::debug!(
                    "Releasing {} command for another worker type",
                    message.command
                );
                self.release(&received.receipt).await;
                continue;
            }

            tracing::info!(
                "New message received. Client: {}, command: {}",
                message.client_name,
                message.command
            );

            // Single-slot handoff to the process task.
            if work_tx.send(message).await.is_err() {
                break;
            }
            let Some(result) = done_rx.recv().await else {
                break;
            };

            match result {
                Ok(()) => {
                    if let Err(e) = self.inbox.delete(&received.receipt).await {
                        tracing::error!(
                            "Error when trying to delete message after processing: {}",
                            e
                        );
                    }
                }
                Err(e) => {
                    // Keep the claim and let the lease lapse; expiry
                    // redelivers the message for another attempt.
                    tracing::error!("Handler failed, leaving message for redelivery: {}", e);
                }
            }
        }

        drop(work_tx);
        let _ = process.await;
        tracing::info!("{} worker stopped", self.handler.command());
        Ok(())
    }

    async fn release(&self, receipt: &Receipt) {
        if let Err(e) = self.inbox.set_visibility(receipt, Duration::ZERO).await {
            tracing::error!("Could not release message {}: {}", receipt.message_id, e);
        }
        tokio::time::sleep(RELEASE_BACKOFF).await;
    }
}
