//! Session correlation over the shared outbound queue.
//!
//! Every client session shares one physical response queue. A waiting
//! correlator claims whatever arrives; anything tagged with a foreign
//! session is released with zero visibility so the session it belongs
//! to can claim it on its next poll. The cost is one extra round trip
//! per foreign message per waiting consumer; the payoff is that an
//! unbounded number of sessions multiplex one channel with no
//! server-side per-session mailbox.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{Command, Message};
use crate::transport::QueueTransport;

/// Per-receive bounded wait while polling for a response.
const RECEIVE_WAIT: Duration = Duration::from_secs(1);

/// Pause after releasing a foreign message. The released message is
/// instantly claimable again, and this consumer must not win every
/// rematch for it.
const RELEASE_BACKOFF: Duration = Duration::from_millis(25);

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// Client-side endpoint: publishes commands inbound, collects the
/// matching response from the shared outbound queue.
#[derive(Clone)]
pub struct Correlator {
    inbox: Arc<dyn QueueTransport>,
    outbox: Arc<dyn QueueTransport>,
}

impl Correlator {
    pub fn new(inbox: Arc<dyn QueueTransport>, outbox: Arc<dyn QueueTransport>) -> Self {
        Self { inbox, outbox }
    }

    /// Publish one fully attributed command to the inbound queue.
    ///
    /// No retry here; retrying is the caller's decision.
    pub async fn send_command(
        &self,
        client: &str,
        session: &str,
        command: Command,
        body: &str,
    ) -> Result<String> {
        let message = Message::new(client, session, command, body);
        let id = self.inbox.send(&message).await?;
        tracing::info!(
            "Sent {} command for client {} (session {})",
            command,
            client,
            session
        );
        Ok(id)
    }

    /// Poll the shared outbound queue for `session`'s response, up to
    /// `max_wait` overall.
    ///
    /// Foreign-session messages are released (visibility zero), never
    /// deleted. A matching message is deleted and its body returned; if
    /// the delete fails after the match, `Error::Ack` carries the
    /// observed body to the caller (at-least-once). Receive errors are
    /// logged and the poll retried; deadline expiry yields `Ok(None)`.
    pub async fn receive_response(&self, session: &str, max_wait: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let received = match self.outbox.receive(remaining.min(RECEIVE_WAIT)).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Error while receiving response: {}", e);
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    continue;
                }
            };
            let Some(received) = received else {
                continue;
            };

            let message = match received.parse() {
                Ok(m) => m,
                Err(e) => {
                    // Not a well-formed response at all. Release it the
                    // same way as a foreign session's message.
                    tracing::warn!("Releasing unparseable response: {}", e);
                    if let Err(e) = self
                        .outbox
                        .set_visibility(&received.receipt, Duration::ZERO)
                        .await
                    {
                        tracing::error!("Could not release unparseable message: {}", e);
                    }
                    tokio::time::sleep(RELEASE_BACKOFF).await;
                    continue;
                }
            };

            if message.session_id != session {
                // Not ours. Hand it straight back for whoever is
                // actually waiting on that session.
                if let Err(e) = self
                    .outbox
                    .set_visibility(&received.receipt, Duration::ZERO)
                    .await
                {
                    tracing::error!(
                        "Could not release foreign-session message {}: {}",
                        received.receipt.message_id,
                        e
                    );
                }
                tokio::time::sleep(RELEASE_BACKOFF).await;
                continue;
            }

            let body = message.body;
            if let Err(e) = self.outbox.delete(&received.receipt).await {
                tracing::error!("Could not delete response after matching: {}", e);
                return Err(Error::Ack {
                    session: session.to_string(),
                    body,
                });
            }
            return Ok(Some(body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FsQueue;

    fn queues(dir: &std::path::Path) -> (Arc<FsQueue>, Arc<FsQueue>) {
        let inbox = Arc::new(FsQueue::open(dir.join("inbox"), Duration::from_secs(30)).unwrap());
        let outbox = Arc::new(FsQueue::open(dir.join("outbox"), Duration::from_secs(30)).unwrap());
        (inbox, outbox)
    }

    #[tokio::test]
    async fn test_send_command_carries_all_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let (inbox, outbox) = queues(dir.path());
        let correlator = Correlator::new(inbox.clone(), outbox);

        correlator
            .send_command("alice", "ab12cd", Command::Echo, "hi")
            .await
            .unwrap();

        let received = inbox
            .receive(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        let message = received.parse().unwrap();
        assert_eq!(message.client_name, "alice");
        assert_eq!(message.session_id, "ab12cd");
        assert_eq!(message.command, Command::Echo);
        assert_eq!(message.body, "hi");
        assert!(!message.timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_matching_response_is_returned_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (inbox, outbox) = queues(dir.path());
        let correlator = Correlator::new(inbox, outbox.clone());

        outbox
            .send(&Message::new("alice", "ab12cd", Command::Echo, "hi"))
            .await
            .unwrap();

        let body = correlator
            .receive_response("ab12cd", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("hi"));

        // Acked: nothing left on the outbound queue.
        assert!(outbox
            .receive(Duration::from_millis(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_session_isolation_on_shared_outbound_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (inbox, outbox) = queues(dir.path());
        let correlator = Correlator::new(inbox, outbox.clone());

        // A foreign session's response sits ahead of ours.
        outbox
            .send(&Message::new("bob", "zz88yy", Command::Echo, "not yours"))
            .await
            .unwrap();
        outbox
            .send(&Message::new("alice", "ab12cd", Command::Echo, "yours"))
            .await
            .unwrap();

        let body = correlator
            .receive_response("ab12cd", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("yours"));

        // The foreign message was released, not deleted or returned.
        let leftover = outbox
            .receive(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("foreign message must survive");
        let leftover = leftover.parse().unwrap();
        assert_eq!(leftover.session_id, "zz88yy");
        assert_eq!(leftover.body, "not yours");
    }

    #[tokio::test]
    async fn test_echo_round_trip_through_worker() {
        use crate::store::ConversationStore;
        use crate::transport::{BlobStore, FsBlobStore};
        use crate::worker::{EchoHandler, Router};
        use tokio::sync::watch;

        let dir = tempfile::tempdir().unwrap();
        let (inbox, outbox) = queues(dir.path());
        let blobs = Arc::new(FsBlobStore::open(dir.path().join("blobs")).unwrap());
        let store = ConversationStore::new(blobs.clone(), "conversations");

        let handler = Arc::new(EchoHandler::new(store.clone(), outbox.clone()));
        let router = Router::new(inbox.clone(), handler, Duration::from_millis(50));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(router.run(shutdown_rx));

        let correlator = Correlator::new(inbox, outbox);

        // ECHO "hi" comes back on the same session and lands in the chunk.
        correlator
            .send_command("alice", "ab12cd", Command::Echo, "hi")
            .await
            .unwrap();
        let body = correlator
            .receive_response("ab12cd", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("hi"));
        assert!(blobs
            .get("conversations/alice_ab12cd.txt")
            .await
            .unwrap()
            .is_some());

        // ECHO "END" folds the chunk into the transcript, no response.
        correlator
            .send_command("alice", "ab12cd", Command::Echo, "END")
            .await
            .unwrap();
        let body = correlator
            .receive_response("ab12cd", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(body.is_none());
        assert!(blobs
            .get("conversations/alice_ab12cd.txt")
            .await
            .unwrap()
            .is_none());
        let transcript = store.read_transcript("alice").await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].body, "hi");

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_receive_errors_back_off_instead_of_spinning() {
        use crate::transport::{Receipt, ReceivedMessage};
        use async_trait::async_trait;
        use std::sync::Mutex;

        /// Queue stub whose receive always fails, counting attempts.
        struct BrokenQueue {
            receives: Mutex<u32>,
        }

        #[async_trait]
        impl QueueTransport for BrokenQueue {
            async fn send(&self, _message: &Message) -> Result<String> {
                Err(Error::Transport("queue down".to_string()))
            }

            async fn receive(&self, _max_wait: Duration) -> Result<Option<ReceivedMessage>> {
                *self.receives.lock().unwrap() += 1;
                Err(Error::Transport("queue down".to_string()))
            }

            async fn delete(&self, _receipt: &Receipt) -> Result<()> {
                Ok(())
            }

            async fn set_visibility(&self, _receipt: &Receipt, _timeout: Duration) -> Result<()> {
                Ok(())
            }
        }

        let inbox = Arc::new(BrokenQueue {
            receives: Mutex::new(0),
        });
        let outbox = Arc::new(BrokenQueue {
            receives: Mutex::new(0),
        });
        let correlator = Correlator::new(inbox, outbox.clone());

        let body = correlator
            .receive_response("ab12cd", Duration::from_millis(600))
            .await
            .unwrap();
        assert!(body.is_none());

        let attempts = *outbox.receives.lock().unwrap();
        assert!(attempts >= 2);
        assert!(
            attempts <= 10,
            "persistent receive errors must back off, saw {} attempts",
            attempts
        );
    }

    #[tokio::test]
    async fn test_deadline_expiry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let (inbox, outbox) = queues(dir.path());
        let correlator = Correlator::new(inbox, outbox);

        let body = correlator
            .receive_response("ab12cd", Duration::from_millis(120))
            .await
            .unwrap();
        assert!(body.is_none());
    }
}
