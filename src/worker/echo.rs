//! Echo handler: append-and-reflect, with `"END"` closing the exchange.

use std::sync::Arc;

use async_trait::async_trait;

use super::router::Handler;
use crate::error::Result;
use crate::protocol::{Command, Message, END_SENTINEL};
use crate::store::ConversationStore;
use crate::transport::QueueTransport;

/// Owns `cmd = ECHO` messages.
///
/// Every body except `"END"` is appended to the session's chunk and
/// reflected back on the outbound queue under the original session id.
/// `"END"` folds the client's outstanding chunks into the transcript
/// and produces no response.
pub struct EchoHandler {
    store: ConversationStore,
    outbox: Arc<dyn QueueTransport>,
}

impl EchoHandler {
    pub fn new(store: ConversationStore, outbox: Arc<dyn QueueTransport>) -> Self {
        Self { store, outbox }
    }
}

#[async_trait]
impl Handler for EchoHandler {
    fn command(&self) -> Command {
        Command::Echo
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        if message.body == END_SENTINEL {
            tracing::info!("End of conversation with {}", message.client_name);
            self.store.merge(&message.client_name).await?;
            return Ok(());
        }

        self.store
            .append_line(
                &message.client_name,
                &message.session_id,
                &message.timestamp,
                &message.body,
            )
            .await?;

        tracing::info!(
            "Echoing message. Client: {}, content: {}",
            message.client_name,
            message.body
        );
        self.outbox.send(&message.reply(&message.body)).await?;
        Ok(())
    }
}
