//! Search handler: materialize a transcript, filter, respond.

use std::sync::Arc;

use async_trait::async_trait;

use super::router::Handler;
use crate::error::Result;
use crate::protocol::{encode_matches, Command, Message};
use crate::store::ConversationStore;
use crate::transport::QueueTransport;

/// Owns `cmd = SEARCH` messages.
///
/// The body is the needle; the client-name attribute names the target
/// transcript. Outstanding chunks are merged first so the search runs
/// over the full conversation, then matching lines are encoded and
/// published under the original session id. Zero matches publish the
/// `EMPTY CONVERSATION` sentinel, never an empty encoding.
pub struct SearchHandler {
    store: ConversationStore,
    outbox: Arc<dyn QueueTransport>,
}

impl SearchHandler {
    pub fn new(store: ConversationStore, outbox: Arc<dyn QueueTransport>) -> Self {
        Self { store, outbox }
    }
}

#[async_trait]
impl Handler for SearchHandler {
    fn command(&self) -> Command {
        Command::Search
    }

    async fn handle(&self, message: &Message) -> Result<()> {
        let matches = self
            .store
            .search(&message.client_name, &message.body)
            .await?;

        tracing::info!(
            "Search for client {}: {} match(es)",
            message.client_name,
            matches.len()
        );

        let encoded = encode_matches(&matches)?;
        self.outbox.send(&message.reply(encoded)).await?;
        Ok(())
    }
}
