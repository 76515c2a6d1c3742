//! Command line interface for Parley.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::config::{self, Settings};
use crate::correlate::Correlator;
use crate::error::Result;
use crate::protocol::{decode_matches, new_session_id, Command, END_SENTINEL};
use crate::store::ConversationStore;
use crate::transport::{FsBlobStore, FsQueue, QueueTransport};
use crate::worker::{EchoHandler, Router, SearchHandler};

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Queue-correlated echo/search workers and client")]
pub struct Commands {
    /// Settings file (defaults to ~/.parley/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Client name attached to commands (defaults from settings)
    #[arg(long, global = true)]
    pub client: Option<String>,

    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run an echo worker against the shared queues
    EchoWorker,

    /// Run a search worker against the shared queues
    SearchWorker,

    /// Send one line to echo and wait for the reflected reply
    Echo {
        /// Text to echo
        text: String,
    },

    /// Close the echo exchange, folding pending lines into the transcript
    End,

    /// Search the client's transcript for a substring
    Search {
        /// Case-sensitive needle
        needle: String,
    },

    /// Print the client's merged transcript
    Transcript,
}

impl Commands {
    pub async fn run(self) -> Result<()> {
        let settings = config::load_settings_or_default(self.config.as_deref());
        let client = self
            .client
            .clone()
            .unwrap_or_else(|| settings.client.name.clone());

        match self.command {
            Cmd::EchoWorker => run_worker(&settings, WorkerKind::Echo).await,
            Cmd::SearchWorker => run_worker(&settings, WorkerKind::Search).await,
            Cmd::Echo { text } => {
                let correlator = correlator(&settings)?;
                let session = new_session_id();
                correlator
                    .send_command(&client, &session, Command::Echo, &text)
                    .await?;
                match correlator
                    .receive_response(&session, response_wait(&settings))
                    .await?
                {
                    Some(body) => println!("{}", body),
                    None => println!("(no response within the wait window)"),
                }
                Ok(())
            }
            Cmd::End => {
                let correlator = correlator(&settings)?;
                let session = new_session_id();
                correlator
                    .send_command(&client, &session, Command::Echo, END_SENTINEL)
                    .await?;
                println!("Conversation closed.");
                Ok(())
            }
            Cmd::Search { needle } => {
                let correlator = correlator(&settings)?;
                let session = new_session_id();
                correlator
                    .send_command(&client, &session, Command::Search, &needle)
                    .await?;
                match correlator
                    .receive_response(&session, response_wait(&settings))
                    .await?
                {
                    Some(body) => {
                        let matches = decode_matches(&body)?;
                        if matches.is_empty() {
                            println!("No matching lines.");
                        } else {
                            for line in matches {
                                println!("{}  {}", line.timestamp, line.body);
                            }
                        }
                    }
                    None => println!("(no response within the wait window)"),
                }
                Ok(())
            }
            Cmd::Transcript => {
                let store = conversation_store(&settings)?;
                let lines = store.read_transcript(&client).await?;
                if lines.is_empty() {
                    println!("(empty transcript)");
                } else {
                    for line in lines {
                        println!("{}  {}", line.timestamp, line.body);
                    }
                }
                Ok(())
            }
        }
    }
}

enum WorkerKind {
    Echo,
    Search,
}

fn open_queues(settings: &Settings) -> Result<(Arc<FsQueue>, Arc<FsQueue>)> {
    let visibility = Duration::from_secs(settings.queues.visibility_seconds);
    let inbox = Arc::new(FsQueue::open(&settings.queues.inbox, visibility)?);
    let outbox = Arc::new(FsQueue::open(&settings.queues.outbox, visibility)?);
    Ok((inbox, outbox))
}

fn conversation_store(settings: &Settings) -> Result<ConversationStore> {
    let blobs = Arc::new(FsBlobStore::open(&settings.store.root)?);
    Ok(ConversationStore::new(
        blobs,
        settings.store.conversations_path.clone(),
    ))
}

fn correlator(settings: &Settings) -> Result<Correlator> {
    let (inbox, outbox) = open_queues(settings)?;
    Ok(Correlator::new(inbox, outbox))
}

fn response_wait(settings: &Settings) -> Duration {
    Duration::from_secs(settings.client.response_wait_seconds)
}

async fn run_worker(settings: &Settings, kind: WorkerKind) -> Result<()> {
    let (inbox, outbox) = open_queues(settings)?;
    let store = conversation_store(settings)?;
    let outbox: Arc<dyn QueueTransport> = outbox;

    let handler: Arc<dyn crate::worker::Handler> = match kind {
        WorkerKind::Echo => Arc::new(EchoHandler::new(store, outbox)),
        WorkerKind::Search => Arc::new(SearchHandler::new(store, outbox)),
    };

    let wait = Duration::from_secs(settings.queues.wait_seconds);
    let router = Router::new(inbox, handler, wait);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    router.run(shutdown_rx).await
}
