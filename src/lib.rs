//! Parley library root.

pub mod cli;
pub mod config;
pub mod correlate;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod worker;

pub use cli::Commands;
pub use config::{load_settings, load_settings_or_default, Settings};
pub use correlate::Correlator;
pub use error::{Error, Result};
pub use protocol::{Command, Message};
pub use store::ConversationStore;
pub use transport::{BlobStore, FsBlobStore, FsQueue, QueueTransport};
pub use worker::{EchoHandler, Handler, Router, SearchHandler};
