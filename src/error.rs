//! Error types for Parley.
#![allow(dead_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Queue or blob call failure. Logged and retried on the next poll
    /// cycle; fatal only at startup when endpoints are unusable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Missing attribute or unparseable command code. The offending
    /// message is released, never deleted, and the worker continues.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Expected blob content absent (e.g. a chunk vanished before the
    /// merge reached it). Warned about, then worked around.
    #[error("Data error: {0}")]
    Data(String),

    /// The response was matched and observed but the delete on the
    /// outbound queue failed. The body is carried so the caller still
    /// gets it; the contract is at-least-once, not exactly-once.
    #[error("response for session {session} observed but not acknowledged")]
    Ack { session: String, body: String },

    #[error("{0}")]
    Other(String),
}
