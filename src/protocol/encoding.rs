//! Search-result framing.
//!
//! Matched lines travel as a serde_json array of `{timestamp, body}`
//! records. The upstream system joined records with `///` and fields
//! with `|||`, which collides as soon as a payload contains either
//! token; structured serialization removes that ambiguity. An empty
//! match set is never encoded — the `EMPTY CONVERSATION` sentinel body
//! is sent instead.

use serde::{Deserialize, Serialize};

use super::types::EMPTY_CONVERSATION;
use crate::error::Error;

/// One matched transcript line, paired with its original timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchMatch {
    pub timestamp: String,
    pub body: String,
}

/// Encode a non-empty match set, or the sentinel for zero matches.
pub fn encode_matches(matches: &[SearchMatch]) -> Result<String, Error> {
    if matches.is_empty() {
        return Ok(EMPTY_CONVERSATION.to_string());
    }
    Ok(serde_json::to_string(matches)?)
}

/// Decode a search response body. The sentinel decodes to an empty set.
pub fn decode_matches(body: &str) -> Result<Vec<SearchMatch>, Error> {
    if body == EMPTY_CONVERSATION {
        return Ok(Vec::new());
    }
    serde_json::from_str(body)
        .map_err(|e| Error::Protocol(format!("malformed search response: {}", e)))
}
