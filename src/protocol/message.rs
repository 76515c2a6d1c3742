//! In-flight message shape and attribute-map conversion.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::{wire_timestamp, Command};
use crate::error::Error;

/// String-typed message attribute names on the wire.
pub const ATTR_CLIENT_NAME: &str = "clientName";
pub const ATTR_SESSION_ID: &str = "sessionID";
pub const ATTR_CMD: &str = "cmd";
pub const ATTR_TIMESTAMP: &str = "timestamp";

/// One in-flight message: four required attributes plus an opaque body.
///
/// The body is free text and may legitimately contain the `"END"`
/// sentinel; only echo handling interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub client_name: String,
    pub session_id: String,
    pub command: Command,
    pub timestamp: String,
    pub body: String,
}

impl Message {
    /// Create a message stamped with the current wire timestamp.
    pub fn new(
        client_name: impl Into<String>,
        session_id: impl Into<String>,
        command: Command,
        body: impl Into<String>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            session_id: session_id.into(),
            command,
            timestamp: wire_timestamp(),
            body: body.into(),
        }
    }

    /// Create the response to this message: same attributes, new body.
    ///
    /// The original session id is what lets the correlator pick the
    /// response off the shared outbound queue.
    pub fn reply(&self, body: impl Into<String>) -> Self {
        Self {
            client_name: self.client_name.clone(),
            session_id: self.session_id.clone(),
            command: self.command,
            timestamp: self.timestamp.clone(),
            body: body.into(),
        }
    }

    /// Flatten the four required attributes into a wire attribute map.
    pub fn to_attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            (ATTR_CLIENT_NAME.to_string(), self.client_name.clone()),
            (ATTR_SESSION_ID.to_string(), self.session_id.clone()),
            (ATTR_CMD.to_string(), self.command.as_wire().to_string()),
            (ATTR_TIMESTAMP.to_string(), self.timestamp.clone()),
        ])
    }

    /// Rebuild a message from a wire attribute map and body.
    ///
    /// Any missing attribute or unparseable command code is a
    /// `ProtocolError`; the caller is expected to release (not delete)
    /// the carrying queue message.
    pub fn from_attributes(
        attributes: &HashMap<String, String>,
        body: impl Into<String>,
    ) -> Result<Self, Error> {
        let require = |name: &str| -> Result<String, Error> {
            attributes
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Protocol(format!("missing message attribute '{}'", name)))
        };

        let command = Command::from_wire(&require(ATTR_CMD)?)?;

        Ok(Self {
            client_name: require(ATTR_CLIENT_NAME)?,
            session_id: require(ATTR_SESSION_ID)?,
            command,
            timestamp: require(ATTR_TIMESTAMP)?,
            body: body.into(),
        })
    }
}
