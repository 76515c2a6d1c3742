//! Core protocol types: command codes, sentinels, session ids.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Reserved body terminating an echo exchange. No response is produced
/// for it; it triggers a merge of the client's outstanding chunks.
pub const END_SENTINEL: &str = "END";

/// Response body signalling zero search matches. Sent instead of an
/// empty encoding so the client can tell "nothing matched" from
/// "nothing arrived".
pub const EMPTY_CONVERSATION: &str = "EMPTY CONVERSATION";

/// Length of a session correlation id.
///
/// Fixed-length random alphanumeric; NOT guaranteed globally unique.
/// Collision probability is non-negligible and accepted, matching the
/// upstream behavior. Do not add a dedup check here.
pub const SESSION_ID_LEN: usize = 6;

/// Command codes carried in the `cmd` message attribute.
///
/// The wire value is the decimal string of the code. Unknown codes are
/// rejected at ingress and the carrying message is released, never
/// silently dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Echo,
    Search,
}

impl Command {
    /// Numeric wire code.
    pub fn code(self) -> u8 {
        match self {
            Command::Echo => 1,
            Command::Search => 2,
        }
    }

    /// Wire representation for the `cmd` attribute.
    pub fn as_wire(self) -> &'static str {
        match self {
            Command::Echo => "1",
            Command::Search => "2",
        }
    }

    /// Parse the `cmd` attribute value.
    pub fn from_wire(value: &str) -> Result<Self, Error> {
        match value.trim() {
            "1" => Ok(Command::Echo),
            "2" => Ok(Command::Search),
            other => Err(Error::Protocol(format!("unknown command code '{}'", other))),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Echo => write!(f, "echo"),
            Command::Search => write!(f, "search"),
        }
    }
}

/// Generate a fresh session id: fixed-length random alphanumeric.
pub fn new_session_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Current wall clock in the wire timestamp format (`DD-Mon-YYYY HH:MM:SS`).
pub fn wire_timestamp() -> String {
    chrono::Local::now().format("%d-%b-%Y %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_round_trip() {
        assert_eq!(Command::from_wire("1").unwrap(), Command::Echo);
        assert_eq!(Command::from_wire("2").unwrap(), Command::Search);
        assert_eq!(Command::Echo.as_wire(), "1");
        assert_eq!(Command::Search.as_wire(), "2");
    }

    #[test]
    fn test_unknown_command_is_protocol_error() {
        for bad in ["0", "3", "", "echo", "one"] {
            match Command::from_wire(bad) {
                Err(Error::Protocol(_)) => {}
                other => panic!("expected protocol error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_session_id_shape() {
        let id = new_session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_wire_timestamp_format() {
        let ts = wire_timestamp();
        // DD-Mon-YYYY HH:MM:SS
        assert_eq!(ts.len(), 20);
        assert_eq!(&ts[2..3], "-");
        assert_eq!(&ts[6..7], "-");
        assert_eq!(&ts[11..12], " ");
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, "%d-%b-%Y %H:%M:%S").is_ok());
    }
}
