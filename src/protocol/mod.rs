//! Wire protocol: command codes, message attributes, result encoding.

pub mod encoding;
pub mod message;
pub mod types;

pub use encoding::{decode_matches, encode_matches, SearchMatch};
pub use message::Message;
pub use types::{
    new_session_id, wire_timestamp, Command, EMPTY_CONVERSATION, END_SENTINEL, SESSION_ID_LEN,
};
