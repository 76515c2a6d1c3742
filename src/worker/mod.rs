//! Worker processes: command router plus the echo and search handlers.

pub mod echo;
pub mod router;
pub mod search;

pub use echo::EchoHandler;
pub use router::{Handler, Router};
pub use search::SearchHandler;
