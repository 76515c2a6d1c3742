//! Queue and blob transport seams.
//!
//! Components take `Arc<dyn QueueTransport>` / `Arc<dyn BlobStore>` at
//! construction; nothing reaches a process-wide handle.

pub mod blob;
pub mod fs;
pub mod queue;

pub use blob::BlobStore;
pub use fs::{FsBlobStore, FsQueue};
pub use queue::{QueueTransport, Receipt, ReceivedMessage};
