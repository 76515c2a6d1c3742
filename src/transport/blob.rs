//! Blob store trait: list-by-prefix / get / put / delete.

use async_trait::async_trait;

use crate::error::Result;

/// Key/value blob storage scoped by string keys with `/` separators.
///
/// `list` order is the only ordering guarantee the store makes; callers
/// that fold blobs together inherit that order as-is.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Keys starting with `prefix`, in the store's listing order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Full contents of `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `key` in full. The put is atomic per key: readers see the
    /// old object or the new one, never a partial write.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
