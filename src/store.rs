//! Conversation store: chunk lifecycle, merge, and substring search.
//!
//! Blob layout under the configured prefix:
//! - `<prefix>/<client>.txt`            durable transcript
//! - `<prefix>/<client>_<session>.txt`  pending chunk for one session
//!
//! Lines are `timestamp|||body`. The timestamp format cannot contain
//! the separator, so bodies are recovered intact with a two-way split
//! even when they contain `|||` themselves. Bodies are NOT
//! newline-safe: a `\n` inside a body ends the stored line there, and
//! the remainder is dropped with a warning on read.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::SearchMatch;
use crate::transport::BlobStore;

/// Field separator inside a stored conversation line.
const LINE_SEP: &str = "|||";

/// Per-client conversation storage over an injected blob store.
#[derive(Clone)]
pub struct ConversationStore {
    blobs: Arc<dyn BlobStore>,
    prefix: String,
}

impl ConversationStore {
    pub fn new(blobs: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            blobs,
            prefix: prefix.into(),
        }
    }

    /// Transcript key for a client.
    pub fn transcript_key(&self, client: &str) -> String {
        format!("{}/{}.txt", self.prefix, client)
    }

    /// Chunk key for one (client, session) pair.
    pub fn chunk_key(&self, client: &str, session: &str) -> String {
        format!("{}/{}_{}.txt", self.prefix, client, session)
    }

    /// Prefix under which all of a client's pending chunks live.
    ///
    /// The trailing underscore keeps `alice`'s chunks from matching
    /// `alice2`'s, and keeps the transcript (`alice.txt`) out of the
    /// listing.
    fn chunk_prefix(&self, client: &str) -> String {
        format!("{}/{}_", self.prefix, client)
    }

    /// Append one (timestamp, body) record to the session's chunk,
    /// creating the chunk on the first line.
    pub async fn append_line(
        &self,
        client: &str,
        session: &str,
        timestamp: &str,
        body: &str,
    ) -> Result<()> {
        let key = self.chunk_key(client, session);
        let mut bytes = self.blobs.get(&key).await?.unwrap_or_default();
        bytes.extend_from_slice(format!("{}{}{}\n", timestamp, LINE_SEP, body).as_bytes());
        self.blobs.put(&key, &bytes).await?;
        tracing::debug!("Appended line to chunk {}", key);
        Ok(())
    }

    /// Fold every outstanding chunk for `client` into the transcript.
    ///
    /// Chunks are folded in blob-listing order, which is the only order
    /// guarantee the store offers. Each chunk is appended and the
    /// transcript re-put before that chunk is deleted, so a chunk can
    /// only disappear after its copy is confirmed. A crash between the
    /// put and the delete leaves the chunk behind and the next merge
    /// folds it again: duplicated lines, never lost ones.
    ///
    /// Merging `[A, B]` and then `[C]` yields the same transcript as
    /// merging `[A, B, C]` in one pass.
    pub async fn merge(&self, client: &str) -> Result<usize> {
        let chunk_keys = self.blobs.list(&self.chunk_prefix(client)).await?;
        if chunk_keys.is_empty() {
            return Ok(0);
        }

        let transcript_key = self.transcript_key(client);
        let mut transcript = self.blobs.get(&transcript_key).await?.unwrap_or_default();
        let mut folded = 0;

        for key in chunk_keys {
            let Some(chunk) = self.blobs.get(&key).await? else {
                // Best-effort: a vanished chunk is worth a warning, not
                // an aborted merge.
                tracing::warn!(
                    "{}",
                    Error::Data(format!("chunk {} absent at merge time", key))
                );
                continue;
            };
            transcript.extend_from_slice(&chunk);
            self.blobs.put(&transcript_key, &transcript).await?;
            self.blobs.delete(&key).await?;
            folded += 1;
        }

        tracing::info!("Merged {} chunk(s) into {}", folded, transcript_key);
        Ok(folded)
    }

    /// Read the transcript as parsed (timestamp, body) lines.
    pub async fn read_transcript(&self, client: &str) -> Result<Vec<SearchMatch>> {
        let key = self.transcript_key(client);
        let Some(bytes) = self.blobs.get(&key).await? else {
            return Ok(Vec::new());
        };
        let text = String::from_utf8_lossy(&bytes);

        let mut lines = Vec::new();
        for raw in text.lines() {
            if raw.is_empty() {
                continue;
            }
            match raw.split_once(LINE_SEP) {
                Some((timestamp, body)) => lines.push(SearchMatch {
                    timestamp: timestamp.to_string(),
                    body: body.to_string(),
                }),
                None => {
                    tracing::warn!("{}", Error::Data(format!("unparseable line in {}", key)));
                }
            }
        }
        Ok(lines)
    }

    /// Materialize the transcript and return the ordered subsequence of
    /// lines whose body contains `needle` (case-sensitive literal).
    pub async fn search(&self, client: &str, needle: &str) -> Result<Vec<SearchMatch>> {
        self.merge(client).await?;
        let lines = self.read_transcript(client).await?;
        Ok(lines
            .into_iter()
            .filter(|line| line.body.contains(needle))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FsBlobStore;

    fn store(dir: &std::path::Path) -> ConversationStore {
        let blobs = Arc::new(FsBlobStore::open(dir).unwrap());
        ConversationStore::new(blobs, "conversations")
    }

    #[tokio::test]
    async fn test_append_creates_chunk_with_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "25-Aug-2026 10:00:00", "hi")
            .await
            .unwrap();

        let bytes = store
            .blobs
            .get("conversations/alice_ab12cd.txt")
            .await
            .unwrap()
            .expect("chunk should exist after first line");
        assert_eq!(bytes, b"25-Aug-2026 10:00:00|||hi\n");
    }

    #[tokio::test]
    async fn test_merge_folds_and_deletes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "25-Aug-2026 10:00:00", "hi")
            .await
            .unwrap();
        store
            .append_line("alice", "ab12cd", "25-Aug-2026 10:00:05", "there")
            .await
            .unwrap();

        let folded = store.merge("alice").await.unwrap();
        assert_eq!(folded, 1);

        assert!(store
            .blobs
            .get("conversations/alice_ab12cd.txt")
            .await
            .unwrap()
            .is_none());

        let lines = store.read_transcript("alice").await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].body, "hi");
        assert_eq!(lines[1].body, "there");
    }

    #[tokio::test]
    async fn test_merge_is_associative_over_listing_order() {
        let dir = tempfile::tempdir().unwrap();

        // Incremental merges on one store...
        let incremental = store(dir.path());
        incremental
            .append_line("alice", "aaaaaa", "t1", "from A")
            .await
            .unwrap();
        incremental
            .append_line("alice", "bbbbbb", "t2", "from B")
            .await
            .unwrap();
        incremental.merge("alice").await.unwrap();
        incremental
            .append_line("alice", "cccccc", "t3", "from C")
            .await
            .unwrap();
        incremental.merge("alice").await.unwrap();

        // ...equal a single merge over the same chunk set elsewhere.
        let other_dir = tempfile::tempdir().unwrap();
        let single = store(other_dir.path());
        single
            .append_line("alice", "aaaaaa", "t1", "from A")
            .await
            .unwrap();
        single
            .append_line("alice", "bbbbbb", "t2", "from B")
            .await
            .unwrap();
        single
            .append_line("alice", "cccccc", "t3", "from C")
            .await
            .unwrap();
        single.merge("alice").await.unwrap();

        let a = incremental.read_transcript("alice").await.unwrap();
        let b = single.read_transcript("alice").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_merge_order_is_listing_order_not_timestamp_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        // Session "zz..." carries the older timestamp but lists last.
        store
            .append_line("alice", "zzzzzz", "25-Aug-2026 09:00:00", "older")
            .await
            .unwrap();
        store
            .append_line("alice", "aaaaaa", "25-Aug-2026 11:00:00", "newer")
            .await
            .unwrap();
        store.merge("alice").await.unwrap();

        let lines = store.read_transcript("alice").await.unwrap();
        assert_eq!(lines[0].body, "newer");
        assert_eq!(lines[1].body, "older");
    }

    #[tokio::test]
    async fn test_merge_does_not_swallow_other_clients() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "t1", "mine")
            .await
            .unwrap();
        store
            .append_line("alice2", "ef34gh", "t2", "not mine")
            .await
            .unwrap();

        store.merge("alice").await.unwrap();

        assert!(store.read_transcript("alice2").await.unwrap().is_empty());
        assert!(store
            .blobs
            .get("conversations/alice2_ef34gh.txt")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_merge_of_nothing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.merge("alice").await.unwrap(), 0);
        assert!(store.read_transcript("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_filters_and_keeps_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "25-Aug-2026 10:00:00", "hi")
            .await
            .unwrap();
        store
            .append_line("alice", "ab12cd", "25-Aug-2026 10:00:05", "hello world")
            .await
            .unwrap();

        let matches = store.search("alice", "hello").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].timestamp, "25-Aug-2026 10:00:05");
        assert_eq!(matches[0].body, "hello world");

        // Case-sensitive literal match.
        assert!(store.search("alice", "HELLO").await.unwrap().is_empty());
        assert!(store.search("alice", "zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_merges_outstanding_chunks_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "t1", "pending line")
            .await
            .unwrap();

        // No explicit merge: search must materialize the transcript.
        let matches = store.search("alice", "pending").await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!(store
            .blobs
            .get("conversations/alice_ab12cd.txt")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_multiline_body_is_truncated_at_newline() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "t1", "first\nsecond")
            .await
            .unwrap();
        store.merge("alice").await.unwrap();

        // The tail past the newline is not a parseable line and is
        // dropped on read.
        let lines = store.read_transcript("alice").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].body, "first");
    }

    #[tokio::test]
    async fn test_body_with_separator_survives() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .append_line("alice", "ab12cd", "t1", "left|||right")
            .await
            .unwrap();
        store.merge("alice").await.unwrap();

        let lines = store.read_transcript("alice").await.unwrap();
        assert_eq!(lines[0].body, "left|||right");
    }
}
