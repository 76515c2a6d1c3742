//! File-backed queue and blob implementations.
//!
//! Queue layout:
//! - ready/      : visible messages, claimable by any consumer
//! - leased/     : claimed messages, hidden until the lease deadline
//! - quarantine/ : claimed messages whose content failed to parse
//!
//! A claim is an atomic rename from ready/ into leased/, so exactly one
//! of any number of concurrent receivers wins a given message. The
//! lease deadline and claim token are encoded in the leased file's
//! name, making the claim and its lease a single atomic step: there is
//! no window in which a claimed message exists without a lease for a
//! concurrent reaper to misread. Expired leases are reaped back into
//! ready/ during receive scans, which is what makes redelivery (and
//! duplicate processing) possible after a slow handler.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::blob::BlobStore;
use super::queue::{QueueTransport, Receipt, ReceivedMessage};
use crate::error::{Error, Result};
use crate::protocol::Message;

const READY_DIR: &str = "ready";
const LEASED_DIR: &str = "leased";
const QUARANTINE_DIR: &str = "quarantine";

/// How often a long-polling receive rescans the ready directory.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// On-disk message envelope: wire attributes plus opaque body.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct StoredMessage {
    id: String,
    attributes: HashMap<String, String>,
    body: String,
}

/// Leased file name: `{id}.{deadline_ms}.{token}.json`.
fn lease_file_name(id: &str, deadline: i64, token: &str) -> String {
    format!("{}.{}.{}.json", id, deadline, token)
}

/// Parse a leased file name back into (id, deadline, token).
///
/// Anything that does not match the shape is not a lease and must be
/// left alone by the reaper.
fn parse_lease_name(name: &str) -> Option<(&str, i64, &str)> {
    let stem = name.strip_suffix(".json")?;
    let mut parts = stem.split('.');
    let id = parts.next()?;
    let deadline = parts.next()?.parse().ok()?;
    let token = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((id, deadline, token))
}

/// One shared queue over a directory.
#[derive(Debug, Clone)]
pub struct FsQueue {
    dir: PathBuf,
    /// Lease granted on claim.
    visibility: Duration,
}

impl FsQueue {
    /// Open (creating if needed) a queue at `dir`.
    pub fn open(dir: impl AsRef<Path>, visibility: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        for sub in [READY_DIR, LEASED_DIR, QUARANTINE_DIR] {
            fs::create_dir_all(dir.join(sub))
                .map_err(|e| Error::Transport(format!("cannot create queue dir: {}", e)))?;
        }
        Ok(Self { dir, visibility })
    }

    fn ready_path(&self, id: &str) -> PathBuf {
        self.dir.join(READY_DIR).join(format!("{}.json", id))
    }

    /// Message ids in the ready directory, in listing (enqueue) order.
    fn ready_ids(&self) -> Result<Vec<String>> {
        let dir = self.dir.join(READY_DIR);
        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&dir).map_err(|e| Error::Transport(format!("queue scan: {}", e)))?
        {
            let entry = entry.map_err(|e| Error::Transport(format!("queue scan: {}", e)))?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        // ULID file names sort by enqueue time.
        ids.sort();
        Ok(ids)
    }

    /// Move expired leases back to ready so they become claimable.
    fn reap_expired(&self) -> Result<()> {
        let now = now_ms();
        let leased = self.dir.join(LEASED_DIR);
        for entry in
            fs::read_dir(&leased).map_err(|e| Error::Transport(format!("lease scan: {}", e)))?
        {
            let entry = entry.map_err(|e| Error::Transport(format!("lease scan: {}", e)))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((id, deadline, _token)) = parse_lease_name(name) else {
                continue;
            };
            if deadline <= now {
                tracing::debug!("Lease expired for message {}, requeueing", id);
                // Atomic; a claimant still holding the old receipt
                // finds it stale afterwards.
                let _ = fs::rename(entry.path(), self.ready_path(id));
            }
        }
        Ok(())
    }

    /// Try to claim the oldest visible message without waiting.
    fn try_claim(&self) -> Result<Option<ReceivedMessage>> {
        self.reap_expired()?;

        for id in self.ready_ids()? {
            let ready = self.ready_path(&id);
            let deadline = now_ms() + self.visibility.as_millis() as i64;
            let token = ulid::Ulid::new().to_string();
            let leased = self
                .dir
                .join(LEASED_DIR)
                .join(lease_file_name(&id, deadline, &token));

            // The rename is the claim and records the lease in the same
            // step; losing the race just means some other consumer owns
            // this message now.
            if fs::rename(&ready, &leased).is_err() {
                continue;
            }

            let content = match fs::read_to_string(&leased) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Claimed message {} unreadable: {}", id, e);
                    continue;
                }
            };
            let stored: StoredMessage = match serde_json::from_str(&content) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Quarantining corrupt queue file {}: {}", id, e);
                    let _ = fs::rename(
                        &leased,
                        self.dir.join(QUARANTINE_DIR).join(format!("{}.json", id)),
                    );
                    continue;
                }
            };

            return Ok(Some(ReceivedMessage {
                attributes: stored.attributes,
                body: stored.body,
                receipt: Receipt {
                    message_id: id,
                    claim_token: token,
                },
            }));
        }

        Ok(None)
    }

    /// Locate the leased file for a receipt, verifying its claim token.
    fn find_claimed(&self, receipt: &Receipt) -> Result<PathBuf> {
        let leased = self.dir.join(LEASED_DIR);
        for entry in
            fs::read_dir(&leased).map_err(|e| Error::Transport(format!("lease scan: {}", e)))?
        {
            let entry = entry.map_err(|e| Error::Transport(format!("lease scan: {}", e)))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((id, _deadline, token)) = parse_lease_name(name) else {
                continue;
            };
            if id != receipt.message_id {
                continue;
            }
            if token != receipt.claim_token {
                return Err(Error::Transport(format!(
                    "stale receipt for message {}",
                    receipt.message_id
                )));
            }
            return Ok(entry.path());
        }
        Err(Error::Transport(format!(
            "message {} is no longer claimed",
            receipt.message_id
        )))
    }
}

#[async_trait::async_trait]
impl QueueTransport for FsQueue {
    async fn send(&self, message: &Message) -> Result<String> {
        let id = ulid::Ulid::new().to_string();
        let stored = StoredMessage {
            id: id.clone(),
            attributes: message.to_attributes(),
            body: message.body.clone(),
        };
        write_json(&self.ready_path(&id), &stored)?;
        tracing::debug!(
            "Sent message {} (client {}, session {})",
            id,
            message.client_name,
            message.session_id
        );
        Ok(id)
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(received) = self.try_claim()? {
                // The claim path itself never awaits; yield here so a
                // caller claiming in a loop cannot starve the runtime.
                tokio::task::yield_now().await;
                return Ok(Some(received));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(max_wait)).await;
        }
    }

    async fn delete(&self, receipt: &Receipt) -> Result<()> {
        let path = self.find_claimed(receipt)?;
        fs::remove_file(&path)
            .map_err(|e| Error::Transport(format!("delete {}: {}", receipt.message_id, e)))?;
        tracing::debug!("Deleted message {}", receipt.message_id);
        Ok(())
    }

    async fn set_visibility(&self, receipt: &Receipt, timeout: Duration) -> Result<()> {
        let path = self.find_claimed(receipt)?;

        if timeout.is_zero() {
            // Immediate release: back to ready, claim dissolved. The
            // message is re-filed under a fresh id at the tail of the
            // listing, otherwise a consumer that releases a message and
            // polls again claims the same one straight back and starves
            // whoever is actually waiting on it.
            let content = fs::read_to_string(&path)
                .map_err(|e| Error::Transport(format!("release {}: {}", receipt.message_id, e)))?;
            let mut stored: StoredMessage = serde_json::from_str(&content)
                .map_err(|e| Error::Transport(format!("corrupt leased message: {}", e)))?;
            stored.id = ulid::Ulid::new().to_string();
            write_json(&self.ready_path(&stored.id), &stored)?;
            let _ = fs::remove_file(&path);
            tracing::debug!("Released message {}", receipt.message_id);
        } else {
            // The deadline lives in the file name, so extending the
            // lease is a rename.
            let deadline = now_ms() + timeout.as_millis() as i64;
            let renamed = self.dir.join(LEASED_DIR).join(lease_file_name(
                &receipt.message_id,
                deadline,
                &receipt.claim_token,
            ));
            fs::rename(&path, &renamed).map_err(|e| {
                Error::Transport(format!("extend lease {}: {}", receipt.message_id, e))
            })?;
        }
        Ok(())
    }
}

/// Staging directory for in-flight blob puts; never listed.
const STAGING_DIR: &str = ".staging";

/// Blob store over a directory tree; keys use `/` separators.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a blob store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(STAGING_DIR))
            .map_err(|e| Error::Transport(format!("cannot create blob root: {}", e)))?;
        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|p| p == ".." || p.is_empty())
        {
            return Err(Error::Transport(format!("invalid blob key '{}'", key)));
        }
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> Result<()> {
        let entries =
            fs::read_dir(dir).map_err(|e| Error::Transport(format!("blob list: {}", e)))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::Transport(format!("blob list: {}", e)))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if rel.is_empty() && name == STAGING_DIR {
                continue;
            }
            let child_rel = if rel.is_empty() {
                name
            } else {
                format!("{}/{}", rel, name)
            };
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, &child_rel, out)?;
            } else {
                out.push(child_rel);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        // Listing order is lexicographic; callers get no stronger guarantee.
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Transport(format!("blob get {}: {}", key, e))),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Transport(format!("blob put {}: {}", key, e)))?;
        }
        // Stage outside the listed tree, then rename into place, so a
        // concurrent list never observes a partial object as a key.
        let tmp = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.tmp", ulid::Ulid::new()));
        fs::write(&tmp, bytes).map_err(|e| Error::Transport(format!("blob put {}: {}", key, e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Transport(format!("blob put {}: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Transport(format!("blob delete {}: {}", key, e))),
        }
    }
}

fn write_json(path: &Path, stored: &StoredMessage) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(stored)?;
    fs::write(&tmp, content).map_err(|e| Error::Transport(format!("queue write: {}", e)))?;
    fs::rename(&tmp, path).map_err(|e| Error::Transport(format!("queue write: {}", e)))?;
    Ok(())
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
