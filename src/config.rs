//! Configuration loading for Parley.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the Parley home directory (~/.parley).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".parley"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from an explicit path, or ~/.parley/settings.json.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_settings_path()?,
    };

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(&path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings or fall back to defaults under ~/.parley.
pub fn load_settings_or_default(path: Option<&Path>) -> Settings {
    load_settings(path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.queues.inbox == settings.queues.outbox {
        return Err(Error::Config(
            "queues.inbox and queues.outbox must be distinct paths".to_string(),
        ));
    }
    if settings.queues.visibility_seconds == 0 {
        return Err(Error::Config(
            "queues.visibility_seconds must be at least 1".to_string(),
        ));
    }
    if settings.store.conversations_path.is_empty()
        || settings.store.conversations_path.contains("..")
    {
        return Err(Error::Config(format!(
            "store.conversations_path '{}' is not a valid blob prefix",
            settings.store.conversations_path
        )));
    }
    Ok(())
}

/// Shared queue endpoints and lease tuning.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct QueueSettings {
    /// Inbound (command) queue directory.
    pub inbox: PathBuf,
    /// Outbound (response) queue directory.
    pub outbox: PathBuf,
    /// Bounded long-poll wait per receive call.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
    /// Lease (visibility timeout) granted on claim.
    #[serde(default = "default_visibility_seconds")]
    pub visibility_seconds: u64,
}

fn default_wait_seconds() -> u64 {
    1
}

fn default_visibility_seconds() -> u64 {
    30
}

impl Default for QueueSettings {
    fn default() -> Self {
        let base = get_home_dir().unwrap_or_else(|_| PathBuf::from(".parley"));
        Self {
            inbox: base.join("queues").join("inbox"),
            outbox: base.join("queues").join("outbox"),
            wait_seconds: default_wait_seconds(),
            visibility_seconds: default_visibility_seconds(),
        }
    }
}

/// Blob store location and conversation key prefix.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoreSettings {
    /// Blob store root directory.
    pub root: PathBuf,
    /// Key prefix under which transcripts and chunks live.
    #[serde(default = "default_conversations_path")]
    pub conversations_path: String,
}

fn default_conversations_path() -> String {
    "conversations".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        let base = get_home_dir().unwrap_or_else(|_| PathBuf::from(".parley"));
        Self {
            root: base.join("blobs"),
            conversations_path: default_conversations_path(),
        }
    }
}

/// Client-side defaults for the CLI.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClientSettings {
    /// Client name attached to outgoing commands.
    #[serde(default = "default_client_name")]
    pub name: String,
    /// How long `send` waits for a correlated response.
    #[serde(default = "default_response_wait_seconds")]
    pub response_wait_seconds: u64,
}

fn default_client_name() -> String {
    "anonymous".to_string()
}

fn default_response_wait_seconds() -> u64 {
    10
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            response_wait_seconds: default_response_wait_seconds(),
        }
    }
}

/// Parley settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub queues: QueueSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub client: ClientSettings,
}
