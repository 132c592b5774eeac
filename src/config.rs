//! Agent configuration.
//!
//! Environment-first with an optional `config.json` under the data directory.
//! Values are parsed leniently with defaults; the settings the worker cannot
//! run without are validated explicitly before the loop starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default delay between poll cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the control plane.
    pub backend_url: String,
    /// Project-level anonymous key sent with every request.
    pub anon_key: SecretString,
    /// Identity-scoped token authorizing this worker.
    pub connection_token: SecretString,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Root directory for persisted state (queue file, liveness markers).
    pub data_dir: PathBuf,
}

/// On-disk shape of `config.json`. Every field is optional; the environment
/// wins over the file.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    backend_url: Option<String>,
    anon_key: Option<String>,
    connection_token: Option<String>,
    poll_interval_secs: Option<u64>,
}

impl Config {
    /// Load configuration from `TASKBRIDGE_*` environment variables, falling
    /// back to `config.json` in the data directory, then to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("TASKBRIDGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let file = read_config_file(&data_dir.join("config.json"))?;

        let backend_url = std::env::var("TASKBRIDGE_BACKEND_URL")
            .ok()
            .or(file.backend_url)
            .unwrap_or_default();

        let anon_key = std::env::var("TASKBRIDGE_ANON_KEY")
            .ok()
            .or(file.anon_key)
            .unwrap_or_default();

        let connection_token = std::env::var("TASKBRIDGE_CONNECTION_TOKEN")
            .ok()
            .or(file.connection_token)
            .unwrap_or_default();

        let poll_interval_secs = std::env::var("TASKBRIDGE_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(file.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        Ok(Self {
            backend_url,
            anon_key: SecretString::from(anon_key),
            connection_token: SecretString::from(connection_token),
            poll_interval: Duration::from_secs(poll_interval_secs),
            data_dir,
        })
    }

    /// Path of the offline queue file.
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("offline_queue.json")
    }

    /// Directory holding per-identity liveness markers.
    pub fn agents_dir(&self) -> PathBuf {
        self.data_dir.join("agents")
    }

    /// Check the settings the worker loop cannot run without.
    pub fn require_worker_settings(&self) -> Result<(), ConfigError> {
        if self.backend_url.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "backend_url".to_string(),
                hint: "Set TASKBRIDGE_BACKEND_URL or add backend_url to config.json".to_string(),
            });
        }
        if self.connection_token.expose_secret().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "connection_token".to_string(),
                hint: "Set TASKBRIDGE_CONNECTION_TOKEN or add connection_token to config.json"
                    .to_string(),
            });
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".taskbridge")
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
