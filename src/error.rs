//! Error types for taskbridge.
//!
//! Only local infrastructure failures are errors. Network outcomes are
//! classified data ([`crate::api::ApiOutcome`]) and task execution failures
//! are results ([`crate::tasks::TaskResult`]) — neither propagates here.

use std::path::PathBuf;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("Liveness error: {0}")]
    Liveness(#[from] LivenessError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Offline queue persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write queue file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Liveness marker errors.
#[derive(Debug, thiserror::Error)]
pub enum LivenessError {
    #[error("Worker for identity {identity} is already running (pid {pid})")]
    AlreadyRunning { identity: String, pid: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
