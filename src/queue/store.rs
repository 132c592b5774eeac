//! Persistence seam for the offline queue.
//!
//! The queue contract is load/replace-all: state is re-read before every
//! mutation and rewritten whole, so an abrupt termination never leaves a
//! partially-applied update. The on-disk layout is an implementation detail
//! of [`JsonFileStore`]; tests substitute [`MemoryStore`].

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;
use crate::queue::QueuedRequest;

/// Backend-agnostic persistence for the ordered request queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Load the full ordered queue.
    async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError>;

    /// Replace the persisted queue with exactly `entries`, in order.
    async fn replace(&self, entries: &[QueuedRequest]) -> Result<(), StoreError>;
}

/// Queue persisted as a single JSON array on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl QueueStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            // A missing or unreadable file is an empty queue, not a failure:
            // the queue must keep accepting work on a fresh install.
            Err(_) => return Ok(Vec::new()),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Queue file unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }

    async fn replace(&self, entries: &[QueuedRequest]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: self.path.clone(),
                    source,
                })?;
        }
        let raw = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<QueuedRequest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn replace(&self, entries: &[QueuedRequest]) -> Result<(), StoreError> {
        *self.entries.lock().unwrap() = entries.to_vec();
        Ok(())
    }
}
