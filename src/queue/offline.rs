//! The offline queue itself: bounded, ordered, replayable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiOutcome, Transport};
use crate::error::StoreError;
use crate::queue::QueueStore;

/// Maximum number of queued requests kept on disk. Appending past this
/// bound evicts the oldest entries first: backend state referenced by very
/// old requests may already be superseded.
pub const QUEUE_CAPACITY: usize = 500;

/// An outbound call that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub endpoint: String,
    pub payload: Value,
    pub method: String,
    pub queued_at: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn new(endpoint: &str, payload: Value, method: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            payload,
            method: method.to_string(),
            queued_at: Utc::now(),
        }
    }
}

/// What one replay attempt accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries delivered to the backend.
    pub drained: usize,
    /// Entries discarded as permanently undeliverable (4xx).
    pub dropped: usize,
    /// Entries still queued after the attempt.
    pub kept: usize,
    /// Whether replay stopped early on a connectivity failure.
    pub halted: bool,
}

/// FIFO queue of undelivered requests behind a swappable store.
///
/// State is loaded fresh on every mutation and rewritten whole, so each
/// enqueue or drain is atomic with respect to this worker.
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            capacity: QUEUE_CAPACITY,
        }
    }

    /// Override the capacity bound. Used by tests.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Append one undelivered request, evicting the oldest entries when the
    /// queue would exceed capacity. Returns the resulting queue length.
    pub async fn enqueue(
        &self,
        endpoint: &str,
        payload: Value,
        method: &str,
    ) -> Result<usize, StoreError> {
        let mut entries = self.store.load().await?;
        entries.push(QueuedRequest::new(endpoint, payload, method));

        if entries.len() > self.capacity {
            let dropped = entries.len() - self.capacity;
            entries.drain(..dropped);
            warn!(dropped, "Offline queue full, dropped oldest entries");
        }

        self.store.replace(&entries).await?;
        info!(endpoint, pending = entries.len(), "Queued request for later delivery");
        Ok(entries.len())
    }

    /// Number of requests waiting for delivery.
    pub async fn pending(&self) -> Result<usize, StoreError> {
        Ok(self.store.load().await?.len())
    }

    /// Replay queued requests strictly in insertion order.
    ///
    /// A connectivity failure halts the whole attempt: the failing entry and
    /// everything after it stay queued, in order, for next time. A 5xx keeps
    /// the entry and moves on; a 4xx drops it and moves on — the request
    /// itself is invalid and would never succeed. The store is replaced with
    /// exactly the set of entries that must still be retried.
    pub async fn drain(&self, transport: &dyn Transport) -> Result<DrainReport, StoreError> {
        let entries = self.store.load().await?;
        if entries.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut remaining: Vec<QueuedRequest> = Vec::new();
        let mut report = DrainReport::default();

        for (idx, entry) in entries.iter().enumerate() {
            match transport
                .call(&entry.endpoint, Some(&entry.payload), &entry.method)
                .await
            {
                ApiOutcome::Success(_) => {
                    report.drained += 1;
                }
                ApiOutcome::Connectivity(reason) => {
                    debug!(%reason, "Backend still unreachable, keeping remaining entries");
                    remaining.extend_from_slice(&entries[idx..]);
                    report.halted = true;
                    break;
                }
                ApiOutcome::ServerError { status, .. } => {
                    debug!(status, endpoint = %entry.endpoint, "Server error on replay, keeping entry");
                    remaining.push(entry.clone());
                }
                ApiOutcome::ClientError { status, body } => {
                    warn!(status, body = %body, endpoint = %entry.endpoint, "Request rejected on replay, dropping entry");
                    report.dropped += 1;
                }
            }
        }

        report.kept = remaining.len();
        if report.drained > 0 {
            info!(count = report.drained, "Drained queued requests");
        }
        self.store.replace(&remaining).await?;
        Ok(report)
    }
}
