//! Request-or-queue delivery for backend calls.
//!
//! Only payload-bearing, plausibly-transient failures are persisted for
//! replay. Read-only polls and invalid requests are not retried: queueing
//! them would silently amplify a bad request pattern.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::api::{ApiOutcome, Transport};
use crate::queue::{DrainReport, OfflineQueue};

/// A transport wrapper that falls back to the offline queue.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    queue: OfflineQueue,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn Transport>, queue: OfflineQueue) -> Self {
        Self { transport, queue }
    }

    /// Perform one call. On success the decoded response is returned. Every
    /// failure is absorbed here and reported as `None`; transient failures
    /// carrying a payload are queued for later replay first.
    pub async fn request(
        &self,
        endpoint: &str,
        payload: Option<Value>,
        method: &str,
    ) -> Option<Value> {
        let outcome = self.transport.call(endpoint, payload.as_ref(), method).await;

        match outcome {
            ApiOutcome::Success(value) => Some(value),
            ApiOutcome::Connectivity(reason) => {
                warn!(endpoint, %reason, "Backend unreachable");
                self.queue_if_payload(endpoint, payload, method).await;
                None
            }
            ApiOutcome::ServerError { status, body } => {
                warn!(endpoint, status, body = %body, "Backend error");
                self.queue_if_payload(endpoint, payload, method).await;
                None
            }
            ApiOutcome::ClientError { status, body } => {
                warn!(endpoint, status, body = %body, "Request rejected, not retrying");
                None
            }
        }
    }

    /// Replay whatever is queued, stopping at the first connectivity failure.
    pub async fn drain(&self) -> DrainReport {
        match self.queue.drain(self.transport.as_ref()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Failed to drain offline queue");
                DrainReport::default()
            }
        }
    }

    async fn queue_if_payload(&self, endpoint: &str, payload: Option<Value>, method: &str) {
        let Some(body) = payload else {
            return;
        };
        if let Err(e) = self.queue.enqueue(endpoint, body, method).await {
            warn!(endpoint, error = %e, "Failed to queue undelivered request");
        }
    }
}
