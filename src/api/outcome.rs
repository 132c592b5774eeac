//! Tagged outcome of a backend call, and the transport seam it crosses.
//!
//! Retry policy everywhere in the agent is a pure function of the
//! [`ApiOutcome`] tag: connectivity and server failures are worth retrying,
//! client failures are not.

use async_trait::async_trait;
use serde_json::Value;

/// Classified outcome of a single backend call.
#[derive(Debug, Clone)]
pub enum ApiOutcome {
    /// 2xx with a decoded JSON body.
    Success(Value),
    /// The endpoint was unreachable: DNS, connect, or timeout at the
    /// transport level, or a response that never arrived intact.
    Connectivity(String),
    /// The backend answered with a 5xx status.
    ServerError { status: u16, body: String },
    /// The backend answered with a 4xx status. Retrying the same request
    /// would fail the same way.
    ClientError { status: u16, body: String },
}

impl ApiOutcome {
    /// Whether the call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }

    /// Whether the failure is transient and worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiOutcome::Connectivity(_) | ApiOutcome::ServerError { .. }
        )
    }
}

/// A single outbound call against the control plane.
///
/// [`ApiClient`](crate::api::ApiClient) is the production implementation;
/// tests script outcomes in-process instead of hitting the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one call and classify the result. Never panics, never
    /// returns a transport-level `Err` — all outcomes are data.
    async fn call(&self, endpoint: &str, payload: Option<&Value>, method: &str) -> ApiOutcome;
}
