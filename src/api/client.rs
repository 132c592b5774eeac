//! reqwest-backed transport for the control plane.
//!
//! Every call carries the project anon key plus the identity-scoped
//! connection token; outcomes are classified by status class so callers
//! never see a raw HTTP error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::api::{ApiOutcome, Transport};
use crate::config::Config;

/// Per-request timeout for backend calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the identity-scoped worker credential.
const TOKEN_HEADER: &str = "x-connection-token";

/// Maximum error-body length kept in an outcome.
const BODY_SNIPPET_LEN: usize = 200;

/// HTTP client for the control plane's function endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: SecretString,
    connection_token: SecretString,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            connection_token: config.connection_token.clone(),
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/functions/v1/{endpoint}", self.base_url)
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn call(&self, endpoint: &str, payload: Option<&Value>, method: &str) -> ApiOutcome {
        let method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::POST);

        let mut request = self
            .http
            .request(method, self.endpoint_url(endpoint))
            .timeout(REQUEST_TIMEOUT)
            .header("apikey", self.anon_key.expose_secret())
            .header(
                "Authorization",
                format!("Bearer {}", self.anon_key.expose_secret()),
            )
            .header(TOKEN_HEADER, self.connection_token.expose_secret());

        if let Some(body) = payload {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            // Anything that failed before a status line arrived is a
            // transport-level failure.
            Err(e) => return ApiOutcome::Connectivity(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            match response.json::<Value>().await {
                Ok(value) => ApiOutcome::Success(value),
                // The connection died or the body was garbage mid-transfer;
                // treated like an unreachable endpoint so the request is
                // retried rather than discarded.
                Err(e) => ApiOutcome::Connectivity(format!("failed to decode response: {e}")),
            }
        } else {
            let body = snippet(&response.text().await.unwrap_or_default());
            if status.is_server_error() {
                ApiOutcome::ServerError {
                    status: status.as_u16(),
                    body,
                }
            } else {
                ApiOutcome::ClientError {
                    status: status.as_u16(),
                    body,
                }
            }
        }
    }
}

/// Keep the first part of an error body for logs and outcomes.
fn snippet(s: &str) -> String {
    if s.chars().count() <= BODY_SNIPPET_LEN {
        s.to_string()
    } else {
        s.chars().take(BODY_SNIPPET_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn test_config(backend_url: &str) -> Config {
        Config {
            backend_url: backend_url.to_string(),
            anon_key: SecretString::from("anon-key"),
            connection_token: SecretString::from("tok_123"),
            poll_interval: Duration::from_secs(5),
            data_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn endpoint_url_joins_function_path() {
        let client = ApiClient::new(&test_config("https://api.example.com"));
        assert_eq!(
            client.endpoint_url("agent-task-queue"),
            "https://api.example.com/functions/v1/agent-task-queue"
        );
    }

    #[test]
    fn endpoint_url_strips_trailing_slash() {
        let client = ApiClient::new(&test_config("https://api.example.com/"));
        assert_eq!(
            client.endpoint_url("agent-task-result"),
            "https://api.example.com/functions/v1/agent-task-result"
        );
    }

    #[test]
    fn snippet_keeps_short_bodies() {
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn snippet_cuts_long_bodies() {
        let long = "x".repeat(1000);
        assert_eq!(snippet(&long).chars().count(), BODY_SNIPPET_LEN);
    }

    #[tokio::test]
    async fn unreachable_endpoint_classifies_as_connectivity() {
        // Port 1 is never listening locally.
        let client = ApiClient::new(&test_config("http://127.0.0.1:1"));
        let outcome = client
            .call("agent-task-queue", Some(&serde_json::json!({})), "POST")
            .await;
        assert!(matches!(outcome, ApiOutcome::Connectivity(_)));
    }

    #[tokio::test]
    async fn malformed_method_falls_back_to_post() {
        // "BAD METHOD" is not a valid HTTP token, so the call goes out as a
        // POST; classification still works.
        let client = ApiClient::new(&test_config("http://127.0.0.1:1"));
        let outcome = client.call("agent-task-queue", None, "BAD METHOD").await;
        assert!(matches!(outcome, ApiOutcome::Connectivity(_)));
    }
}
