//! # rpc: JSON-RPC transport to the controller
//!
//! [`JsonRpcClient::call`] sends one `{method, params, id}` request, authenticates with a
//! bearer token and returns `result[0].data`. Failures are classified into
//! [`RpcError`] variants:
//!
//! - HTTP 401/403 become [`RpcError::Auth`] and are never retried.
//! - Connect errors, timeouts, HTTP 429 and 5xx are retried with exponential backoff
//!   and surface as [`RpcError::Transient`] once the attempts run out.
//! - Anything else unexpected (other statuses, non-JSON bodies, missing `result`,
//!   non-zero status codes) is a [`RpcError::Protocol`].
//!
//! All waiting (requests and backoff sleeps) observes the cancellation token.

use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{ControllerConfig, RetryPolicy};
use crate::error::{RpcError, SyncError};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: [RpcParams<'a>; 1],
    id: u64,
}

#[derive(Debug, Serialize)]
struct RpcParams<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Vec<RpcResult>>,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    #[serde(default)]
    status: Option<RpcStatus>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Outcome of one HTTP attempt, before retry policy is applied.
enum Attempt {
    Done(Value),
    Retry(String),
    Fail(RpcError),
}

pub struct JsonRpcClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Builds the client. Disabling TLS verification is only done when the config says so,
    /// and it is logged.
    pub fn new(config: &ControllerConfig, cancel: CancellationToken) -> Result<Self, SyncError> {
        let endpoint = config.endpoint()?;
        if !config.verify_tls {
            warn!(
                endpoint = %endpoint,
                "Building controller client with TLS certificate verification disabled"
            );
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                error!(error = ?e, "Failed to build HTTP client");
                SyncError::Client(e.to_string())
            })?;
        debug!(endpoint = %endpoint, verify_tls = config.verify_tls, "JSON-RPC client ready");
        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            retry: config.retry,
            cancel,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Issues `method` against the controller resource `url`, retrying transient failures.
    pub async fn call(&self, method: &str, url: &str, data: Option<Value>) -> Result<Value, RpcError> {
        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(RpcError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
                outcome = self.attempt(method, url, data.as_ref()) => outcome,
            };

            match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(e) => {
                    error!(method, url, error = %e, "Controller call failed");
                    return Err(e);
                }
                Attempt::Retry(message) => {
                    warn!(
                        method,
                        url,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %message,
                        "Transient controller failure"
                    );
                    last_error = message;
                }
            }

            if attempt < self.retry.max_attempts {
                let backoff = self.retry.backoff_after(attempt);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(RpcError::Transient {
            attempts: self.retry.max_attempts,
            message: last_error,
        })
    }

    async fn attempt(&self, method: &str, url: &str, data: Option<&Value>) -> Attempt {
        let request = RpcRequest {
            method,
            params: [RpcParams { url, data }],
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!(method, url, id = request.id, "Sending JSON-RPC request");

        let response = match self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Attempt::Retry(format!("request failed: {e}")),
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Attempt::Fail(RpcError::Auth {
                status: status.as_u16(),
            });
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Retry(format!("HTTP {status}"));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Attempt::Retry(format!("failed to read response body: {e}")),
        };
        if !status.is_success() {
            return Attempt::Fail(RpcError::Protocol(format!("unexpected HTTP {status}: {body}")));
        }

        match parse_response(&body) {
            Ok(value) => Attempt::Done(value),
            Err(e) => Attempt::Fail(e),
        }
    }
}

/// Extracts `result[0].data` from a raw JSON-RPC response body.
fn parse_response(body: &str) -> Result<Value, RpcError> {
    let response: RpcResponse = serde_json::from_str(body)
        .map_err(|e| RpcError::Protocol(format!("response is not valid JSON-RPC: {e}")))?;
    let first = response
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| RpcError::Protocol("response has no 'result' entry".to_string()))?;
    if let Some(status) = first.status {
        if status.code != 0 {
            return Err(RpcError::Protocol(format!(
                "controller status {}: {}",
                status.code, status.message
            )));
        }
    }
    Ok(first.data)
}
