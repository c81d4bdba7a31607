//! JSON-RPC transport boundary.
//!
//! [`Transport`] is the only place the router performs I/O, and the seam tests
//! replace with fakes. [`HttpTransport`] speaks JSON-RPC 2.0 over HTTP POST.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, RouterError};

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'a str,
    pub method: &'a str,
    pub params: &'a [Value],
    pub id: u64,
}

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    /// `Some(Value::Null)` for an explicit `"result": null`, `None` when absent
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// `result` on success, the node's error otherwise. A `null` result is
    /// valid; a body with neither field is not a JSON-RPC response.
    pub fn into_result(self) -> Result<Value> {
        match (self.error, self.result) {
            (Some(error), _) => Err(RouterError::Node {
                code: error.code,
                message: error.message,
            }),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(RouterError::Transport(
                "invalid JSON-RPC response: missing result".to_string(),
            )),
        }
    }
}

/// Performs a single JSON-RPC call against one endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        url: &str,
        method: &str,
        params: &[Value],
        timeout: Duration,
    ) -> Result<Value>;
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, increasing JSON-RPC request id
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// reqwest-backed JSON-RPC transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        method: &str,
        params: &[Value],
        timeout: Duration,
    ) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: next_request_id(),
        };
        debug!(url = %url, method = %method, id = request.id, "sending JSON-RPC request");

        let resp = self
            .client
            .post(url)
            .json(&request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| classify(e, timeout))?;

        // Some nodes send JSON-RPC errors with a non-2xx status; prefer the envelope.
        if !status.is_success() {
            return match serde_json::from_str::<JsonRpcResponse>(&body) {
                Ok(rpc_resp) if rpc_resp.error.is_some() => rpc_resp.into_result(),
                _ => Err(RouterError::Transport(format!(
                    "HTTP {}: {}",
                    status,
                    truncate(&body, 200)
                ))),
            };
        }

        serde_json::from_str::<JsonRpcResponse>(&body)
            .map_err(|e| RouterError::Transport(format!("invalid JSON-RPC response: {}", e)))?
            .into_result()
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> RouterError {
    if e.is_timeout() {
        RouterError::Timeout(timeout.as_millis() as u64)
    } else {
        RouterError::Transport(e.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
