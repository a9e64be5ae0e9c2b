#![forbid(unsafe_code)]
//! Remote ADDRESS endpoint client — JSON-over-HTTP command forwarding.
//!
//! When an ADDRESS target has a registered remote endpoint, the engine
//! forwards each command to it instead of invoking a local handler.  This
//! crate provides:
//!
//! - **`RemoteEndpoint`** — per-target endpoint configuration (`url`, optional
//!   bearer token)
//! - **Wire types** — request body `{command}`, response body
//!   `{success, error?, result: {value?, error?}}`
//! - **`execute`** — POST a command and map transport failures
//! - **`normalize`** — turn a response body into `{rc, value, errortext}`
//!   (a pure function, testable without a network)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
//  Endpoint configuration
// ---------------------------------------------------------------------------

/// Remote endpoint configuration for one ADDRESS target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    /// Endpoint URL (commands are POSTed here).
    pub url: String,
    /// Optional bearer token sent in the `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

// ---------------------------------------------------------------------------
//  Wire types
// ---------------------------------------------------------------------------

/// Request body: the trimmed command text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// The command to execute on the remote side.
    pub command: String,
}

/// Response body from a remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Whether the remote command succeeded.
    #[serde(default = "default_success")]
    pub success: bool,
    /// Top-level error detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Nested result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,
}

fn default_success() -> bool {
    true
}

/// Nested `result` object in a remote response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Primary output value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Error detail reported inside the result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
//  Errors
// ---------------------------------------------------------------------------

/// Remote dispatch error.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The endpoint could not be reached (connection refused, DNS, ...).
    #[error("remote target unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint rejected the request with 401.
    #[error("remote target at {url} rejected credentials")]
    Unauthorized { url: String },

    /// Any other non-2xx response.
    #[error("remote target at {url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    /// The response body was not valid JSON.
    #[error("remote target at {url} returned an unreadable body: {source}")]
    BadBody {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RemoteError>;

// ---------------------------------------------------------------------------
//  Normalized outcome
// ---------------------------------------------------------------------------

/// A remote response reduced to the engine's standard variables.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOutcome {
    /// Return code: 0 on success, 1 when the response reports failure.
    pub rc: i64,
    /// Primary output: the nested `result.value` if present, otherwise the
    /// whole response body.
    pub value: Value,
    /// Error detail, present only on failure.
    pub errortext: Option<String>,
}

/// Reduce a response body to `{rc, value, errortext}`.
///
/// RC is 0 unless the response's `success` is false or its nested
/// `result.error` is set, in which case it is 1.
pub fn normalize(body: &Value) -> RemoteOutcome {
    let parsed: CommandResponse =
        serde_json::from_value(body.clone()).unwrap_or(CommandResponse {
            success: true,
            error: None,
            result: None,
        });

    let nested_error = parsed.result.as_ref().and_then(|r| r.error.clone());
    let failed = !parsed.success || nested_error.is_some();

    let value = parsed
        .result
        .as_ref()
        .and_then(|r| r.value.clone())
        .unwrap_or_else(|| body.clone());

    RemoteOutcome {
        rc: if failed { 1 } else { 0 },
        value,
        errortext: if failed {
            parsed.error.or(nested_error)
        } else {
            None
        },
    }
}

// ---------------------------------------------------------------------------
//  Client
// ---------------------------------------------------------------------------

/// Shared HTTP client for remote dispatch.  Cheap to clone; connections are
/// pooled underneath.
#[derive(Debug, Clone, Default)]
pub struct RemoteClient {
    inner: reqwest::Client,
}

impl RemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// POST a command to an endpoint and normalize the response.
    pub async fn execute(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
    ) -> Result<RemoteOutcome> {
        execute(&self.inner, endpoint, command).await
    }
}

/// POST a command to a remote endpoint and normalize the response.
pub async fn execute(
    client: &reqwest::Client,
    endpoint: &RemoteEndpoint,
    command: &str,
) -> Result<RemoteOutcome> {
    let mut request = client.post(&endpoint.url).json(&CommandRequest {
        command: command.to_string(),
    });
    if let Some(token) = &endpoint.auth_token {
        request = request.bearer_auth(token);
    }

    tracing::debug!(url = %endpoint.url, "forwarding command to remote target");

    let response = request.send().await.map_err(|e| {
        if e.is_connect() {
            RemoteError::Unreachable {
                url: endpoint.url.clone(),
                source: e,
            }
        } else {
            RemoteError::Http {
                url: endpoint.url.clone(),
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            }
        }
    })?;

    let status = response.status();
    if status.as_u16() == 401 {
        return Err(RemoteError::Unauthorized {
            url: endpoint.url.clone(),
        });
    }
    if !status.is_success() {
        return Err(RemoteError::Http {
            url: endpoint.url.clone(),
            status: status.as_u16(),
        });
    }

    let body: Value = response.json().await.map_err(|e| RemoteError::BadBody {
        url: endpoint.url.clone(),
        source: e,
    })?;

    Ok(normalize(&body))
}

// ---------------------------------------------------------------------------
//  Tests
// ---------------------------------------------------------------------------
