//! Single-attempt HTTP transport.
//!
//! [`HttpTransport`] performs exactly one request attempt and
//! classifies the outcome into a [`ResponseEnvelope`]. Retry and
//! authentication concerns live in the layers above; this one never
//! inspects tokens beyond attaching the bearer header it was handed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::envelope::{ErrorKind, ResponseEnvelope};
use crate::store::Secret;

/// Default per-attempt time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a raw error body carried into an envelope
/// message. Longer bodies are truncated to avoid leaking large or
/// sensitive responses into logs.
const MAX_ERROR_BODY: usize = 512;

/// HTTP verb supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One fully-described request attempt.
///
/// Cloneable so the retry layer can re-dispatch it and the client can
/// re-issue it with a fresh bearer token after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<Secret>,
    pub timeout: Duration,
}

impl ApiRequest {
    /// Create a request with the default timeout and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
            bearer: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Attach query parameters.
    pub fn with_query(mut self, query: &[(&str, &str)]) -> Self {
        self.query = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a bearer token.
    pub fn with_bearer(mut self, token: Secret) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Override the per-attempt time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A transport performs exactly one request attempt per call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(&self, request: &ApiRequest) -> ResponseEnvelope;
}

/// Transport over a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
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

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dispatch(&self, request: &ApiRequest) -> ResponseEnvelope {
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), request.url.clone())
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return classify_send_error(&e),
        };

        let status = response.status().as_u16();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Network
                };
                return ResponseEnvelope::failure(
                    kind,
                    format!("failed to read response body: {}", e),
                );
            }
        };

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            "request dispatched"
        );

        envelope_from_response(status, &bytes)
    }
}

fn classify_send_error(e: &reqwest::Error) -> ResponseEnvelope {
    let kind = if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_connect() {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    };
    ResponseEnvelope::failure(kind, e.to_string())
}

/// Build an envelope from a received status and raw body.
///
/// An undecodable body on a 2xx status is a parse failure with the raw
/// status preserved. Non-2xx responses are classified by status even
/// when their body is not JSON, so an HTML 401 page still drives the
/// refresh path.
fn envelope_from_response(status: u16, bytes: &[u8]) -> ResponseEnvelope {
    let data = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                if ErrorKind::from_status(status).is_none() {
                    return ResponseEnvelope::parse_failure(
                        status,
                        format!("malformed response body: {}", e),
                    );
                }
                None
            }
        }
    };

    let message = match ErrorKind::from_status(status) {
        None => None,
        Some(_) => extract_error_message(data.as_ref(), bytes),
    };

    ResponseEnvelope::from_status(status, data, message)
}

/// Pull a human-readable detail out of an error response.
fn extract_error_message(data: Option<&Value>, bytes: &[u8]) -> Option<String> {
    if let Some(value) = data {
        for field in ["message", "error_description", "error"] {
            if let Some(text) = value.get(field).and_then(Value::as_str) {
                return Some(text.to_string());
            }
        }
    }

    if bytes.is_empty() {
        return None;
    }
    let raw = String::from_utf8_lossy(bytes);
    let truncated = if raw.len() > MAX_ERROR_BODY {
        // Back off to a char boundary; slicing mid-codepoint panics.
        let mut end = MAX_ERROR_BODY;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated]", &raw[..end])
    } else {
        raw.into_owned()
    };
    Some(truncated)
}
