//! Normalized request outcomes.
//!
//! Every operation of the client resolves to a [`ResponseEnvelope`];
//! ordinary failures are reported through the envelope rather than
//! through `Err` values, so callers always get a uniform shape to
//! render or inspect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classified failure kind for a request outcome.
///
/// `Network` and `Timeout` are transient and eligible for local retry;
/// everything else is rooted in the request itself or the server's
/// view of it and is returned as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Host unreachable, connection refused or reset.
    Network,
    /// The per-attempt time budget was exceeded.
    Timeout,
    /// The response body could not be decoded.
    Parse,
    /// A 4xx status other than 401.
    ClientError,
    /// A 5xx status.
    ServerError,
    /// HTTP 401; drives the one-shot refresh-and-retry.
    Unauthorized,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Whether this failure class is expected to succeed if retried.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Classify a received HTTP status code.
    ///
    /// Returns `None` for the 2xx success range.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(Self::Unauthorized),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => Some(Self::Unknown),
        }
    }
}

/// The normalized outcome of a single logical request.
///
/// Invariant: `success` is `true` iff `error` is `None` and `status`
/// is in the 2xx range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Whether the request completed with a success status.
    pub success: bool,

    /// HTTP status code, present once a transport-level response was
    /// received (including for parse failures).
    pub status: Option<u16>,

    /// Parsed response body. The client never interprets this beyond
    /// JSON decoding; domain schema belongs to the caller.
    pub data: Option<Value>,

    /// Classified failure kind, absent on success.
    pub error: Option<ErrorKind>,

    /// Human-readable detail for diagnostics and UI surfaces.
    pub message: Option<String>,
}

impl ResponseEnvelope {
    /// Build a success envelope for a 2xx response.
    pub fn ok(status: u16, data: Option<Value>) -> Self {
        debug_assert!(ErrorKind::from_status(status).is_none());
        Self {
            success: true,
            status: Some(status),
            data,
            error: None,
            message: None,
        }
    }

    /// Build an envelope from a received status code and decoded body.
    pub fn from_status(status: u16, data: Option<Value>, message: Option<String>) -> Self {
        match ErrorKind::from_status(status) {
            None => Self {
                success: true,
                status: Some(status),
                data,
                error: None,
                message,
            },
            Some(kind) => Self {
                success: false,
                status: Some(status),
                data,
                error: Some(kind),
                message,
            },
        }
    }

    /// Build a failure envelope with no transport-level response.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            data: None,
            error: Some(kind),
            message: Some(message.into()),
        }
    }

    /// Build a parse-failure envelope, preserving the raw status.
    pub fn parse_failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: Some(status),
            data: None,
            error: Some(ErrorKind::Parse),
            message: Some(message.into()),
        }
    }

    /// Whether this outcome is an authorization failure.
    pub fn is_unauthorized(&self) -> bool {
        self.error == Some(ErrorKind::Unauthorized)
    }

    /// Whether this outcome is eligible for transparent retry.
    pub fn is_transient(&self) -> bool {
        self.error.is_some_and(ErrorKind::is_transient)
    }

    /// Decode the `data` payload into a typed value.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
