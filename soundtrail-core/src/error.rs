//! Top-level error type for Soundtrail.

use thiserror::Error;

use crate::store::StoreError;
use crate::token::{AuthError, TokenError};

/// Top-level error type encompassing session-surface failures.
///
/// Ordinary request failures never appear here; those travel through
/// [`ResponseEnvelope`](crate::envelope::ResponseEnvelope).
#[derive(Debug, Error)]
pub enum SoundtrailError {
    /// Error from secret storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from token retrieval.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// A token-granting flow (login, code exchange, refresh) failed.
    #[error("auth flow failed: {0}")]
    Auth(#[from] AuthError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}
