//! Token pairs and the token-granting error taxonomy.
//!
//! This module provides:
//! - [`TokenPair`] - Access/refresh tokens plus expiry for one domain
//! - [`AuthState`] - Observable state of a domain's credential lifecycle
//! - [`AuthError`] - Failures of token-granting flows (login, code
//!   exchange, refresh)
//! - [`TokenError`] - Failures of token retrieval
//! - [`RefreshEndpoint`] - Seam to the provider's refresh call

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Domain;
use crate::store::{Secret, StoreError};

/// Access and refresh tokens for a single identity domain.
///
/// Created on successful login, registration or code exchange; mutated
/// on every successful refresh; destroyed on logout or unrecoverable
/// refresh failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived bearer token attached to requests.
    pub access_token: Secret,

    /// Long-lived token used to obtain new access tokens. Most
    /// providers invalidate it after one use and issue a replacement.
    pub refresh_token: Option<Secret>,

    /// When the access token expires (None if unknown).
    pub expires_at: Option<DateTime<Utc>>,

    /// The identity domain this pair belongs to.
    pub domain: Domain,
}

impl TokenPair {
    /// Create a pair with just an access token.
    pub fn new(domain: Domain, access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: None,
            expires_at: None,
            domain,
        }
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token));
        self
    }

    /// Attach an expiry timestamp.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the access token has expired.
    ///
    /// Returns `false` if no expiry is set.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp < Utc::now()).unwrap_or(false)
    }

    /// Check if the access token expires within the given duration.
    pub fn expires_within(&self, duration: chrono::Duration) -> bool {
        self.expires_at
            .map(|exp| exp < Utc::now() + duration)
            .unwrap_or(false)
    }
}

/// Observable state of a domain's credential lifecycle.
///
/// `Unauthenticated → Authenticated → (Expired | RefreshInFlight) →
/// Authenticated | Unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// No token pair, or the pair was cleared.
    Unauthenticated,
    /// A non-expired access token exists.
    Authenticated,
    /// The access token has passed its expiry, or the server rejected
    /// it with a 401.
    Expired,
    /// A refresh call is outstanding; stale callers join it.
    RefreshInFlight,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
            Self::RefreshInFlight => "refresh_in_flight",
        };
        write!(f, "{}", s)
    }
}

/// Error from a token-granting flow (login, register, code exchange,
/// refresh).
///
/// Cloneable so a single refresh outcome can be shared among all
/// callers that joined the in-flight refresh.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The provider refused the presented credential (rejected refresh
    /// token, bad login, bad authorization code). Terminal for the
    /// domain until a fresh login/authorize flow runs.
    #[error("credential rejected: {message}")]
    Rejected { message: String },

    /// There is no refresh token to present. Terminal like
    /// [`AuthError::Rejected`].
    #[error("no refresh token stored")]
    MissingRefreshToken,

    /// The token endpoint could not be reached or answered with a
    /// server-side failure. The stored pair is kept so a later call
    /// can try again.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The token endpoint answered with an undecodable body.
    #[error("malformed token response: {message}")]
    Malformed { message: String },

    /// Persisting the new pair failed.
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl AuthError {
    /// Whether this failure invalidates the stored pair. Terminal
    /// failures move the domain to `Unauthenticated`; everything else
    /// leaves it `Expired` for a later attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::MissingRefreshToken)
    }
}

/// Error from token retrieval.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No credentials exist for the domain.
    #[error("no credentials for domain {domain}")]
    Unauthenticated { domain: Domain },

    /// The refresh that retrieval depended on failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Secret storage failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl TokenError {
    /// Whether the underlying failure destroyed the domain's session.
    pub fn is_terminal_auth_failure(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_terminal(),
            Self::Unauthenticated { .. } | Self::Store(_) => false,
        }
    }
}

/// Seam to a domain's refresh endpoint.
///
/// Implementations exchange a refresh token for a new [`TokenPair`].
/// When the provider omits a replacement refresh token, the lifecycle
/// manager retains the previous one; implementations just report what
/// the provider returned.
#[async_trait]
pub trait RefreshEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenPair, AuthError>;
}
