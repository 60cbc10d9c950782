//! Identity-domain model types.
//!
//! This module defines:
//! - [`ProviderId`] - Identifier for a connected music provider (e.g., "spotify")
//! - [`Domain`] - A credential scope: the first-party account or one provider
//! - [`CredentialField`] - The individual fields persisted for a token pair

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a music-streaming provider (e.g., "spotify", "tidal").
///
/// Provider IDs are normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(String);

impl ProviderId {
    /// Create a new provider ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_lowercase())
    }

    /// Get the provider ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A credential scope with its own token pair and refresh endpoint.
///
/// The first-party backend account and every connected music provider
/// are independent domains: each owns a token pair, and a refresh in
/// one never touches the credentials of another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// The first-party Soundtrail backend account.
    Account,
    /// A connected music-streaming provider.
    Provider(ProviderId),
}

impl Domain {
    /// The string tag used in storage keys and logs.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Account => "account",
            Self::Provider(id) => id.as_str(),
        }
    }

    /// Whether this is the first-party account domain.
    ///
    /// An unrecoverable refresh failure here invalidates every other
    /// domain's session as well.
    pub fn is_account(&self) -> bool {
        matches!(self, Self::Account)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fields a token pair is split into when persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    /// Short-lived access token.
    AccessToken,
    /// Long-lived refresh token.
    RefreshToken,
    /// Unix timestamp of access-token expiry.
    ExpiresAt,
}

impl CredentialField {
    /// All persisted fields, in the order they are cleared on logout.
    pub const ALL: [CredentialField; 3] = [
        CredentialField::AccessToken,
        CredentialField::RefreshToken,
        CredentialField::ExpiresAt,
    ];

    /// Get the field name used in storage keys.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::ExpiresAt => "expires_at",
        }
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the storage key for a domain-scoped credential field.
///
/// Account keys are `soundtrail/account/{field}`; provider keys are
/// `soundtrail/provider/{id}/{field}`. The extra segment keeps a
/// provider registered under the id "account" from sharing keys with
/// the account domain, whose lifecycle manager must stay the sole
/// writer of them.
pub fn storage_key(domain: &Domain, field: CredentialField) -> String {
    match domain {
        Domain::Account => format!("soundtrail/account/{}", field),
        Domain::Provider(id) => format!("soundtrail/provider/{}/{}", id, field),
    }
}
