//! Identity-provider endpoint configuration and wire calls.
//!
//! Two families of token endpoints exist:
//! - [`AccountEndpoints`] - the first-party backend's JSON session API
//!   (login, register, refresh, revoke).
//! - [`ProviderTokenEndpoint`] - OAuth-style music providers using
//!   form-encoded grants (authorization-code exchange, refresh,
//!   best-effort revoke).
//!
//! Both implement [`RefreshEndpoint`] so a [`TokenLifecycle`] can
//! drive them uniformly. Capturing the authorization code itself
//! (browser dance, redirect) is outside this crate; callers hand the
//! finished code to [`ProviderTokenEndpoint::exchange_code`].
//!
//! [`TokenLifecycle`]: crate::lifecycle::TokenLifecycle

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::model::{Domain, ProviderId};
use crate::store::Secret;
use crate::token::{AuthError, RefreshEndpoint, TokenPair};
use crate::transport::DEFAULT_TIMEOUT;

/// Configuration for a music-streaming provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique identifier (e.g., "spotify").
    pub id: ProviderId,

    /// Human-readable name (e.g., "Spotify").
    pub name: String,

    /// Base URL of the provider's resource API.
    pub api_base: String,

    /// OAuth token endpoint URL.
    pub token_url: String,

    /// Optional token revocation endpoint URL.
    pub revoke_url: Option<String>,

    /// Redirect URI registered for the authorization-code flow.
    pub redirect_uri: Option<String>,

    /// Default OAuth scopes to request.
    #[serde(default)]
    pub default_scopes: Vec<String>,
}

impl ProviderConfig {
    pub fn new(
        id: impl Into<ProviderId>,
        name: impl Into<String>,
        api_base: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            api_base: api_base.into(),
            token_url: token_url.into(),
            revoke_url: None,
            redirect_uri: None,
            default_scopes: Vec::new(),
        }
    }

    pub fn with_revoke_url(mut self, url: impl Into<String>) -> Self {
        self.revoke_url = Some(url.into());
        self
    }

    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }
}

/// Token grant as the wire carries it, shared by both endpoint
/// families.
#[derive(Debug, Deserialize)]
struct WireTokenGrant {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl WireTokenGrant {
    fn into_pair(self, domain: Domain) -> TokenPair {
        let mut pair = TokenPair::new(domain, self.access_token);
        if let Some(refresh) = self.refresh_token {
            pair = pair.with_refresh_token(refresh);
        }
        if let Some(seconds) = self.expires_in {
            pair = pair.with_expiry(Utc::now() + chrono::Duration::seconds(seconds));
        }
        pair
    }
}

/// Classify a token-endpoint failure.
///
/// A 4xx means the presented credential was refused (terminal); 5xx
/// and transport-level failures are transient.
fn classify_grant_failure(status: u16, body: &str) -> AuthError {
    let message = grant_error_message(body).unwrap_or_else(|| format!("status {}", status));
    if (400..500).contains(&status) {
        AuthError::Rejected { message }
    } else {
        AuthError::Transport {
            message: format!("token endpoint returned {}: {}", status, message),
        }
    }
}

fn grant_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    for field in ["error_description", "message", "error"] {
        if let Some(text) = value.get(field).and_then(serde_json::Value::as_str) {
            return Some(text.to_string());
        }
    }
    None
}

fn classify_send_error(e: &reqwest::Error) -> AuthError {
    AuthError::Transport {
        message: e.to_string(),
    }
}

async fn decode_grant(response: reqwest::Response, domain: Domain) -> Result<TokenPair, AuthError> {
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| classify_send_error(&e))?;

    if !(200..300).contains(&status) {
        return Err(classify_grant_failure(status, &body));
    }

    let grant: WireTokenGrant =
        serde_json::from_str(&body).map_err(|e| AuthError::Malformed {
            message: e.to_string(),
        })?;
    Ok(grant.into_pair(domain))
}

/// First-party backend session endpoints.
///
/// Routes are derived from the backend base URL: `auth/login`,
/// `auth/register`, `auth/refresh`, `auth/logout`. All bodies are
/// JSON.
pub struct AccountEndpoints {
    base_url: Url,
    http: reqwest::Client,
}

impl AccountEndpoints {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn route(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url.join(path).map_err(|e| AuthError::Transport {
            message: format!("invalid endpoint url: {}", e),
        })
    }

    async fn session_grant(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<TokenPair, AuthError> {
        let url = self.route(path)?;
        let response = self
            .http
            .post(url)
            .timeout(DEFAULT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;
        decode_grant(response, Domain::Account).await
    }

    /// Exchange account credentials for an initial token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        self.session_grant("auth/login", json!({ "email": email, "password": password }))
            .await
    }

    /// Create an account and receive an initial token pair.
    pub async fn register(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        self.session_grant(
            "auth/register",
            json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Best-effort server-side session revocation.
    ///
    /// Failure is logged and swallowed; it must never block local
    /// logout.
    pub async fn revoke(&self, refresh_token: &Secret) {
        let url = match self.route("auth/logout") {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "skipping session revocation");
                return;
            }
        };

        let result = self
            .http
            .post(url)
            .timeout(DEFAULT_TIMEOUT)
            .json(&json!({ "refresh_token": refresh_token.expose() }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("server session revoked");
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "session revocation refused");
            }
            Err(e) => {
                tracing::warn!(error = %e, "session revocation unreachable");
            }
        }
    }
}

#[async_trait]
impl RefreshEndpoint for AccountEndpoints {
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenPair, AuthError> {
        self.session_grant(
            "auth/refresh",
            json!({ "refresh_token": refresh_token.expose() }),
        )
        .await
    }
}

/// OAuth-style token endpoint for one music provider.
pub struct ProviderTokenEndpoint {
    config: ProviderConfig,
    client_id: String,
    client_secret: Option<Secret>,
    http: reqwest::Client,
}

impl ProviderTokenEndpoint {
    pub fn new(config: ProviderConfig, client_id: impl Into<String>, client_secret: Option<Secret>) -> Self {
        Self {
            config,
            client_id: client_id.into(),
            client_secret,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn domain(&self) -> Domain {
        Domain::Provider(self.config.id.clone())
    }

    async fn token_grant(&self, mut form: Vec<(&str, String)>) -> Result<TokenPair, AuthError> {
        form.push(("client_id", self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose().to_string()));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .timeout(DEFAULT_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;
        decode_grant(response, self.domain()).await
    }

    /// Exchange an authorization code for an initial token pair.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenPair, AuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
        ];
        if let Some(redirect_uri) = &self.config.redirect_uri {
            form.push(("redirect_uri", redirect_uri.clone()));
        }
        self.token_grant(form).await
    }

    /// Best-effort token revocation; a provider without a revoke
    /// endpoint is skipped silently.
    pub async fn revoke(&self, token: &Secret) {
        let Some(revoke_url) = &self.config.revoke_url else {
            tracing::debug!(provider = %self.config.id, "provider has no revoke endpoint");
            return;
        };

        let mut form = vec![
            ("token", token.expose().to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose().to_string()));
        }

        let result = self
            .http
            .post(revoke_url)
            .timeout(DEFAULT_TIMEOUT)
            .form(&form)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(provider = %self.config.id, "provider token revoked");
            }
            Ok(response) => {
                tracing::warn!(
                    provider = %self.config.id,
                    status = %response.status(),
                    "provider revocation refused"
                );
            }
            Err(e) => {
                tracing::warn!(provider = %self.config.id, error = %e, "provider revocation unreachable");
            }
        }
    }
}

#[async_trait]
impl RefreshEndpoint for ProviderTokenEndpoint {
    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenPair, AuthError> {
        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose().to_string()),
        ];
        self.token_grant(form).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_failure_classification() {
        let rejected = classify_grant_failure(400, r#"{"error":"invalid_grant"}"#);
        assert!(matches!(rejected, AuthError::Rejected { .. }));

        let unauthorized = classify_grant_failure(401, "");
        assert!(matches!(unauthorized, AuthError::Rejected { .. }));

        let transient = classify_grant_failure(503, "");
        assert!(matches!(transient, AuthError::Transport { .. }));
    }

    #[test]
    fn test_grant_error_message_extraction() {
        let message =
            grant_error_message(r#"{"error":"invalid_grant","error_description":"expired"}"#);
        assert_eq!(message.as_deref(), Some("expired"));

        assert!(grant_error_message("<html>").is_none());
    }

    #[test]
    fn test_wire_grant_into_pair() {
        let grant = WireTokenGrant {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            expires_in: Some(3600),
        };
        let pair = grant.into_pair(Domain::Account);
        assert_eq!(pair.access_token.expose(), "a");
        assert!(pair.refresh_token.is_some());
        assert!(pair.expires_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_wire_grant_without_refresh_token() {
        let grant = WireTokenGrant {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        let pair = grant.into_pair(Domain::Account);
        assert!(pair.refresh_token.is_none());
        assert!(pair.expires_at.is_none());
    }
}
