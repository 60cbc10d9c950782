//! The authenticated API client.
//!
//! [`ApiClient`] is the only component application code calls for
//! backend I/O. It composes the retry policy with one token-lifecycle
//! manager per identity domain: verbs inject the current access token,
//! detect authorization failure, trigger refresh-and-retry exactly
//! once, and surface the final [`ResponseEnvelope`].
//!
//! The client is explicitly constructed and passed to callers; there
//! is no global instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::envelope::{ErrorKind, ResponseEnvelope};
use crate::error::SoundtrailError;
use crate::lifecycle::TokenLifecycle;
use crate::model::{Domain, ProviderId};
use crate::provider::{AccountEndpoints, ProviderConfig, ProviderTokenEndpoint};
use crate::retry::RetryPolicy;
use crate::store::{Secret, SecretStore, StoreError};
use crate::token::{AuthState, TokenError};
use crate::transport::{ApiRequest, DEFAULT_TIMEOUT, HttpTransport, Method, Transport};

/// Per-call options for the verb operations.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Which identity domain the request belongs to.
    pub domain: Domain,

    /// Whether the request must carry an access token. When false, a
    /// missing token downgrades to an anonymous request instead of
    /// failing.
    pub requires_auth: bool,

    /// Per-attempt time budget.
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn for_domain(domain: Domain) -> Self {
        Self {
            domain,
            requires_auth: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Mark the operation as not requiring authentication.
    pub fn anonymous(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::for_domain(Domain::Account)
    }
}

struct AccountSession {
    endpoints: Arc<AccountEndpoints>,
    lifecycle: Arc<TokenLifecycle>,
}

struct ProviderSession {
    endpoint: Arc<ProviderTokenEndpoint>,
    lifecycle: Arc<TokenLifecycle>,
    api_base: String,
}

/// Resilient authenticated API client.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    store: Arc<dyn SecretStore>,
    base_url: Url,
    account: AccountSession,
    providers: HashMap<ProviderId, ProviderSession>,
}

impl ApiClient {
    /// Create a client for the given backend base URL.
    pub fn new(base_url: Url, store: Arc<dyn SecretStore>) -> Self {
        let endpoints = Arc::new(AccountEndpoints::new(base_url.clone()));
        let lifecycle = Arc::new(TokenLifecycle::new(
            Domain::Account,
            Arc::clone(&store),
            endpoints.clone(),
        ));

        Self {
            transport: Arc::new(HttpTransport::new()),
            retry: RetryPolicy::default(),
            store,
            base_url,
            account: AccountSession {
                endpoints,
                lifecycle,
            },
            providers: HashMap::new(),
        }
    }

    /// Replace the transport (used by tests and instrumentation).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a music provider domain.
    pub fn with_provider(
        mut self,
        config: ProviderConfig,
        client_id: impl Into<String>,
        client_secret: Option<Secret>,
    ) -> Self {
        let api_base = config.api_base.clone();
        let id = config.id.clone();
        let endpoint = Arc::new(ProviderTokenEndpoint::new(config, client_id, client_secret));
        let lifecycle = Arc::new(TokenLifecycle::new(
            Domain::Provider(id.clone()),
            Arc::clone(&self.store),
            endpoint.clone(),
        ));

        self.providers.insert(
            id,
            ProviderSession {
                endpoint,
                lifecycle,
                api_base,
            },
        );
        self
    }

    /// Hydrate every domain's credentials from the secret store.
    pub async fn restore(&self) -> Result<(), StoreError> {
        self.account.lifecycle.load().await?;
        for session in self.providers.values() {
            session.lifecycle.load().await?;
        }
        Ok(())
    }

    // --- verb operations -------------------------------------------------

    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        opts: RequestOptions,
    ) -> ResponseEnvelope {
        match self.request(Method::Get, path, &opts) {
            Ok(request) => self.execute(request.with_query(query), &opts).await,
            Err(envelope) => envelope,
        }
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        opts: RequestOptions,
    ) -> ResponseEnvelope {
        match self.request(Method::Post, path, &opts) {
            Ok(request) => self.execute(request.with_body(body), &opts).await,
            Err(envelope) => envelope,
        }
    }

    pub async fn patch(
        &self,
        path: &str,
        body: serde_json::Value,
        opts: RequestOptions,
    ) -> ResponseEnvelope {
        match self.request(Method::Patch, path, &opts) {
            Ok(request) => self.execute(request.with_body(body), &opts).await,
            Err(envelope) => envelope,
        }
    }

    pub async fn delete(&self, path: &str, opts: RequestOptions) -> ResponseEnvelope {
        match self.request(Method::Delete, path, &opts) {
            Ok(request) => self.execute(request, &opts).await,
            Err(envelope) => envelope,
        }
    }

    // --- session surface -------------------------------------------------

    /// Exchange account credentials for a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), SoundtrailError> {
        let pair = self.account.endpoints.login(email, password).await?;
        self.account.lifecycle.install(pair).await?;
        Ok(())
    }

    /// Create an account and start a session.
    pub async fn register(&self, email: &str, password: &str) -> Result<(), SoundtrailError> {
        let pair = self.account.endpoints.register(email, password).await?;
        self.account.lifecycle.install(pair).await?;
        Ok(())
    }

    /// Log out of every domain.
    ///
    /// Server-side revocation is best-effort; local credentials are
    /// cleared regardless of its outcome.
    pub async fn logout(&self) {
        if let Some(refresh) = self.account.lifecycle.refresh_token() {
            self.account.endpoints.revoke(&refresh).await;
        }
        self.clear_all_sessions().await;
    }

    /// Whether a first-party account session exists (expired or not).
    pub fn is_authenticated(&self) -> bool {
        self.account.lifecycle.is_authenticated()
    }

    /// Lifecycle state for a domain, if the domain is configured.
    pub fn auth_state(&self, domain: &Domain) -> Option<AuthState> {
        self.lifecycle_for(domain).map(|l| l.state())
    }

    /// IDs of every configured music provider.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.keys().cloned().collect()
    }

    /// Exchange an authorization code for a provider session.
    ///
    /// The code itself comes from an external authorize flow; this
    /// client only performs the exchange.
    pub async fn connect(&self, provider: &ProviderId, code: &str) -> Result<(), SoundtrailError> {
        let session = self.provider_session(provider)?;
        let pair = session.endpoint.exchange_code(code).await?;
        session.lifecycle.install(pair).await?;
        Ok(())
    }

    /// Disconnect a provider: best-effort revocation, then clear its
    /// credentials.
    pub async fn disconnect(&self, provider: &ProviderId) -> Result<(), SoundtrailError> {
        let session = self.provider_session(provider)?;
        if let Some(refresh) = session.lifecycle.refresh_token() {
            session.endpoint.revoke(&refresh).await;
        }
        session.lifecycle.clear().await?;
        Ok(())
    }

    // --- internals -------------------------------------------------------

    fn provider_session(&self, provider: &ProviderId) -> Result<&ProviderSession, SoundtrailError> {
        self.providers
            .get(provider)
            .ok_or_else(|| SoundtrailError::Config {
                message: format!("provider not configured: {}", provider),
            })
    }

    fn lifecycle_for(&self, domain: &Domain) -> Option<&Arc<TokenLifecycle>> {
        match domain {
            Domain::Account => Some(&self.account.lifecycle),
            Domain::Provider(id) => self.providers.get(id).map(|s| &s.lifecycle),
        }
    }

    /// Build the request skeleton, resolving the path against the
    /// domain's base URL.
    fn request(
        &self,
        method: Method,
        path: &str,
        opts: &RequestOptions,
    ) -> Result<ApiRequest, ResponseEnvelope> {
        let base = match &opts.domain {
            Domain::Account => self.base_url.clone(),
            Domain::Provider(id) => {
                let session = self.providers.get(id).ok_or_else(|| {
                    ResponseEnvelope::failure(
                        ErrorKind::Unknown,
                        format!("provider not configured: {}", id),
                    )
                })?;
                Url::parse(&session.api_base).map_err(|e| {
                    ResponseEnvelope::failure(
                        ErrorKind::Unknown,
                        format!("invalid provider api base: {}", e),
                    )
                })?
            }
        };

        let url = base.join(path).map_err(|e| {
            ResponseEnvelope::failure(ErrorKind::Unknown, format!("invalid request path: {}", e))
        })?;

        Ok(ApiRequest::new(method, url).with_timeout(opts.timeout))
    }

    /// Run a request through the retry policy with token injection and
    /// the one-shot 401 refresh.
    async fn execute(&self, mut request: ApiRequest, opts: &RequestOptions) -> ResponseEnvelope {
        let Some(lifecycle) = self.lifecycle_for(&opts.domain) else {
            return ResponseEnvelope::failure(
                ErrorKind::Unknown,
                format!("domain not configured: {}", opts.domain),
            );
        };

        let mut token_attached = false;
        match lifecycle.current_access_token().await {
            Ok(token) => {
                request.bearer = Some(token);
                token_attached = true;
            }
            Err(err) => {
                self.note_token_failure(&opts.domain, &err).await;
                if opts.requires_auth {
                    // Fail without a network call rather than send a
                    // request the server is guaranteed to refuse.
                    return ResponseEnvelope::failure(ErrorKind::Unauthorized, err.to_string());
                }
            }
        }

        let mut envelope = self.retry.execute(self.transport.as_ref(), &request).await;

        // One-shot refresh-and-retry: a second 401 is surfaced as-is,
        // never looped on, so a misbehaving provider cannot trap us.
        if envelope.is_unauthorized() && token_attached {
            tracing::info!(domain = %opts.domain, "request unauthorized, attempting token refresh");
            lifecycle.force_expire();
            match lifecycle.current_access_token().await {
                Ok(token) => {
                    request.bearer = Some(token);
                    envelope = self.retry.execute(self.transport.as_ref(), &request).await;
                }
                Err(err) => {
                    self.note_token_failure(&opts.domain, &err).await;
                }
            }
        }

        envelope
    }

    /// React to a token-retrieval failure. An unrecoverable refresh
    /// failure on the account domain invalidates everything derived
    /// from the first-party session, so all domains are logged out
    /// locally.
    async fn note_token_failure(&self, domain: &Domain, err: &TokenError) {
        if domain.is_account() && err.is_terminal_auth_failure() {
            tracing::warn!(
                error = %err,
                "account session unrecoverable, forcing logout of all domains"
            );
            self.clear_all_sessions().await;
        }
    }

    async fn clear_all_sessions(&self) {
        if let Err(e) = self.account.lifecycle.clear().await {
            tracing::warn!(error = %e, "failed to clear account credentials");
        }
        for session in self.providers.values() {
            if let Err(e) = session.lifecycle.clear().await {
                tracing::warn!(
                    domain = %session.lifecycle.domain(),
                    error = %e,
                    "failed to clear provider credentials"
                );
            }
        }
        tracing::info!("logged out of all domains");
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("providers", &self.providers.len())
            .finish()
    }
}
