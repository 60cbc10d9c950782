//! Per-domain token lifecycle management.
//!
//! [`TokenLifecycle`] answers "give me a usable access token for this
//! domain" and absorbs refresh complexity behind that question. It is
//! the sole writer of its domain's secret-store keys, and it enforces
//! the one hard concurrency invariant of the system: at most one
//! refresh call is outstanding per domain, and every caller whose
//! token is simultaneously stale observes the same refresh outcome.
//!
//! The single-flight marker is a `watch` channel fed by a spawned
//! task. Late arrivals clone the receiver and await the shared
//! outcome instead of issuing their own refresh call, which would burn
//! the one-use refresh token most providers hand out. The spawned task
//! also guarantees the refresh completes and updates shared state even
//! if every waiter stops waiting.

use std::sync::Arc;

use chrono::DateTime;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::model::{CredentialField, Domain, storage_key};
use crate::store::{Secret, SecretStore, StoreError};
use crate::token::{AuthError, AuthState, RefreshEndpoint, TokenError, TokenPair};

/// Default expiry buffer in minutes.
///
/// Tokens are treated as expired this long before their actual expiry,
/// so a token never lapses between being fetched and being used.
const DEFAULT_EXPIRY_BUFFER_MINUTES: i64 = 5;

type RefreshOutcome = Result<TokenPair, AuthError>;
type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

struct LifecycleState {
    pair: Option<TokenPair>,
    /// Set when the server rejected a token this manager believed
    /// valid; cleared by the next refresh or install.
    force_expired: bool,
    inflight: Option<OutcomeReceiver>,
    /// Bumped by `clear()` so a refresh that completes after a logout
    /// cannot resurrect cleared credentials.
    epoch: u64,
}

/// Token lifecycle manager for one identity domain.
pub struct TokenLifecycle {
    domain: Domain,
    store: Arc<dyn SecretStore>,
    endpoint: Arc<dyn RefreshEndpoint>,
    expiry_buffer: chrono::Duration,
    state: Arc<Mutex<LifecycleState>>,
}

impl TokenLifecycle {
    /// Create a manager with the default expiry buffer.
    pub fn new(
        domain: Domain,
        store: Arc<dyn SecretStore>,
        endpoint: Arc<dyn RefreshEndpoint>,
    ) -> Self {
        Self {
            domain,
            store,
            endpoint,
            expiry_buffer: chrono::Duration::minutes(DEFAULT_EXPIRY_BUFFER_MINUTES),
            state: Arc::new(Mutex::new(LifecycleState {
                pair: None,
                force_expired: false,
                inflight: None,
                epoch: 0,
            })),
        }
    }

    /// Override the expiry buffer.
    pub fn with_expiry_buffer(mut self, minutes: i64) -> Self {
        self.expiry_buffer = chrono::Duration::minutes(minutes);
        self
    }

    /// The identity domain this manager owns.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Hydrate in-memory state from the secret store.
    ///
    /// Called once at startup; a missing access token leaves the
    /// domain unauthenticated.
    pub async fn load(&self) -> Result<(), StoreError> {
        let access = self
            .store
            .get(&storage_key(&self.domain, CredentialField::AccessToken))
            .await?;

        let Some(access_token) = access else {
            self.state.lock().pair = None;
            return Ok(());
        };

        let refresh_token = self
            .store
            .get(&storage_key(&self.domain, CredentialField::RefreshToken))
            .await?;
        let expires_at = self
            .store
            .get(&storage_key(&self.domain, CredentialField::ExpiresAt))
            .await?
            .and_then(|s| s.expose().parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let pair = TokenPair {
            access_token,
            refresh_token,
            expires_at,
            domain: self.domain.clone(),
        };

        tracing::debug!(domain = %self.domain, "restored credentials from store");
        let mut state = self.state.lock();
        state.pair = Some(pair);
        state.force_expired = false;
        Ok(())
    }

    /// Return a usable access token, refreshing if necessary.
    ///
    /// Returns the cached token immediately when it is present and
    /// outside the expiry buffer. Otherwise triggers (or joins) the
    /// single-flight refresh and returns its shared outcome.
    pub async fn current_access_token(&self) -> Result<Secret, TokenError> {
        enum Action {
            Cached(Secret),
            Join(OutcomeReceiver),
            Unauthenticated,
            NoRefreshToken,
        }

        let action = {
            let mut state = self.state.lock();
            if let Some(rx) = &state.inflight {
                Action::Join(rx.clone())
            } else {
                match &state.pair {
                    None => Action::Unauthenticated,
                    Some(pair)
                        if !state.force_expired
                            && !pair.expires_within(self.expiry_buffer) =>
                    {
                        Action::Cached(pair.access_token.clone())
                    }
                    Some(pair) => match pair.refresh_token.clone() {
                        Some(refresh_token) => {
                            Action::Join(self.spawn_refresh(&mut state, refresh_token))
                        }
                        None => Action::NoRefreshToken,
                    },
                }
            }
        };

        match action {
            Action::Cached(token) => {
                tracing::debug!(domain = %self.domain, "using cached access token");
                Ok(token)
            }
            Action::Unauthenticated => Err(TokenError::Unauthenticated {
                domain: self.domain.clone(),
            }),
            Action::NoRefreshToken => {
                tracing::error!(
                    domain = %self.domain,
                    "access token expired with no refresh token, clearing credentials"
                );
                self.clear().await?;
                Err(AuthError::MissingRefreshToken.into())
            }
            Action::Join(rx) => await_outcome(rx)
                .await
                .map(|pair| pair.access_token)
                .map_err(Into::into),
        }
    }

    /// Install a freshly granted pair (login, registration, code
    /// exchange) and persist it.
    pub async fn install(&self, pair: TokenPair) -> Result<(), StoreError> {
        debug_assert_eq!(pair.domain, self.domain);
        self.persist(&pair).await?;

        let mut state = self.state.lock();
        state.pair = Some(pair);
        state.force_expired = false;
        tracing::info!(domain = %self.domain, "credentials installed");
        Ok(())
    }

    /// Write all fields of a pair to the secret store.
    ///
    /// The access token is written last, so a partial write never
    /// leaves a usable access token without its companions.
    pub async fn persist(&self, pair: &TokenPair) -> Result<(), StoreError> {
        persist_pair(self.store.as_ref(), pair).await
    }

    /// Delete all domain-scoped store keys and reset to
    /// unauthenticated.
    pub async fn clear(&self) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock();
            state.pair = None;
            state.force_expired = false;
            state.inflight = None;
            state.epoch += 1;
        }
        delete_pair(self.store.as_ref(), &self.domain).await?;
        tracing::info!(domain = %self.domain, "credentials cleared");
        Ok(())
    }

    /// Mark the current access token as expired without waiting for
    /// the local clock. Used when a request came back 401 with a token
    /// this manager believed valid.
    pub fn force_expire(&self) {
        let mut state = self.state.lock();
        if state.pair.is_some() {
            state.force_expired = true;
            tracing::info!(domain = %self.domain, "access token rejected by server, marked expired");
        }
    }

    /// Snapshot of the lifecycle state machine.
    pub fn state(&self) -> AuthState {
        let state = self.state.lock();
        if state.inflight.is_some() {
            return AuthState::RefreshInFlight;
        }
        match &state.pair {
            None => AuthState::Unauthenticated,
            Some(pair) if state.force_expired || pair.expires_within(self.expiry_buffer) => {
                AuthState::Expired
            }
            Some(_) => AuthState::Authenticated,
        }
    }

    /// Whether a token pair exists for this domain (expired or not).
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().pair.is_some()
    }

    /// The currently held refresh token, if any. Used for best-effort
    /// revocation on logout.
    pub fn refresh_token(&self) -> Option<Secret> {
        self.state
            .lock()
            .pair
            .as_ref()
            .and_then(|pair| pair.refresh_token.clone())
    }

    /// Spawn the single-flight refresh task and register its receiver.
    ///
    /// Must be called with the state lock held and no refresh in
    /// flight.
    fn spawn_refresh(&self, state: &mut LifecycleState, refresh_token: Secret) -> OutcomeReceiver {
        let (tx, rx) = watch::channel(None);
        state.inflight = Some(rx.clone());

        let epoch = state.epoch;
        let domain = self.domain.clone();
        let store = Arc::clone(&self.store);
        let endpoint = Arc::clone(&self.endpoint);
        let shared = Arc::clone(&self.state);

        tokio::spawn(async move {
            tracing::info!(domain = %domain, "access token stale, refreshing");
            let outcome =
                run_refresh(&domain, store.as_ref(), endpoint.as_ref(), refresh_token).await;

            let cleared_underneath = {
                let mut state = shared.lock();
                if state.epoch == epoch {
                    match &outcome {
                        Ok(pair) => {
                            state.pair = Some(pair.clone());
                            state.force_expired = false;
                        }
                        Err(e) if e.is_terminal() => {
                            state.pair = None;
                            state.force_expired = false;
                        }
                        Err(_) => {}
                    }
                    state.inflight = None;
                    false
                } else {
                    true
                }
            };

            if cleared_underneath && outcome.is_ok() {
                // A logout ran while this refresh was in flight; the
                // pair it persisted must not outlive the logout.
                let _ = delete_pair(store.as_ref(), &domain).await;
            }

            let _ = tx.send(Some(outcome));
        });

        rx
    }
}

impl std::fmt::Debug for TokenLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("domain", &self.domain)
            .field("state", &self.state())
            .finish()
    }
}

/// Perform the refresh call and reconcile the store with its outcome.
async fn run_refresh(
    domain: &Domain,
    store: &dyn SecretStore,
    endpoint: &dyn RefreshEndpoint,
    refresh_token: Secret,
) -> RefreshOutcome {
    match endpoint.refresh(&refresh_token).await {
        Ok(mut pair) => {
            if pair.refresh_token.is_none() {
                // The provider omitted a replacement; retain the
                // previous refresh token rather than discarding it.
                pair.refresh_token = Some(refresh_token);
            }
            persist_pair(store, &pair)
                .await
                .map_err(|e| AuthError::Storage {
                    message: e.to_string(),
                })?;
            tracing::info!(domain = %domain, "access token refreshed");
            Ok(pair)
        }
        Err(e) => {
            if e.is_terminal() {
                tracing::error!(domain = %domain, error = %e, "refresh rejected, clearing credentials");
                let _ = delete_pair(store, domain).await;
            } else {
                tracing::warn!(domain = %domain, error = %e, "refresh failed transiently");
            }
            Err(e)
        }
    }
}

async fn persist_pair(store: &dyn SecretStore, pair: &TokenPair) -> Result<(), StoreError> {
    let domain = &pair.domain;

    match &pair.refresh_token {
        Some(refresh) => {
            store
                .set(&storage_key(domain, CredentialField::RefreshToken), refresh)
                .await?;
        }
        None => {
            store
                .delete(&storage_key(domain, CredentialField::RefreshToken))
                .await?;
        }
    }

    match pair.expires_at {
        Some(expires_at) => {
            let timestamp = Secret::new(expires_at.timestamp().to_string());
            store
                .set(&storage_key(domain, CredentialField::ExpiresAt), &timestamp)
                .await?;
        }
        None => {
            store
                .delete(&storage_key(domain, CredentialField::ExpiresAt))
                .await?;
        }
    }

    store
        .set(
            &storage_key(domain, CredentialField::AccessToken),
            &pair.access_token,
        )
        .await
}

async fn delete_pair(store: &dyn SecretStore, domain: &Domain) -> Result<(), StoreError> {
    for field in CredentialField::ALL {
        store.delete(&storage_key(domain, field)).await?;
    }
    Ok(())
}

async fn await_outcome(mut rx: OutcomeReceiver) -> RefreshOutcome {
    loop {
        let published = rx.borrow().clone();
        if let Some(outcome) = published {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return Err(AuthError::Transport {
                message: "refresh task dropped before completing".to_string(),
            });
        }
    }
}
