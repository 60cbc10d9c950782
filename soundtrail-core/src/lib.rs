//! # Soundtrail Core
//!
//! Resilient authenticated API client for the Soundtrail backend and
//! connected music-streaming providers.
//!
//! This crate provides:
//! - A uniform [`ResponseEnvelope`] outcome for every request
//! - A single-attempt HTTP transport with failure classification
//! - Bounded exponential-backoff retry for transient failures
//! - Per-domain token lifecycle management with single-flight refresh
//! - The composing [`ApiClient`] with verb operations and the session
//!   surface (login, logout, connect, disconnect)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use soundtrail_core::{ApiClient, RequestOptions, create_store};
//! use url::Url;
//!
//! async fn fetch_pins() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn soundtrail_core::SecretStore> = create_store(true).into();
//!     let client = ApiClient::new(Url::parse("https://api.soundtrail.app/v1/")?, store);
//!     client.restore().await?;
//!
//!     client.login("me@example.com", "hunter2").await?;
//!     let envelope = client.get("pins", &[], RequestOptions::default()).await;
//!     println!("{:?}", envelope.data);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod provider;
pub mod retry;
pub mod store;
pub mod token;
pub mod transport;

// Re-export commonly used types at crate root
pub use model::{
    CredentialField,
    Domain,
    ProviderId,
    storage_key,
};

pub use store::{
    MemoryStore,
    Secret,
    SecretStore,
    StoreError,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use envelope::{
    ErrorKind,
    ResponseEnvelope,
};

pub use transport::{
    ApiRequest,
    HttpTransport,
    Method,
    Transport,
};

pub use retry::RetryPolicy;

pub use token::{
    AuthError,
    AuthState,
    RefreshEndpoint,
    TokenError,
    TokenPair,
};

pub use lifecycle::TokenLifecycle;

pub use provider::{
    AccountEndpoints,
    ProviderConfig,
    ProviderTokenEndpoint,
};

pub use client::{
    ApiClient,
    RequestOptions,
};

pub use error::SoundtrailError;
