//! FitTrack auth core
//!
//! Shared OpenID-Connect authentication and authorization for the FitTrack
//! services: resource servers verify bearer tokens issued by the identity
//! provider, and the server-rendered client drives the full OAuth2
//! Authorization Code flow against the same provider.
//!
//! # Components
//!
//! - [`keys::KeyCache`] — single-flight cache of the realm's signing key
//! - [`introspect::Introspector`] — introspection fallback trust source
//! - [`verifier::TokenVerifier`] — ordered verification strategies
//! - [`guard`] — realm/client role checks
//! - [`flow::AuthorizationCodeFlow`] — login, callback, logout, refresh
//! - [`session`] — pluggable session store with single-use CSRF state
//! - [`web`] — axum middleware, extractors, and the session router

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod config;
pub mod error;
pub mod flow;
pub mod guard;
pub mod introspect;
pub mod keys;
pub mod session;
pub mod verifier;
pub mod web;

use std::sync::Arc;

pub use claims::IdentityClaims;
pub use config::AuthConfig;
pub use error::{AuthError, Result};

use flow::AuthorizationCodeFlow;
use introspect::Introspector;
use keys::KeyCache;
use session::{InMemorySessionStore, SessionStore};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use verifier::TokenVerifier;

/// Fully wired auth core: one key cache, verifier, and code flow sharing a
/// single HTTP client and session store.
pub struct AuthCore {
    /// Loaded configuration.
    pub config: Arc<AuthConfig>,
    /// Shared signing-key cache.
    pub keys: Arc<KeyCache>,
    /// Bearer-token verifier for resource servers.
    pub verifier: Arc<TokenVerifier>,
    /// Code flow for the server-rendered client.
    pub flow: Arc<AuthorizationCodeFlow>,
    /// Session persistence.
    pub store: Arc<dyn SessionStore>,
}

impl AuthCore {
    /// Wire the core with the in-memory session store (single-process
    /// deployments only; see [`session::InMemorySessionStore`]).
    pub fn new(config: AuthConfig) -> Result<Self> {
        let store = Arc::new(InMemorySessionStore::new(
            config.session.ttl,
            config.session.state_ttl,
        ));
        Self::with_store(config, store)
    }

    /// Wire the core against a custom session store (e.g. a shared store
    /// for multi-instance deployments).
    pub fn with_store(config: AuthConfig, store: Arc<dyn SessionStore>) -> Result<Self> {
        config.validate()?;
        let http = config.http_client()?;
        let config = Arc::new(config);

        let keys = Arc::new(KeyCache::new(http.clone(), config.provider.certs_url()));
        let introspector = Introspector::new(
            http.clone(),
            config.provider.introspection_url(),
            config.client.client_id.clone(),
            config.client.client_secret.clone(),
        );
        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&keys),
            introspector,
            config.provider.issuer(),
        ));
        let flow = Arc::new(AuthorizationCodeFlow::new(
            http,
            Arc::clone(&config),
            Arc::clone(&keys),
            Arc::clone(&store),
        ));

        Ok(Self {
            config,
            keys,
            verifier,
            flow,
            store,
        })
    }
}

/// Setup tracing/logging.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
