//! Signing-key cache for the identity provider's JWKS.
//!
//! The realm's RS256 signing key is fetched lazily on first use and then
//! served from memory. Concurrent callers hitting a cold cache coalesce
//! onto a single outbound fetch: the first caller installs a shared future
//! behind a mutex and every waiter awaits the same future, so all of them
//! observe the same key or the same failure. [`KeyCache::invalidate`]
//! clears the cache; the verifier calls it once when a signature check
//! fails, which tolerates provider key rotation without a restart.

use std::{
    sync::Arc,
    time::Instant,
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, JwkSet, KeyAlgorithm, PublicKeyUse},
};
use parking_lot::RwLock;
use tracing::debug;

use crate::{AuthError, Result};

/// Fetch errors carried through the shared future must be `Clone`, so the
/// in-flight result holds a plain message that is re-wrapped on exit.
type FetchResult = std::result::Result<Arc<DecodingKey>, String>;
type FetchFuture = Shared<BoxFuture<'static, FetchResult>>;

struct CachedKey {
    key: Arc<DecodingKey>,
    #[allow(dead_code)] // kept for operator diagnostics via future metrics
    fetched_at: Instant,
}

/// Cache for the realm's current RS256 signing key.
pub struct KeyCache {
    http: reqwest::Client,
    certs_url: String,
    cached: Arc<RwLock<Option<CachedKey>>>,
    in_flight: tokio::sync::Mutex<Option<FetchFuture>>,
}

impl KeyCache {
    /// Create a cache fetching from the given JWKS endpoint. The `http`
    /// client carries the configured provider timeout.
    #[must_use]
    pub fn new(http: reqwest::Client, certs_url: String) -> Self {
        Self {
            http,
            certs_url,
            cached: Arc::new(RwLock::new(None)),
            in_flight: tokio::sync::Mutex::new(None),
        }
    }

    fn peek(&self) -> Option<Arc<DecodingKey>> {
        self.cached.read().as_ref().map(|c| Arc::clone(&c.key))
    }

    /// Return the cached signing key, fetching it if the cache is cold.
    ///
    /// Exactly one outbound fetch happens per cold cache regardless of how
    /// many callers arrive concurrently.
    pub async fn signing_key(&self) -> Result<Arc<DecodingKey>> {
        if let Some(key) = self.peek() {
            return Ok(key);
        }

        let fut = {
            let mut flight = self.in_flight.lock().await;
            // A finished flight may have populated the cache while we
            // waited on the lock.
            if let Some(key) = self.peek() {
                return Ok(key);
            }
            if let Some(existing) = flight.as_ref() {
                existing.clone()
            } else {
                let http = self.http.clone();
                let url = self.certs_url.clone();
                let slot = Arc::clone(&self.cached);
                let fresh = async move {
                    let key = fetch_signing_key(&http, &url).await?;
                    *slot.write() = Some(CachedKey {
                        key: Arc::clone(&key),
                        fetched_at: Instant::now(),
                    });
                    Ok(key)
                }
                .boxed()
                .shared();
                *flight = Some(fresh.clone());
                fresh
            }
        };

        let outcome = fut.clone().await;
        {
            // Drop the completed flight so a failed fetch is not replayed
            // forever, but only when the slot still holds the flight that
            // was awaited: a waiter resuming late must not evict a fresh
            // flight another caller has already installed.
            let mut flight = self.in_flight.lock().await;
            if flight.as_ref().is_some_and(|current| current.ptr_eq(&fut)) {
                flight.take();
            }
        }

        outcome.map_err(AuthError::KeyFetchFailed)
    }

    /// Clear the cached key; the next [`Self::signing_key`] call fetches
    /// fresh material.
    pub fn invalidate(&self) {
        debug!("invalidating cached signing key");
        *self.cached.write() = None;
    }
}

async fn fetch_signing_key(http: &reqwest::Client, url: &str) -> FetchResult {
    debug!(url = %url, "fetching realm JWKS");
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| format!("certs request failed: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("certs endpoint returned {status}"));
    }

    let jwks: JwkSet = response
        .json()
        .await
        .map_err(|e| format!("certs response was not a JWKS: {e}"))?;

    select_signing_key(&jwks)
        .map(Arc::new)
        .ok_or_else(|| "no usable RS256 signing key in JWKS".to_string())
}

/// Pick the RS256 signature key out of a JWKS. Keycloak realms typically
/// publish one `sig` and one `enc` key; the `enc` key must never be used
/// for verification.
fn select_signing_key(jwks: &JwkSet) -> Option<DecodingKey> {
    jwks.keys.iter().find_map(|jwk| {
        let sig_use = jwk
            .common
            .public_key_use
            .as_ref()
            .is_none_or(|u| matches!(u, PublicKeyUse::Signature));
        let rs256 = matches!(jwk.common.key_algorithm, Some(KeyAlgorithm::RS256));
        if !(sig_use && rs256) {
            return None;
        }
        match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => {
                DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()
            }
            _ => None,
        }
    })
}
