//! Bearer-token verification.
//!
//! # Verification strategies (ordered, short-circuit on first success)
//!
//! 1. Reject tokens that are absent or not syntactically a compact JWT.
//! 2. Local verification: RS256 signature against the cached signing key,
//!    plus `exp` and `iss` claims (60 s leeway). This is the fast path —
//!    no network round trip per request once the key is cached.
//! 3. On a signature failure, invalidate the key cache and retry local
//!    verification exactly once — this absorbs provider key rotation
//!    without an extra round trip on every request.
//! 4. Fall back to introspection: the provider is authoritative. Inactive
//!    means the token is rejected; active means the payload is decoded
//!    without re-verifying its signature (the provider just vouched for it).
//!
//! A token whose signature verifies but whose `exp` is in the past fails
//! terminally with `ExpiredToken`: key rotation cannot fix expiry, so the
//! retry and introspection legs are skipped for that case.
//!
//! Transport failures anywhere surface as `UpstreamUnavailable`, which is
//! reported distinctly from an invalid token.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use tracing::debug;

use crate::{
    AuthError, IdentityClaims, Result,
    claims::{self, RawClaims},
    introspect::Introspector,
    keys::KeyCache,
};

/// Verifies bearer tokens against the identity provider.
pub struct TokenVerifier {
    keys: Arc<KeyCache>,
    introspector: Introspector,
    issuer: String,
}

impl TokenVerifier {
    /// Create a verifier checking tokens issued by `issuer`.
    #[must_use]
    pub fn new(keys: Arc<KeyCache>, introspector: Introspector, issuer: String) -> Self {
        Self {
            keys,
            introspector,
            issuer,
        }
    }

    /// Verify a bearer token, producing immutable identity claims.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if !looks_like_compact_jwt(token) {
            return Err(AuthError::MalformedToken);
        }

        let local_failure = match verify_signed_jwt(&self.keys, &self.issuer, token).await {
            Ok(claims) => return Ok(claims),
            // Expiry is terminal; fresh keys and introspection cannot revive it.
            Err(err @ AuthError::ExpiredToken) => return Err(err),
            Err(err) => err,
        };

        debug!(
            error = %local_failure,
            "local verification failed after key refresh; falling back to introspection"
        );

        let outcome = self.introspector.introspect(token).await?;
        if !outcome.active {
            return Err(AuthError::TokenInactive);
        }

        // The provider vouched for the token; its payload is now trusted.
        let raw: RawClaims = claims::decode_payload_unverified(token)?;
        Ok(raw.into())
    }
}

/// Local RS256 verification with a single invalidate+retry on failure.
///
/// Shared with the code-flow callback, which verifies the returned ID
/// token against the same key cache before trusting its claims.
pub(crate) async fn verify_signed_jwt(
    keys: &KeyCache,
    issuer: &str,
    token: &str,
) -> Result<IdentityClaims> {
    let first = match verify_once(keys, issuer, token).await {
        Ok(claims) => return Ok(claims),
        Err(err @ AuthError::ExpiredToken) => return Err(err),
        Err(err) => err,
    };

    debug!(error = %first, "local verification failed; refreshing signing key and retrying");
    keys.invalidate();
    verify_once(keys, issuer, token).await
}

async fn verify_once(keys: &KeyCache, issuer: &str, token: &str) -> Result<IdentityClaims> {
    let key = keys.signing_key().await?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 60;
    validation.set_issuer(&[issuer]);
    // Keycloak sets `aud` per client; resource servers accept tokens minted
    // for any client in the realm, so audience is not checked here.
    validation.validate_aud = false;

    match jsonwebtoken::decode::<RawClaims>(token, &key, &validation) {
        Ok(data) => Ok(data.claims.into()),
        Err(err) => Err(map_jwt_error(&err)),
    }
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::MalformedToken,
        _ => AuthError::InvalidSignature,
    }
}

fn looks_like_compact_jwt(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}
