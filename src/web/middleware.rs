//! Request-scoped authentication and authorization for axum services.
//!
//! `authenticate` turns a bearer token into [`IdentityClaims`] in the
//! request extensions or answers 401/502; `require_role` sits behind it
//! and answers 403 with the required and actual roles. `attach_session`
//! is the cookie-based counterpart for the server-rendered client.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::{
    AuthError, IdentityClaims, guard,
    session::{Session, SessionStore},
    verifier::TokenVerifier,
};

use super::cookie;

/// Bearer-token authentication middleware for resource servers.
///
/// On success the verified [`IdentityClaims`] are attached to the request
/// for the lifetime of its handling; on failure the typed error is
/// rendered (401 for bad tokens, 502 for provider outages).
pub async fn authenticate(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(header) = header else {
        return AuthError::MissingToken.into_response();
    };
    let Some(token) = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
    else {
        return AuthError::MalformedToken.into_response();
    };

    match verifier.verify(token).await {
        Ok(claims) => {
            debug!(username = %claims.username, "request authenticated");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// State for [`require_role`]: the realm role a route subtree demands.
#[derive(Debug, Clone)]
pub struct RequiredRole(pub &'static str);

/// Role-check middleware; must run after [`authenticate`] (or
/// [`attach_session`]) so the claims are present.
pub async fn require_role(
    State(RequiredRole(role)): State<RequiredRole>,
    request: Request,
    next: Next,
) -> Response {
    let Some(claims) = request.extensions().get::<IdentityClaims>() else {
        // Reaching here without claims means the route was wired without
        // an authentication layer; treat as unauthenticated.
        return AuthError::MissingToken.into_response();
    };

    if let Err(denied) = guard::require_role(claims, role) {
        return denied.into_response();
    }
    next.run(request).await
}

/// State for [`attach_session`].
#[derive(Clone)]
pub struct SessionState {
    /// Session persistence.
    pub store: Arc<dyn SessionStore>,
    /// Cookie-signing secret.
    pub secret: String,
}

/// Cookie-session middleware for the server-rendered client.
///
/// Loads the session named by a validly signed cookie and attaches both
/// the [`Session`] and its [`IdentityClaims`] to the request. Requests
/// without a session pass through anonymously; route handlers (or
/// [`require_role`]) decide what anonymous callers may do.
pub async fn attach_session(
    State(state): State<SessionState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match cookie::read_cookie(request.headers(), cookie::SESSION_COOKIE)
        .and_then(|signed| cookie::verify_value(&state.secret, &signed))
    {
        Some(session_id) => state.store.get(&session_id).await,
        None => None,
    };

    if let Some(session) = session {
        request.extensions_mut().insert(session.identity.clone());
        request.extensions_mut().insert(session);
    }
    next.run(request).await
}

/// Extractor for the verified identity attached by [`authenticate`].
pub struct CurrentUser(pub IdentityClaims);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<IdentityClaims>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AuthError::MissingToken)
    }
}

/// Extractor for the session attached by [`attach_session`]; anonymous
/// requests are redirected to `/login`.
pub struct CurrentSession(pub Session);

impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or_else(|| Redirect::to("/login"))
    }
}
