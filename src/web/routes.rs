//! Login, callback, and logout endpoints for the code-flow client.
//!
//! `/login` binds a pending login to the browser via a short-lived signed
//! cookie and redirects to the provider; `/callback` validates the CSRF
//! state, establishes the session, and redirects to the app root;
//! `/logout` destroys the session server-side and redirects the browser
//! to the provider's end-session endpoint.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::{AuthConfig, AuthError, flow::AuthorizationCodeFlow};

use super::cookie;

/// Shared state for the session routes.
#[derive(Clone)]
pub struct FlowState {
    /// The code-exchange driver.
    pub flow: Arc<AuthorizationCodeFlow>,
    /// Configuration (cookie secret, TTLs, redirect targets).
    pub config: Arc<AuthConfig>,
}

/// Build the `/login`, `/callback`, `/logout` router.
pub fn session_router(state: FlowState) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout))
        .with_state(state)
}

async fn login(State(state): State<FlowState>) -> Response {
    let login_key = Uuid::new_v4().to_string();

    match state.flow.start_login(&login_key).await {
        Ok(url) => {
            let signed = cookie::sign_value(&state.config.session.secret, &login_key);
            let set_cookie = cookie::build_cookie(
                cookie::LOGIN_COOKIE,
                &signed,
                state.config.session.state_ttl.as_secs(),
                state.config.session.cookie_secure,
            );
            (
                AppendHeaders([(SET_COOKIE, set_cookie)]),
                Redirect::to(url.as_str()),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn callback(
    State(state): State<FlowState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(provider_error) = query.error {
        warn!(error = %provider_error, "provider returned an error on callback");
        return AuthError::TokenExchangeFailed(format!(
            "provider returned error: {provider_error}"
        ))
        .into_response();
    }

    // Without a validly signed login cookie there is no state to compare
    // against: treat it like any other state failure.
    let Some(login_key) = cookie::read_cookie(&headers, cookie::LOGIN_COOKIE)
        .and_then(|signed| cookie::verify_value(&state.config.session.secret, &signed))
    else {
        return AuthError::StateMismatch.into_response();
    };

    let (Some(received_state), Some(code)) = (query.state, query.code) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_callback" })),
        )
            .into_response();
    };

    match state
        .flow
        .handle_callback(&login_key, &received_state, &code)
        .await
    {
        Ok((session_id, _identity)) => {
            let signed = cookie::sign_value(&state.config.session.secret, &session_id);
            let secure = state.config.session.cookie_secure;
            let set_session = cookie::build_cookie(
                cookie::SESSION_COOKIE,
                &signed,
                state.config.session.ttl.as_secs(),
                secure,
            );
            let clear_login = cookie::expire_cookie(cookie::LOGIN_COOKIE, secure);
            (
                AppendHeaders([(SET_COOKIE, set_session), (SET_COOKIE, clear_login)]),
                Redirect::to("/"),
            )
                .into_response()
        }
        // The stored state is burned either way; a dead login key must not
        // linger in the browser.
        Err(err) => {
            let clear_login = cookie::expire_cookie(
                cookie::LOGIN_COOKIE,
                state.config.session.cookie_secure,
            );
            (AppendHeaders([(SET_COOKIE, clear_login)]), err).into_response()
        }
    }
}

async fn logout(State(state): State<FlowState>, headers: HeaderMap) -> Response {
    let session_id = cookie::read_cookie(&headers, cookie::SESSION_COOKIE)
        .and_then(|signed| cookie::verify_value(&state.config.session.secret, &signed));

    // Destroy the server-side session when we have one, but send the
    // browser to the provider's end-session endpoint either way.
    let end_session = match session_id {
        Some(id) => state.flow.logout(&id).await,
        None => state.flow.end_session_url(),
    };

    match end_session {
        Ok(url) => {
            let clear = cookie::expire_cookie(
                cookie::SESSION_COOKIE,
                state.config.session.cookie_secure,
            );
            (
                AppendHeaders([(SET_COOKIE, clear)]),
                Redirect::to(url.as_str()),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
