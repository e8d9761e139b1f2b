//! Error types for the FitTrack auth core.
//!
//! Every failure path in the crate surfaces as one of the [`AuthError`]
//! variants; nothing else crosses the public boundary. The taxonomy maps
//! onto HTTP like this:
//!
//! | Variant group | Status | Body |
//! |---------------|--------|------|
//! | authentication (`MissingToken`, `MalformedToken`, ...) | 401 | generic, detail logged only |
//! | authorization (`MissingRole`) | 403 | `{error, required, userRoles}` |
//! | upstream (`KeyFetchFailed`, `UpstreamUnavailable`, `TokenExchangeFailed`) | 502 | generic |
//! | protocol (`StateMismatch`) | 403 | generic, logged as a security event |

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

/// Result type alias for the auth core.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Failures produced by token verification, authorization, and the
/// authorization-code flow.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No bearer token was presented.
    #[error("missing bearer token")]
    MissingToken,

    /// The presented token is not syntactically a compact JWT.
    #[error("malformed bearer token")]
    MalformedToken,

    /// Signature verified but the token is past its expiry.
    #[error("token expired")]
    ExpiredToken,

    /// Signature verification failed against the current signing key.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The identity provider reported the token as inactive.
    #[error("token inactive or invalid")]
    TokenInactive,

    /// The verified identity lacks a required role.
    #[error("missing required role '{required}'")]
    MissingRole {
        /// The role the handler demanded.
        required: String,
        /// Roles the caller actually holds (safe to disclose post-authentication).
        user_roles: Vec<String>,
    },

    /// The provider's JWKS endpoint was unreachable, returned non-2xx, or
    /// contained no usable signing key.
    #[error("signing key fetch failed: {0}")]
    KeyFetchFailed(String),

    /// Transport-level failure talking to the identity provider. Distinct
    /// from an invalid token: never downgraded to "unauthenticated".
    #[error("identity provider unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The authorization-code or refresh-token exchange was rejected.
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// The CSRF state on the callback did not match the stored value.
    #[error("oauth state mismatch")]
    StateMismatch,

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Wrap a transport error from the identity provider.
    pub fn upstream(err: &reqwest::Error) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }

    /// HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::MalformedToken
            | Self::ExpiredToken
            | Self::InvalidSignature
            | Self::TokenInactive => StatusCode::UNAUTHORIZED,
            Self::MissingRole { .. } | Self::StateMismatch => StatusCode::FORBIDDEN,
            Self::KeyFetchFailed(_)
            | Self::UpstreamUnavailable(_)
            | Self::TokenExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Internal detail stays in the log; the response body is generic
        // except for the role denial, which an authenticated caller may see.
        let status = self.status();
        let body = match &self {
            Self::MissingRole {
                required,
                user_roles,
            } => json!({
                "error": "forbidden",
                "required": required,
                "userRoles": user_roles,
            }),
            Self::StateMismatch => {
                warn!("oauth state mismatch on callback; possible CSRF attempt");
                json!({ "error": "state_mismatch" })
            }
            Self::KeyFetchFailed(_)
            | Self::UpstreamUnavailable(_)
            | Self::TokenExchangeFailed(_) => {
                warn!(error = %self, "identity provider failure");
                json!({ "error": "upstream_unavailable" })
            }
            Self::Config(_) => {
                warn!(error = %self, "configuration error surfaced in request path");
                json!({ "error": "internal_error" })
            }
            _ => {
                warn!(error = %self, "authentication failed");
                json!({ "error": "unauthorized" })
            }
        };
        (status, Json(body)).into_response()
    }
}
