//! OAuth2 Authorization Code flow for the server-rendered client.
//!
//! `start_login` issues the authorize redirect with a fresh CSRF state,
//! `handle_callback` validates and consumes the state, exchanges the code
//! as a confidential client, verifies the returned ID token's signature
//! against the realm's signing key, and creates the session;
//! `logout` destroys the session server-side and hands back the provider's
//! end-session URL — clearing the cookie alone would leave the provider's
//! own browser session alive.
//!
//! Consumed states are never retried: a failed exchange requires a fresh
//! `/login`, so a single-use authorization code is never posted twice.

use std::sync::Arc;

use rand::RngExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    AuthError, AuthConfig, IdentityClaims, Result,
    keys::KeyCache,
    session::{SessionStore, TokenSet},
    verifier,
};

/// Provider token endpoint response (code, refresh, and client-credentials
/// grants all share this shape).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Drives the three-legged code exchange against the identity provider.
pub struct AuthorizationCodeFlow {
    http: reqwest::Client,
    config: Arc<AuthConfig>,
    keys: Arc<KeyCache>,
    store: Arc<dyn SessionStore>,
}

impl AuthorizationCodeFlow {
    /// Create a flow backed by the given key cache and session store.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        config: Arc<AuthConfig>,
        keys: Arc<KeyCache>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            http,
            config,
            keys,
            store,
        }
    }

    /// Begin a login: bind a fresh state to `login_key` and build the
    /// provider's authorize URL for the browser redirect.
    pub async fn start_login(&self, login_key: &str) -> Result<Url> {
        let state = generate_state();
        self.store.put_state(login_key, &state).await;

        let mut url = Url::parse(&self.config.provider.authorize_url())
            .map_err(|e| AuthError::Config(format!("authorize url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client.client_id)
            .append_pair("redirect_uri", &self.config.client.redirect_uri)
            .append_pair("scope", &self.config.client.scopes.join(" "))
            .append_pair("state", &state);

        info!("redirecting browser to identity provider for login");
        Ok(url)
    }

    /// Complete a login: consume the CSRF state, exchange the code, verify
    /// the ID token, and create a session. Returns the new session id and
    /// the verified identity.
    ///
    /// The state is consumed before the exchange begins, so a failed
    /// exchange can never be retried with a stale state.
    pub async fn handle_callback(
        &self,
        login_key: &str,
        state: &str,
        code: &str,
    ) -> Result<(String, IdentityClaims)> {
        if !self.store.consume_state(login_key, state).await {
            return Err(AuthError::StateMismatch);
        }

        let response = self.exchange_code(code).await?;
        let id_token = response.id_token.clone().ok_or_else(|| {
            AuthError::TokenExchangeFailed("token response missing id_token".to_string())
        })?;

        // The ID token's signature is verified against the realm key before
        // any of its claims are trusted.
        let identity =
            verifier::verify_signed_jwt(&self.keys, &self.config.provider.issuer(), &id_token)
                .await?;

        let tokens = TokenSet::from_response(
            response.access_token,
            response.refresh_token,
            Some(id_token),
            response.expires_in,
        );
        let session_id = self.store.create(identity.clone(), tokens).await;

        info!(username = %identity.username, "user authenticated via code flow");
        Ok((session_id, identity))
    }

    /// Destroy the server-side session and build the provider's end-session
    /// URL for the browser redirect.
    pub async fn logout(&self, session_id: &str) -> Result<Url> {
        let destroyed = self.store.destroy(session_id).await;
        debug!(destroyed, "logout requested");

        self.end_session_url()
    }

    /// The provider's end-session URL with the post-logout redirect.
    pub fn end_session_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.config.provider.end_session_url())
            .map_err(|e| AuthError::Config(format!("end-session url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client.client_id)
            .append_pair(
                "post_logout_redirect_uri",
                &self.config.client.post_logout_redirect_uri,
            );
        Ok(url)
    }

    /// Refresh a session's token set via `grant_type=refresh_token` and
    /// persist the result. Fails when the session is gone or was issued
    /// without a refresh token.
    pub async fn refresh(&self, session_id: &str) -> Result<TokenSet> {
        let session = self
            .store
            .get(session_id)
            .await
            .ok_or(AuthError::TokenInactive)?;
        let refresh_token = session.tokens.refresh_token.clone().ok_or_else(|| {
            AuthError::TokenExchangeFailed("session has no refresh token".to_string())
        })?;

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client.client_id.as_str()),
            ("client_secret", self.config.client.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        let response = self.post_token_endpoint(&params).await?;

        let tokens = TokenSet::from_response(
            response.access_token,
            response.refresh_token.or(Some(refresh_token)),
            // Keycloak omits the id_token on refresh; keep the original.
            response.id_token.or(session.tokens.id_token),
            response.expires_in,
        );

        if !self.store.update_tokens(session_id, tokens.clone()).await {
            return Err(AuthError::TokenInactive);
        }
        debug!("session tokens refreshed");
        Ok(tokens)
    }

    /// A non-stale access token for downstream resource-server calls,
    /// refreshing the session's token set first when needed.
    pub async fn fresh_access_token(&self, session_id: &str) -> Result<String> {
        let session = self
            .store
            .get(session_id)
            .await
            .ok_or(AuthError::TokenInactive)?;
        if !session.tokens.is_expired() {
            return Ok(session.tokens.access_token);
        }
        Ok(self.refresh(session_id).await?.access_token)
    }

    /// Service-account token via `grant_type=client_credentials`, for
    /// machine-to-machine calls that are not tied to a browser session.
    pub async fn client_credentials_token(&self) -> Result<TokenSet> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client.client_id.as_str()),
            ("client_secret", self.config.client.client_secret.as_str()),
        ];
        let response = self.post_token_endpoint(&params).await?;
        Ok(TokenSet::from_response(
            response.access_token,
            response.refresh_token,
            response.id_token,
            response.expires_in,
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client.client_id.as_str()),
            ("client_secret", self.config.client.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.client.redirect_uri.as_str()),
        ];
        self.post_token_endpoint(&params).await
    }

    async fn post_token_endpoint(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.provider.token_url())
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::upstream(&e))?;

        let status = response.status();
        if !status.is_success() {
            // The provider's error body can name the grant but never echoes
            // credentials; truncate it for the log.
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!(%status, body = %snippet, "token endpoint rejected request");
            return Err(AuthError::TokenExchangeFailed(format!(
                "token endpoint returned {status}"
            )));
        }

        response.json().await.map_err(|e| AuthError::upstream(&e))
    }
}

/// Generate a high-entropy CSRF state value (256 bits, base64url).
fn generate_state() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        random_bytes,
    )
}
