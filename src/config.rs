//! Configuration for the auth core.
//!
//! Loaded from an optional YAML file merged with `FITTRACK_`-prefixed
//! environment variables (`__` as the nesting separator), e.g.
//! `FITTRACK_CLIENT__CLIENT_SECRET` overrides `client.client_secret`.
//!
//! Secret values (`client.client_secret`, `session.secret`) are redacted
//! from `Debug` output and must never appear in logs or error responses.

use std::{fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{AuthError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Identity provider location.
    pub provider: ProviderConfig,
    /// OAuth2 client registration for this deployment.
    pub client: ClientConfig,
    /// Session and CSRF-state lifetimes.
    pub session: SessionConfig,
    /// Outbound HTTP behaviour.
    pub http: HttpConfig,
}

/// Identity provider base URL and realm. All consumed endpoints are
/// realm-scoped under `{base_url}/realms/{realm}/protocol/openid-connect/`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider base URL, e.g. `https://id.example.com`.
    pub base_url: String,
    /// Realm name.
    pub realm: String,
}

impl ProviderConfig {
    fn realm_base(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }

    /// Issuer URL expected in the `iss` claim of provider-signed tokens.
    #[must_use]
    pub fn issuer(&self) -> String {
        format!(
            "{}/realms/{}",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }

    /// JWKS endpoint serving the realm's signing keys.
    #[must_use]
    pub fn certs_url(&self) -> String {
        format!("{}/certs", self.realm_base())
    }

    /// Token endpoint for code, refresh, and client-credentials grants.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/token", self.realm_base())
    }

    /// Token introspection endpoint.
    #[must_use]
    pub fn introspection_url(&self) -> String {
        format!("{}/token/introspect", self.realm_base())
    }

    /// Authorize endpoint the browser is redirected to at login.
    #[must_use]
    pub fn authorize_url(&self) -> String {
        format!("{}/auth", self.realm_base())
    }

    /// End-session endpoint the browser is redirected to at logout.
    #[must_use]
    pub fn end_session_url(&self) -> String {
        format!("{}/logout", self.realm_base())
    }
}

/// OAuth2 client registration (confidential client).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Registered client identifier.
    pub client_id: String,
    /// Client secret for the confidential exchanges. Redacted from `Debug`.
    pub client_secret: String,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    /// Requested scopes for the authorize redirect.
    pub scopes: Vec<String>,
    /// Where the provider sends the browser after end-session.
    pub post_logout_redirect_uri: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            post_logout_redirect_uri: "/".to_string(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***hidden***")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
            .finish()
    }
}

/// Session cookie and CSRF-state lifetimes.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HMAC key for signing session cookies. Redacted from `Debug`.
    pub secret: String,
    /// Server-side session lifetime.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// How long an unconsumed CSRF state stays valid.
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,
    /// Set the `Secure` attribute on cookies. Off by default so the demo
    /// works over plain HTTP on localhost; enable behind TLS.
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl: Duration::from_secs(24 * 3600),
            state_ttl: Duration::from_secs(600),
            cookie_secure: false,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"***hidden***")
            .field("ttl", &self.ttl)
            .field("state_ttl", &self.state_ttl)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

/// Outbound HTTP behaviour for all identity-provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bounded timeout on every provider call (key fetch, introspection,
    /// token exchange). A timeout surfaces as `UpstreamUnavailable`.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl AuthConfig {
    /// Load configuration from an optional YAML file merged with
    /// `FITTRACK_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(AuthError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("FITTRACK_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.provider.base_url.is_empty() {
            return Err(AuthError::Config("provider.base_url is required".into()));
        }
        if self.provider.realm.is_empty() {
            return Err(AuthError::Config("provider.realm is required".into()));
        }
        if self.client.client_id.is_empty() {
            return Err(AuthError::Config("client.client_id is required".into()));
        }
        if self.client.client_secret.is_empty() {
            return Err(AuthError::Config("client.client_secret is required".into()));
        }
        if self.client.redirect_uri.is_empty() {
            return Err(AuthError::Config("client.redirect_uri is required".into()));
        }
        if self.session.secret.len() < 32 {
            return Err(AuthError::Config(
                "session.secret must be at least 32 bytes".into(),
            ));
        }
        Ok(())
    }

    /// Build the shared HTTP client used for all provider calls.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http.timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("http client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn demo_provider() -> ProviderConfig {
        ProviderConfig {
            base_url: "http://localhost:8080".to_string(),
            realm: "fittrack".to_string(),
        }
    }

    #[test]
    fn endpoint_urls_are_realm_scoped() {
        let p = demo_provider();
        assert_eq!(
            p.certs_url(),
            "http://localhost:8080/realms/fittrack/protocol/openid-connect/certs"
        );
        assert_eq!(
            p.introspection_url(),
            "http://localhost:8080/realms/fittrack/protocol/openid-connect/token/introspect"
        );
        assert_eq!(
            p.authorize_url(),
            "http://localhost:8080/realms/fittrack/protocol/openid-connect/auth"
        );
        assert_eq!(
            p.token_url(),
            "http://localhost:8080/realms/fittrack/protocol/openid-connect/token"
        );
        assert_eq!(
            p.end_session_url(),
            "http://localhost:8080/realms/fittrack/protocol/openid-connect/logout"
        );
    }

    #[test]
    fn trailing_slash_on_base_url_is_tolerated() {
        let p = ProviderConfig {
            base_url: "http://localhost:8080/".to_string(),
            realm: "fittrack".to_string(),
        };
        assert_eq!(p.issuer(), "http://localhost:8080/realms/fittrack");
    }

    #[test]
    fn secrets_are_redacted_from_debug_output() {
        let client = ClientConfig {
            client_id: "ssr-client".to_string(),
            client_secret: "very-secret-value".to_string(),
            ..ClientConfig::default()
        };
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("very-secret-value"));
        assert!(rendered.contains("***hidden***"));

        let session = SessionConfig {
            secret: "another-secret-value-that-is-long".to_string(),
            ..SessionConfig::default()
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("another-secret-value"));
    }

    fn demo_client() -> ClientConfig {
        ClientConfig {
            client_id: "ssr-client".to_string(),
            client_secret: "demo-client-secret".to_string(),
            redirect_uri: "http://localhost:3002/callback".to_string(),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn validate_rejects_short_session_secret() {
        let config = AuthConfig {
            provider: demo_provider(),
            client: demo_client(),
            session: SessionConfig {
                secret: "short".to_string(),
                ..SessionConfig::default()
            },
            http: HttpConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_client_secret_and_redirect_uri() {
        let valid = AuthConfig {
            provider: demo_provider(),
            client: demo_client(),
            session: SessionConfig {
                secret: "0123456789abcdef0123456789abcdef".to_string(),
                ..SessionConfig::default()
            },
            http: HttpConfig::default(),
        };
        assert!(valid.validate().is_ok());

        let mut missing_secret = valid.clone();
        missing_secret.client.client_secret = String::new();
        assert!(missing_secret.validate().is_err());

        let mut missing_redirect = valid.clone();
        missing_redirect.client.redirect_uri = String::new();
        assert!(missing_redirect.validate().is_err());
    }

    #[test]
    fn default_scopes_cover_openid_profile_email() {
        let client = ClientConfig::default();
        assert_eq!(client.scopes, vec!["openid", "profile", "email"]);
    }
}
