//! Token introspection — the slow, authoritative fallback trust source.
//!
//! Posts the token to the provider's introspection endpoint as form-encoded
//! data. A transport failure or non-2xx response is reported to the caller
//! as `UpstreamUnavailable`, never as a silent pass: "inactive" is reserved
//! for an explicit negative answer from the provider.

use serde::Deserialize;
use tracing::debug;

use crate::{AuthError, Result};

/// Provider answer to an introspection request. Keycloak includes the full
/// claim set for active tokens; only `active` matters here because the
/// claims are re-read from the token payload by the verifier.
#[derive(Debug, Deserialize)]
pub struct IntrospectionOutcome {
    /// Whether the provider considers the token active.
    #[serde(default)]
    pub active: bool,
}

/// Client for the provider's token-introspection endpoint.
pub struct Introspector {
    http: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: String,
}

impl Introspector {
    /// Create an introspector posting as the given confidential client.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            url,
            client_id,
            client_secret,
        }
    }

    /// Ask the provider whether `token` is active.
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionOutcome> {
        let params = [
            ("token", token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(&self.url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::upstream(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::UpstreamUnavailable(format!(
                "introspection endpoint returned {status}"
            )));
        }

        let outcome: IntrospectionOutcome = response
            .json()
            .await
            .map_err(|e| AuthError::upstream(&e))?;

        debug!(active = outcome.active, "token introspection completed");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_defaults_to_false() {
        // A response with no `active` field must never pass as active.
        let outcome: IntrospectionOutcome = serde_json::from_str("{}").unwrap();
        assert!(!outcome.active);
    }

    #[test]
    fn keycloak_active_response_parses() {
        let outcome: IntrospectionOutcome = serde_json::from_value(serde_json::json!({
            "active": true,
            "sub": "user-1",
            "preferred_username": "kasia",
            "realm_access": { "roles": ["coach"] }
        }))
        .unwrap();
        assert!(outcome.active);
    }
}
