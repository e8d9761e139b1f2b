//! Verified identity claims and the raw Keycloak claim shapes they are
//! mapped from.
//!
//! [`IdentityClaims`] is produced only by the verifier (or the code-flow
//! callback after ID-token verification) and is immutable afterwards: realm
//! roles come from `realm_access.roles`, per-client roles from
//! `resource_access.<client>.roles`.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{AuthError, Result};

/// Verified identity attached to a request for the lifetime of its handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// OIDC `sub` claim (opaque user id).
    pub subject: String,
    /// `preferred_username`, falling back to the subject when absent.
    pub username: String,
    /// Email address, when the provider released one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Realm-level roles.
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Per-client roles, keyed by client id.
    #[serde(default)]
    pub client_roles: HashMap<String, BTreeSet<String>>,
}

impl IdentityClaims {
    /// Whether the identity holds a realm-level role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether the identity holds a role scoped to the given client.
    #[must_use]
    pub fn has_client_role(&self, client: &str, role: &str) -> bool {
        self.client_roles
            .get(client)
            .is_some_and(|roles| roles.contains(role))
    }
}

/// Raw claim layout of Keycloak-issued access and identity tokens.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    pub sub: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    #[serde(default)]
    pub resource_access: HashMap<String, ClientAccess>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<RawClaims> for IdentityClaims {
    fn from(raw: RawClaims) -> Self {
        let username = raw.preferred_username.unwrap_or_else(|| raw.sub.clone());
        let roles = raw
            .realm_access
            .map(|ra| ra.roles.into_iter().collect())
            .unwrap_or_default();
        let client_roles = raw
            .resource_access
            .into_iter()
            .map(|(client, access)| (client, access.roles.into_iter().collect()))
            .collect();

        Self {
            subject: raw.sub,
            username,
            email: raw.email,
            roles,
            client_roles,
        }
    }
}

/// Decode a JWT payload **without** signature verification.
///
/// Only used after the provider has already vouched for the token
/// (introspection reported it active), and to peek at header-independent
/// claims. Never a trust source on its own.
pub(crate) fn decode_payload_unverified(token: &str) -> Result<RawClaims> {
    let mut parts = token.split('.');
    let payload = parts
        .nth(1)
        .filter(|p| !p.is_empty())
        .ok_or(AuthError::MalformedToken)?;

    let bytes = base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        payload,
    )
    .map_err(|_| AuthError::MalformedToken)?;

    serde_json::from_slice(&bytes).map_err(|_| AuthError::MalformedToken)
}
