//! Role checks over verified identity claims.
//!
//! Pure functions, only ever invoked after verification succeeded; the
//! denial error carries both the required role and the caller's actual
//! roles, which is safe to disclose to an already-authenticated caller.

use crate::{AuthError, IdentityClaims, Result};

/// Grant iff the identity holds the realm-level `role`.
pub fn require_role(claims: &IdentityClaims, role: &str) -> Result<()> {
    if claims.has_role(role) {
        Ok(())
    } else {
        Err(denial(claims, role))
    }
}

/// Grant iff the identity holds `role` scoped to `client`.
pub fn require_client_role(claims: &IdentityClaims, client: &str, role: &str) -> Result<()> {
    if claims.has_client_role(client, role) {
        Ok(())
    } else {
        Err(denial(claims, role))
    }
}

fn denial(claims: &IdentityClaims, role: &str) -> AuthError {
    AuthError::MissingRole {
        required: role.to_string(),
        user_roles: claims.roles.iter().cloned().collect(),
    }
}
