//! Signed-cookie helpers.
//!
//! Cookie values are `<value>.<hex hmac-sha256>`; the signature is keyed
//! with the configured session secret and checked in constant time, so a
//! forged or truncated cookie never reaches the session store.

use axum::http::{HeaderMap, header::COOKIE};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the signed session id.
pub const SESSION_COOKIE: &str = "fittrack_session";
/// Short-lived cookie binding the browser to a pending login.
pub const LOGIN_COOKIE: &str = "fittrack_login";

/// Sign `value` with the session secret.
#[must_use]
pub fn sign_value(secret: &str, value: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(value.as_bytes());
    format!("{value}.{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signed cookie value, returning the inner value on success.
#[must_use]
pub fn verify_value(secret: &str, signed: &str) -> Option<String> {
    let (value, signature_hex) = signed.rsplit_once('.')?;
    let signature = hex::decode(signature_hex).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(value.as_bytes());
    // verify_slice compares in constant time
    mac.verify_slice(&signature).ok()?;
    Some(value.to_string())
}

/// Read a cookie value from the request headers.
#[must_use]
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Build a `Set-Cookie` header value (http-only, lax).
#[must_use]
pub fn build_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}{secure_attr}")
}

/// Build a `Set-Cookie` header value that removes the cookie.
#[must_use]
pub fn expire_cookie(name: &str, secure: bool) -> String {
    build_cookie(name, "", 0, secure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn sign_then_verify_roundtrips() {
        let signed = sign_value(SECRET, "session-id-1");
        assert_eq!(verify_value(SECRET, &signed).as_deref(), Some("session-id-1"));
    }

    #[test]
    fn tampered_value_is_rejected() {
        let signed = sign_value(SECRET, "session-id-1");
        let tampered = signed.replacen("session-id-1", "session-id-2", 1);
        assert!(verify_value(SECRET, &tampered).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signed = sign_value(SECRET, "session-id-1");
        assert!(verify_value("another-secret-another-secret!!", &signed).is_none());
    }

    #[test]
    fn unsigned_or_garbage_values_are_rejected() {
        assert!(verify_value(SECRET, "no-signature").is_none());
        assert!(verify_value(SECRET, "value.nothex").is_none());
    }

    #[test]
    fn read_cookie_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; fittrack_session=abc.def; x=y"),
        );
        assert_eq!(
            read_cookie(&headers, SESSION_COOKIE).as_deref(),
            Some("abc.def")
        );
        assert!(read_cookie(&headers, LOGIN_COOKIE).is_none());
    }

    #[test]
    fn build_cookie_sets_security_attributes() {
        let cookie = build_cookie(SESSION_COOKIE, "v", 3600, true);
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Max-Age=3600"));

        let insecure = build_cookie(SESSION_COOKIE, "v", 3600, false);
        assert!(!insecure.contains("Secure"));
    }
}
