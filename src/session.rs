//! Server-side sessions and single-use CSRF state.
//!
//! [`SessionStore`] abstracts the backing store so a multi-instance
//! deployment can plug in a shared store; [`InMemorySessionStore`] is the
//! default and is only suitable for a **single-process** deployment —
//! sessions and pending states vanish on restart and are invisible to
//! other instances.
//!
//! CSRF state consumption is atomic: the entry is removed first and
//! compared afterwards (in constant time), so two concurrent callbacks
//! carrying the same state can never both pass.

use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use dashmap::DashMap;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::IdentityClaims;

/// Tokens issued by the provider for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token presented to downstream resource servers.
    pub access_token: String,
    /// Refresh token, when the provider issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OIDC identity token, when the `openid` scope was granted.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Access-token expiry (Unix epoch seconds).
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl TokenSet {
    /// Build from the provider's token response fields.
    #[must_use]
    pub fn from_response(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: Option<u64>,
    ) -> Self {
        let expires_at = expires_in.map(|secs| now_unix() + secs);
        Self {
            access_token,
            refresh_token,
            id_token,
            expires_at,
        }
    }

    /// Whether the access token is stale and must be refreshed before
    /// reuse against a downstream resource server (60 s safety buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now_unix() + 60 >= expires_at)
    }
}

/// A server-side session bound to one browser via an opaque cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier (the cookie value is a signed form of this).
    pub id: String,
    /// Identity decoded from the verified ID token at callback time.
    pub identity: IdentityClaims,
    /// Token set owned by this session.
    pub tokens: TokenSet,
    /// Session expiry (Unix epoch seconds).
    pub expires_at: u64,
}

impl Session {
    /// Whether the session itself has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires_at
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

struct PendingState {
    value: String,
    issued_at: Instant,
}

/// Pluggable session persistence.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Create a session for a verified identity; returns the new session id.
    async fn create(&self, identity: IdentityClaims, tokens: TokenSet) -> String;

    /// Look up a session. Returns `None` for unknown or expired ids.
    async fn get(&self, session_id: &str) -> Option<Session>;

    /// Replace a session's token set (after a refresh). Returns `false`
    /// when the session no longer exists.
    async fn update_tokens(&self, session_id: &str, tokens: TokenSet) -> bool;

    /// Destroy a session server-side. Returns `true` if it existed.
    async fn destroy(&self, session_id: &str) -> bool;

    /// Bind a freshly issued CSRF state to a pre-auth login key.
    async fn put_state(&self, login_key: &str, state: &str);

    /// Atomically consume the state bound to `login_key` and report whether
    /// it matches `candidate`. The stored state is deleted regardless of
    /// the outcome, so a second consumption always fails.
    async fn consume_state(&self, login_key: &str, candidate: &str) -> bool;

    /// Evict expired sessions and abandoned states. Returns the count.
    async fn reap_expired(&self) -> usize;
}

/// In-memory store backed by `DashMap`. Single-process deployments only.
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
    states: DashMap<String, PendingState>,
    session_ttl: Duration,
    state_ttl: Duration,
}

impl InMemorySessionStore {
    /// Create a store with the given session and CSRF-state lifetimes.
    #[must_use]
    pub fn new(session_ttl: Duration, state_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            states: DashMap::new(),
            session_ttl,
            state_ttl,
        }
    }

    /// Generate an opaque session identifier (256 bits of entropy).
    #[must_use]
    pub fn generate_session_id() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        )
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, identity: IdentityClaims, tokens: TokenSet) -> String {
        let id = Self::generate_session_id();
        let session = Session {
            id: id.clone(),
            identity,
            tokens,
            expires_at: now_unix() + self.session_ttl.as_secs(),
        };
        self.sessions.insert(id.clone(), session);
        id
    }

    async fn get(&self, session_id: &str) -> Option<Session> {
        let entry = self.sessions.get(session_id)?;
        let session = entry.clone();
        drop(entry);

        if session.is_expired() {
            // Lazy eviction on access
            self.sessions.remove(session_id);
            debug!("lazy-evicted expired session");
            return None;
        }
        Some(session)
    }

    async fn update_tokens(&self, session_id: &str, tokens: TokenSet) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.tokens = tokens;
                true
            }
            None => false,
        }
    }

    async fn destroy(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    async fn put_state(&self, login_key: &str, state: &str) {
        self.states.insert(
            login_key.to_string(),
            PendingState {
                value: state.to_string(),
                issued_at: Instant::now(),
            },
        );
    }

    async fn consume_state(&self, login_key: &str, candidate: &str) -> bool {
        // Remove first: whatever happens next, this state can never be
        // presented a second time.
        let Some((_, pending)) = self.states.remove(login_key) else {
            return false;
        };
        if pending.issued_at.elapsed() > self.state_ttl {
            debug!("discarding expired oauth state");
            return false;
        }
        pending
            .value
            .as_bytes()
            .ct_eq(candidate.as_bytes())
            .into()
    }

    async fn reap_expired(&self) -> usize {
        let mut reaped = 0;

        let expired_sessions: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        for id in expired_sessions {
            if self.sessions.remove(&id).is_some() {
                reaped += 1;
            }
        }

        let abandoned_states: Vec<String> = self
            .states
            .iter()
            .filter(|e| e.value().issued_at.elapsed() > self.state_ttl)
            .map(|e| e.key().clone())
            .collect();
        for key in abandoned_states {
            if self.states.remove(&key).is_some() {
                reaped += 1;
            }
        }

        reaped
    }
}

/// Spawn a background task evicting expired sessions and abandoned states
/// every `interval`. Exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn SessionStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "reaped expired sessions/states");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("session reaper shutting down");
                    break;
                }
            }
        }
    });
}
