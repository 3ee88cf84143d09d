//! Session tokens and credential checks.
//!
//! Sessions live only in memory. A token is valid from issuance until a
//! fixed expiry; it is never renewed on use. Expired sessions are dropped
//! the first time a lookup observes them, or in bulk by
//! [`SessionRegistry::sweep_expired`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audit::AuditLog;
use crate::auth::rate_limit::FailedAttemptLog;
use crate::config::VaultConfig;
use crate::crypto::password::verify_password;
use crate::crypto::random::random_token;
use crate::error::{Result, VaultError};
use crate::time::{duration_micros, Clock, SystemClock};

/// Audit operation name for credential checks.
pub const AUTH_OPERATION: &str = "authentication";

/// An issued session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub owner_id: String,
    /// Microseconds since Unix epoch.
    pub expires_at: u64,
}

/// Why an authentication attempt ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthReason {
    Authenticated,
    RateLimited,
    InvalidCredentials,
}

/// Outcome of [`SessionRegistry::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    pub identity: String,
    pub token: Option<String>,
    pub expires_at: Option<u64>,
    pub reason: AuthReason,
}

impl AuthResult {
    fn rejected(identity: &str, reason: AuthReason) -> Self {
        Self {
            success: false,
            identity: identity.to_string(),
            token: None,
            expires_at: None,
            reason,
        }
    }

    /// Convert into the issued session, or the matching error.
    pub fn into_session(self) -> Result<Session> {
        match (self.reason, self.token, self.expires_at) {
            (AuthReason::Authenticated, Some(token), Some(expires_at)) => Ok(Session {
                token,
                owner_id: self.identity,
                expires_at,
            }),
            (AuthReason::RateLimited, _, _) => Err(VaultError::RateLimited(self.identity)),
            _ => Err(VaultError::InvalidCredentials),
        }
    }
}

#[derive(Debug)]
struct RegistryState {
    sessions: HashMap<String, Session>,
    failures: FailedAttemptLog,
}

/// Process-wide session table and failed-attempt tracker.
///
/// Shared behind an `Arc`; all mutation happens under one mutex. Password
/// verification runs outside the lock, after the attempt has been counted.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLog>>,
    ttl_micros: u64,
}

impl SessionRegistry {
    /// Registry using the wall clock and the limits in `config`.
    pub fn new(config: &VaultConfig, audit: Option<Arc<AuditLog>>) -> Self {
        Self::with_clock(config, audit, Arc::new(SystemClock))
    }

    /// Registry reading time from `clock`.
    pub fn with_clock(
        config: &VaultConfig,
        audit: Option<Arc<AuditLog>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: HashMap::new(),
                failures: FailedAttemptLog::new(
                    duration_micros(config.rate_limit_window()),
                    config.max_failed_attempts,
                ),
            }),
            clock,
            audit,
            ttl_micros: duration_micros(config.session_ttl()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every critical section leaves both tables consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn audit(&self, identity: &str, now: u64, success: bool) {
        if let Some(audit) = &self.audit {
            audit.record(identity, AUTH_OPERATION, now, success);
        }
    }

    /// Check `password` against `stored_hash` and issue a session on success.
    ///
    /// A rate-limited identity is rejected before the password is looked at.
    /// Every other attempt is charged against the limit before verification
    /// starts, so concurrent guesses cannot all pass the check at once.
    pub fn authenticate(&self, identity: &str, password: &str, stored_hash: &str) -> AuthResult {
        let now = self.clock.now_micros();

        if !self.lock().failures.try_reserve(identity, now) {
            log::warn!("authentication for {identity} rejected: rate limited");
            self.audit(identity, now, false);
            return AuthResult::rejected(identity, AuthReason::RateLimited);
        }

        let verified = match verify_password(password, stored_hash) {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("authentication for {identity}: {e}");
                false
            }
        };

        if !verified {
            self.audit(identity, now, false);
            return AuthResult::rejected(identity, AuthReason::InvalidCredentials);
        }

        let session = Session {
            token: random_token(),
            owner_id: identity.to_string(),
            expires_at: now.saturating_add(self.ttl_micros),
        };
        {
            let mut state = self.lock();
            state.failures.clear(identity);
            state.sessions.insert(session.token.clone(), session.clone());
        }
        self.audit(identity, now, true);

        AuthResult {
            success: true,
            identity: session.owner_id,
            token: Some(session.token),
            expires_at: Some(session.expires_at),
            reason: AuthReason::Authenticated,
        }
    }

    /// Resolve a token to its owner, if the session exists and has not expired.
    pub fn verify_session(&self, token: &str) -> Option<String> {
        let now = self.clock.now_micros();
        let mut state = self.lock();
        let expires_at = state.sessions.get(token)?.expires_at;
        if now > expires_at {
            state.sessions.remove(token);
            return None;
        }
        state.sessions.get(token).map(|s| s.owner_id.clone())
    }

    /// Re-authentication gate: the token must be live and belong to `identity`.
    pub fn require_session(&self, identity: &str, token: &str) -> Result<()> {
        match self.verify_session(token) {
            Some(owner) if owner == identity => Ok(()),
            _ => Err(VaultError::Unauthorized {
                identity: identity.to_string(),
                resource: "session".to_string(),
            }),
        }
    }

    /// End a session early. Returns whether it existed.
    pub fn revoke_session(&self, token: &str) -> bool {
        self.lock().sessions.remove(token).is_some()
    }

    /// Drop every expired session, and forget identities whose failed
    /// attempts all left the rate-limit window. Returns how many sessions
    /// were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_micros();
        let mut state = self.lock();
        state.failures.sweep(now);
        let before = state.sessions.len();
        state.sessions.retain(|_, s| now <= s.expires_at);
        before - state.sessions.len()
    }

    /// Number of sessions currently held, expired or not.
    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Failed attempts currently recorded for `identity`.
    pub fn failed_attempts(&self, identity: &str) -> usize {
        self.lock().failures.count(identity)
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("ttl_micros", &self.ttl_micros)
            .finish_non_exhaustive()
    }
}

/// Whether `identity` owns `resource` (`owner/category/...`).
///
/// Exact match on the first path segment; there is no admin or group override.
pub fn is_authorized(identity: &str, resource: &str) -> bool {
    !identity.is_empty() && resource.split('/').next() == Some(identity)
}
