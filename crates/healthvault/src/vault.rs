//! Vault facade: one handle over config, audit log, accounts, sessions and
//! the encrypted store.
//!
//! Everything is built explicitly in [`Vault::open`]; the shared tables are
//! owned here and handed to the components that need them.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::audit::AuditLog;
use crate::auth::accounts::{AccountRecord, AccountStore};
use crate::auth::session::{Session, SessionRegistry, AUTH_OPERATION};
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::storage::store::EncryptedStore;
use crate::time::{Clock, SystemClock};

/// Audit identity for requests that carry no live session.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// An open vault rooted at `config.root()`.
pub struct Vault {
    config: VaultConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditLog>,
    sessions: Arc<SessionRegistry>,
    accounts: AccountStore,
    store: EncryptedStore,
}

impl Vault {
    /// Open (or create) the vault described by `config`.
    ///
    /// # Errors
    ///
    /// `Io` if the root or audit log cannot be created, `InvalidFileFormat`
    /// if the account registry is unreadable.
    pub fn open(config: VaultConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open the vault with an injected clock.
    pub fn open_with_clock(config: VaultConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(config.root())?;
        let audit = Arc::new(AuditLog::open(config.audit_path())?);
        let sessions = Arc::new(SessionRegistry::with_clock(
            &config,
            Some(Arc::clone(&audit)),
            Arc::clone(&clock),
        ));
        let accounts = AccountStore::open(config.accounts_path())?;
        let store = EncryptedStore::with_clock(config.root(), Arc::clone(&audit), Arc::clone(&clock))?;
        log::debug!("opened vault at {}", config.root().display());
        Ok(Self {
            config,
            clock,
            audit,
            sessions,
            accounts,
            store,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn store(&self) -> &EncryptedStore {
        &self.store
    }

    /// Create an account for `identity`.
    pub fn register(&self, identity: &str, password: &str) -> Result<AccountRecord> {
        let result = self.accounts.register(identity, password);
        self.audit
            .record(identity, "register", self.clock.now_micros(), result.is_ok());
        result
    }

    /// Authenticate and open a session.
    ///
    /// An unknown identity is indistinguishable from a wrong password.
    pub fn login(&self, identity: &str, password: &str) -> Result<Session> {
        match self.accounts.get(identity) {
            Some(account) => self
                .sessions
                .authenticate(identity, password, &account.password_hash)
                .into_session(),
            None => {
                log::warn!("login for unknown identity {identity}");
                self.audit
                    .record(identity, AUTH_OPERATION, self.clock.now_micros(), false);
                Err(VaultError::InvalidCredentials)
            }
        }
    }

    /// Log in and derive the identity's data key in one step.
    pub fn unlock(&self, identity: &str, password: &str) -> Result<(Session, Zeroizing<[u8; 32]>)> {
        let session = self.login(identity, password)?;
        let account = self
            .accounts
            .get(identity)
            .ok_or(VaultError::InvalidCredentials)?;
        let key = account.derive_data_key(password)?;
        Ok((session, key))
    }

    /// Sensitive-operation gate: `token` must be a live session of `identity`.
    pub fn require_reauth(&self, identity: &str, token: &str) -> Result<()> {
        self.sessions.require_session(identity, token)
    }

    /// Delete a record on behalf of the session's owner.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if the token is not live or the key belongs to someone
    /// else, plus anything [`EncryptedStore::delete`] returns.
    pub fn delete_with_session(&self, key: &str, token: &str) -> Result<()> {
        let Some(identity) = self.sessions.verify_session(token) else {
            // No proven identity; never filed under the key's owner.
            self.audit.record(
                UNKNOWN_IDENTITY,
                &format!("unauthorized_delete_{key}"),
                self.clock.now_micros(),
                false,
            );
            return Err(VaultError::Unauthorized {
                identity: UNKNOWN_IDENTITY.to_string(),
                resource: key.to_string(),
            });
        };
        self.store.delete(key, &identity)
    }

    /// End a session.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.revoke_session(token)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("root", &self.config.root())
            .finish_non_exhaustive()
    }
}
