//! Vault configuration.
//!
//! Every field has a default; a `healthvault.json` in the vault root may
//! override any subset of them:
//!
//! ```json
//! { "session_ttl_secs": 900, "max_failed_attempts": 3 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::storage::fs::write_atomic;

/// Name of the optional config file inside the vault root.
pub const CONFIG_FILE: &str = "healthvault.json";
/// Audit log file name inside the vault root.
pub const AUDIT_FILE: &str = "audit.log";
/// Index file name inside the vault root.
pub const INDEX_FILE: &str = "_index.json";
/// Account registry file name inside the vault root.
pub const ACCOUNTS_FILE: &str = "accounts.json";

const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 15 * 60;
const DEFAULT_MAX_FAILED_ATTEMPTS: usize = 5;
/// Upper bound for `session_ttl_secs` and `rate_limit_window_secs`.
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Runtime settings for a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Root directory owning records, index, accounts and audit log.
    #[serde(skip)]
    pub root: PathBuf,
    /// Fixed session lifetime from issuance.
    pub session_ttl_secs: u64,
    /// Length of the failed-attempt window.
    pub rate_limit_window_secs: u64,
    /// Failures within the window that lock an identity out.
    pub max_failed_attempts: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            rate_limit_window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
        }
    }
}

impl VaultConfig {
    /// Defaults rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load `healthvault.json` from `root` if present, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Config` if the file exists but does not parse or
    /// holds invalid values.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let path = root.join(CONFIG_FILE);
        let mut config = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<VaultConfig>(&bytes)
                .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VaultConfig::default(),
            Err(e) => return Err(VaultError::Io(e)),
        };
        config.root = root;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration to `healthvault.json` under the root.
    pub fn save(&self) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| VaultError::SerializationError(e.to_string()))?;
        write_atomic(&self.config_path(), &json)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("session_ttl_secs", self.session_ttl_secs),
            ("rate_limit_window_secs", self.rate_limit_window_secs),
        ] {
            if secs == 0 || secs > MAX_DURATION_SECS {
                return Err(VaultError::Config(format!(
                    "{name} must be between 1 and {MAX_DURATION_SECS}"
                )));
            }
        }
        if self.max_failed_attempts == 0 {
            return Err(VaultError::Config("max_failed_attempts must be > 0".into()));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_FILE)
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.root.join(ACCOUNTS_FILE)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
