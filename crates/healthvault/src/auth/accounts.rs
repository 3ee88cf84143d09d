//! Account registry — password hashes and data-key salts per identity.
//!
//! The data key that seals a user's records is derived from their password
//! with PBKDF2; the salt for that derivation must survive restarts or the
//! key changes. It is stored here next to the Argon2id password hash.
//!
//! File format (`accounts.json`):
//! ```json
//! {
//!     "version": 1,
//!     "accounts": {
//!         "alice": {
//!             "password_hash": "$argon2id$v=19$...",
//!             "kdf_salt": "<base64-16-bytes>",
//!             "created_at": 1704103200000000
//!         }
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::derivation::{derive_key, SALT_LEN};
use crate::crypto::password::hash_password;
use crate::crypto::random::random_salt_16;
use crate::error::{Result, VaultError};
use crate::storage::fs::write_atomic;
use crate::storage::key::validate_segment;
use crate::time::now_micros;

const ACCOUNTS_FILE_VERSION: u32 = 1;

/// Stored credentials for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub password_hash: String,
    /// Base64-encoded PBKDF2 salt.
    pub kdf_salt: String,
    pub created_at: u64,
}

impl AccountRecord {
    /// Decode the stored PBKDF2 salt.
    pub fn salt(&self) -> Result<[u8; SALT_LEN]> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.kdf_salt)
            .map_err(|e| VaultError::InvalidFileFormat(format!("invalid salt base64: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| VaultError::InvalidFileFormat("salt must be 16 bytes".to_string()))
    }

    /// Re-derive the data key for this account.
    ///
    /// The password is not checked here; authenticate first.
    pub fn derive_data_key(&self, password: &str) -> Result<Zeroizing<[u8; 32]>> {
        let (key, _) = derive_key(password, Some(self.salt()?));
        Ok(Zeroizing::new(key))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    version: u32,
    accounts: BTreeMap<String, AccountRecord>,
}

/// Filesystem-backed account registry.
pub struct AccountStore {
    path: PathBuf,
    accounts: Mutex<BTreeMap<String, AccountRecord>>,
}

impl AccountStore {
    /// Open the registry at `path`, starting empty if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidFileFormat` if the file exists but cannot
    /// be parsed, or `VaultError::Io` for filesystem errors.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let accounts = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: AccountsFile = serde_json::from_slice(&bytes).map_err(|e| {
                    VaultError::InvalidFileFormat(format!(
                        "failed to parse accounts file {}: {e}",
                        path.display()
                    ))
                })?;
                if file.version != ACCOUNTS_FILE_VERSION {
                    return Err(VaultError::InvalidFileFormat(format!(
                        "unsupported accounts file version={}",
                        file.version
                    )));
                }
                file.accounts
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(VaultError::Io(e)),
        };
        Ok(Self {
            path,
            accounts: Mutex::new(accounts),
        })
    }

    /// Create an account. Identities follow the storage-key segment rules.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::AlreadyExists` if the identity is taken,
    /// `VaultError::InvalidKeyFormat` for an unusable identity.
    pub fn register(&self, identity: &str, password: &str) -> Result<AccountRecord> {
        validate_segment(identity)?;
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if accounts.contains_key(identity) {
            return Err(VaultError::AlreadyExists(format!("account {identity}")));
        }

        let salt = random_salt_16();
        let record = AccountRecord {
            password_hash: hash_password(password)?,
            kdf_salt: base64::engine::general_purpose::STANDARD.encode(salt),
            created_at: now_micros(),
        };
        accounts.insert(identity.to_string(), record.clone());

        let file = AccountsFile {
            version: ACCOUNTS_FILE_VERSION,
            accounts: accounts.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| VaultError::SerializationError(e.to_string()))?;
        if let Err(e) = write_atomic(&self.path, &json) {
            accounts.remove(identity);
            return Err(e);
        }
        Ok(record)
    }

    /// Look up an account.
    pub fn get(&self, identity: &str) -> Option<AccountRecord> {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    /// Registered identities in sorted order.
    pub fn identities(&self) -> Vec<String> {
        self.accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}
