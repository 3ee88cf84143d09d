//! Encrypted partitioned record store.
//!
//! Records live at `{root}/{owner}/{category…}/{identifier}.json`, sealed
//! with the owner's 32-byte key. The storage key string is bound into each
//! ciphertext as associated data, so a record copied to another path no
//! longer decrypts.
//!
//! Every operation emits an audit entry whatever its outcome. The partition
//! index is updated after the record write; if persisting the index fails
//! the record is still durable and queries find it by scanning.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audit::AuditLog;
use crate::auth::session::is_authorized;
use crate::config::INDEX_FILE;
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad};
use crate::error::{Result, VaultError};
use crate::storage::filter::QueryFilter;
use crate::storage::fs::{write_atomic, write_new};
use crate::storage::index::PartitionIndex;
use crate::storage::key::{validate_category, validate_segment, StorageKey, RECORD_EXTENSION};
use crate::storage::record::{Metadata, StoredRecord};
use crate::time::{Clock, SystemClock};

/// Attempts at finding a free identifier before `insert` gives up.
const MAX_INSERT_ATTEMPTS: usize = 8;

/// A decrypted query hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub key: StorageKey,
    pub metadata: Metadata,
    pub plaintext: Vec<u8>,
}

/// Filesystem-backed encrypted store. `Send + Sync`; share it via `Arc`.
pub struct EncryptedStore {
    root: PathBuf,
    index: Mutex<PartitionIndex>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

// Best-effort owner/category labels for auditing a key that failed to parse.
fn audit_labels(raw: &str) -> (String, String) {
    let mut parts = raw.split('/');
    let owner = parts.next().filter(|s| !s.is_empty()).unwrap_or("unknown");
    let category = parts.next().filter(|s| !s.is_empty()).unwrap_or("unknown");
    (owner.to_string(), category.to_string())
}

impl EncryptedStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Io` if the root cannot be created.
    pub fn open(root: impl Into<PathBuf>, audit: Arc<AuditLog>) -> Result<Self> {
        Self::with_clock(root, audit, Arc::new(SystemClock))
    }

    /// Open the store, reading audit timestamps from `clock`.
    pub fn with_clock(
        root: impl Into<PathBuf>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index = PartitionIndex::load(root.join(INDEX_FILE));
        Ok(Self {
            root,
            index: Mutex::new(index),
            audit,
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index(&self) -> MutexGuard<'_, PartitionIndex> {
        // Mutations either complete or leave the table untouched.
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn audit(&self, identity: &str, operation: &str, success: bool) {
        self.audit
            .record(identity, operation, self.clock.now_micros(), success);
    }

    fn seal(key: &StorageKey, plaintext: &[u8], metadata: &Metadata, owner_key: &[u8]) -> Result<Vec<u8>> {
        let aad = key.to_string();
        let record = StoredRecord {
            encrypted: encrypt_with_aad(plaintext, owner_key, aad.as_bytes())?,
            metadata: metadata.clone(),
        };
        record.to_bytes()
    }

    /// Record a freshly written key in the index.
    ///
    /// A partition the index does not know yet is seeded from disk first, so
    /// records written before the index existed stay visible.
    fn index_key(&self, key: &StorageKey) {
        let mut index = self.index();
        let changed = if index.keys(key.owner(), key.category()).is_some() {
            index.insert(key)
        } else {
            match self.scan_partition(key.owner(), key.category()) {
                Ok(mut scanned) => {
                    if !scanned.contains(key) {
                        scanned.push(key.clone());
                    }
                    index.replace_partition(key.owner(), key.category(), scanned);
                    true
                }
                Err(e) => {
                    // Left unindexed, the partition is scanned on the next read.
                    log::warn!("record {key} stored but partition not indexed: {e}");
                    false
                }
            }
        };
        if changed {
            if let Err(e) = index.save() {
                log::warn!("record {key} stored but index not persisted: {e}");
            }
        }
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Encrypt `plaintext` and store it under `key`, replacing any record
    /// already there.
    ///
    /// # Errors
    ///
    /// `InvalidKeyFormat` for a malformed key, `InvalidKeyLength` or
    /// `EncryptionFailed` from the cipher, `Io` if the record cannot be
    /// written.
    pub fn put(
        &self,
        key: &str,
        plaintext: &[u8],
        metadata: &Metadata,
        owner_key: &[u8],
    ) -> Result<StorageKey> {
        let parsed = match StorageKey::parse(key) {
            Ok(k) => k,
            Err(e) => {
                let (owner, category) = audit_labels(key);
                self.audit(&owner, &format!("store_{category}"), false);
                return Err(e);
            }
        };
        let operation = format!("store_{}", parsed.category());

        let written = Self::seal(&parsed, plaintext, metadata, owner_key)
            .and_then(|bytes| write_atomic(&self.record_path(&parsed), &bytes));
        if let Err(e) = written {
            self.audit(parsed.owner(), &operation, false);
            return Err(e);
        }

        self.index_key(&parsed);
        self.audit(parsed.owner(), &operation, true);
        Ok(parsed)
    }

    /// Store a new record under a freshly generated identifier.
    ///
    /// Never overwrites: an identifier that already exists on disk is
    /// discarded and another one generated.
    pub fn insert(
        &self,
        owner: &str,
        category: &str,
        plaintext: &[u8],
        metadata: &Metadata,
        owner_key: &[u8],
    ) -> Result<StorageKey> {
        let operation = format!("store_{category}");
        let result = self.insert_new(owner, category, plaintext, metadata, owner_key);
        let audit_owner = if owner.is_empty() { "unknown" } else { owner };
        self.audit(audit_owner, &operation, result.is_ok());
        let key = result?;
        self.index_key(&key);
        Ok(key)
    }

    fn insert_new(
        &self,
        owner: &str,
        category: &str,
        plaintext: &[u8],
        metadata: &Metadata,
        owner_key: &[u8],
    ) -> Result<StorageKey> {
        for _ in 0..MAX_INSERT_ATTEMPTS {
            let key = StorageKey::generate(owner, category, self.clock.now_micros())?;
            let bytes = Self::seal(&key, plaintext, metadata, owner_key)?;
            match write_new(&self.record_path(&key), &bytes) {
                Ok(()) => return Ok(key),
                Err(VaultError::AlreadyExists(_)) => {
                    log::warn!("identifier collision on {key}, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(VaultError::AlreadyExists(format!(
            "no free identifier in {owner}/{category} after {MAX_INSERT_ATTEMPTS} attempts"
        )))
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    fn load(&self, key: &StorageKey) -> Result<Option<StoredRecord>> {
        match std::fs::read(self.record_path(key)) {
            Ok(bytes) => StoredRecord::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::Io(e)),
        }
    }

    fn open_record(key: &StorageKey, record: &StoredRecord, owner_key: &[u8]) -> Result<Vec<u8>> {
        decrypt_with_aad(&record.encrypted, owner_key, key.to_string().as_bytes())
    }

    /// Fetch and decrypt the record at `key`.
    ///
    /// Returns `Ok(None)` when no record exists. A record that exists but
    /// fails verification yields `AuthenticationFailed` (wrong key or
    /// tampering), never `None`.
    pub fn get(&self, key: &str, owner_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let parsed = match StorageKey::parse(key) {
            Ok(k) => k,
            Err(e) => {
                let (owner, category) = audit_labels(key);
                self.audit(&owner, &format!("retrieve_{category}"), false);
                return Err(e);
            }
        };
        self.retrieve(&parsed, owner_key)
    }

    fn retrieve(&self, key: &StorageKey, owner_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let operation = format!("retrieve_{}", key.category());
        let result = self
            .load(key)
            .and_then(|record| match record {
                Some(record) => Self::open_record(key, &record, owner_key).map(Some),
                None => Ok(None),
            });
        self.audit(key.owner(), &operation, matches!(result, Ok(Some(_))));
        result
    }

    /// Decrypted payloads of every record in (`owner`, `category`) that
    /// passes `filter`.
    ///
    /// Records that cannot be read or decrypted are skipped.
    pub fn query(
        &self,
        owner: &str,
        category: &str,
        filter: &QueryFilter,
        owner_key: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .query_entries(owner, category, filter, owner_key)?
            .into_iter()
            .map(|entry| entry.plaintext)
            .collect())
    }

    /// Like [`query`](Self::query) but keeps each hit's key and metadata.
    pub fn query_entries(
        &self,
        owner: &str,
        category: &str,
        filter: &QueryFilter,
        owner_key: &[u8],
    ) -> Result<Vec<RecordEntry>> {
        let operation = format!("query_{category}");
        let keys = match self.list(owner, category) {
            Ok(keys) => keys,
            Err(e) => {
                let audit_owner = if owner.is_empty() { "unknown" } else { owner };
                self.audit(audit_owner, &operation, false);
                return Err(e);
            }
        };

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let record = match self.load(&key) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("query {owner}/{category}: skipping unreadable {key}: {e}");
                    continue;
                }
            };
            if !filter.matches(&record.metadata) {
                continue;
            }
            let opened = Self::open_record(&key, &record, owner_key);
            self.audit(key.owner(), &format!("retrieve_{category}"), opened.is_ok());
            match opened {
                Ok(plaintext) => entries.push(RecordEntry {
                    key,
                    metadata: record.metadata,
                    plaintext,
                }),
                Err(e) => log::warn!("query {owner}/{category}: skipping {key}: {e}"),
            }
        }

        self.audit(owner, &operation, true);
        Ok(entries)
    }

    /// Keys in a partition, from the index when it knows the partition and
    /// from a directory scan otherwise.
    ///
    /// An indexed key whose file has disappeared triggers a rescan, and the
    /// partition's index entry is replaced with what the scan found.
    pub fn list(&self, owner: &str, category: &str) -> Result<Vec<StorageKey>> {
        validate_segment(owner)?;
        validate_category(category)?;

        // Held across check, scan and repair so a concurrent write cannot be
        // overwritten by a stale scan.
        let mut index = self.index();
        if let Some(keys) = index.keys(owner, category) {
            match keys.iter().find(|k| !self.record_path(k).is_file()) {
                None => return Ok(keys.to_vec()),
                Some(missing) => {
                    let e = VaultError::IndexCorruption(missing.to_string());
                    log::warn!("{e}; rescanning {owner}/{category}");
                }
            }
        }

        let scanned = self.scan_partition(owner, category)?;
        if index.keys(owner, category) != Some(scanned.as_slice()) {
            index.replace_partition(owner, category, scanned.clone());
            if let Err(e) = index.save() {
                log::warn!("index repair for {owner}/{category} not persisted: {e}");
            }
        }
        Ok(scanned)
    }

    fn scan_partition(&self, owner: &str, category: &str) -> Result<Vec<StorageKey>> {
        let dir = self.root.join(StorageKey::partition_dir(owner, category));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::Io(e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(identifier) = name.strip_suffix(&format!(".{RECORD_EXTENSION}")) else {
                continue;
            };
            match StorageKey::new(owner, category, identifier) {
                Ok(key) => keys.push(key),
                Err(_) => continue,
            }
        }
        keys.sort_by(|a, b| a.identifier().cmp(b.identifier()));
        Ok(keys)
    }

    /// Rebuild the whole index from the record tree. Returns the key count.
    pub fn rebuild_index(&self) -> Result<usize> {
        let mut index = self.index();
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let owner = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && validate_segment(&owner).is_ok() {
                self.walk(&entry.path(), &owner, &mut Vec::new(), &mut keys)?;
            }
        }
        keys.sort();

        index.replace_all(keys);
        index.save()?;
        Ok(index.len())
    }

    fn walk(
        &self,
        dir: &Path,
        owner: &str,
        category: &mut Vec<String>,
        out: &mut Vec<StorageKey>,
    ) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if validate_segment(&name).is_ok() {
                    category.push(name);
                    self.walk(&entry.path(), owner, category, out)?;
                    category.pop();
                }
            } else if file_type.is_file() && !category.is_empty() {
                if let Some(identifier) = name.strip_suffix(&format!(".{RECORD_EXTENSION}")) {
                    if let Ok(key) = StorageKey::new(owner, category.join("/"), identifier) {
                        out.push(key);
                    }
                }
            }
        }
        Ok(())
    }

    // ── Deletes ─────────────────────────────────────────────────────────────

    /// Delete the record at `key` on behalf of `identity`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` unless `identity` owns the key, `NotFound` if no record
    /// exists, `Io` for other filesystem failures.
    pub fn delete(&self, key: &str, identity: &str) -> Result<()> {
        let parsed = match StorageKey::parse(key) {
            Ok(k) => k,
            Err(e) => {
                let (_, category) = audit_labels(key);
                self.audit(identity, &format!("delete_{category}"), false);
                return Err(e);
            }
        };
        let operation = format!("delete_{}", parsed.category());

        if !is_authorized(identity, key) {
            log::warn!("{identity} attempted to delete {parsed}");
            self.audit(identity, &format!("unauthorized_delete_{parsed}"), false);
            return Err(VaultError::Unauthorized {
                identity: identity.to_string(),
                resource: parsed.to_string(),
            });
        }

        match std::fs::remove_file(self.record_path(&parsed)) {
            Ok(()) => {}
            Err(e) => {
                self.audit(identity, &operation, false);
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    VaultError::NotFound(parsed.to_string())
                } else {
                    VaultError::Io(e)
                });
            }
        }

        {
            let mut index = self.index();
            if index.remove(&parsed) {
                if let Err(e) = index.save() {
                    log::warn!("record {parsed} deleted but index not persisted: {e}");
                }
            }
        }
        self.audit(identity, &operation, true);
        Ok(())
    }
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
