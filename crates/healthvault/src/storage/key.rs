//! Hierarchical storage keys: `owner/category/identifier`.
//!
//! The owner is the first segment and the identifier the last; everything
//! in between is the category, so `alice/wellness/vitals/20240101_101500_…`
//! belongs to partition (`alice`, `wellness/vitals`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ACCOUNTS_FILE, AUDIT_FILE, CONFIG_FILE, INDEX_FILE};
use crate::error::{Result, VaultError};
use crate::time::micros_to_datetime;

/// File extension for record files.
pub const RECORD_EXTENSION: &str = "json";

/// A validated record address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorageKey {
    owner: String,
    category: String,
    identifier: String,
}

/// Check a single path segment.
///
/// Segments are non-empty, contain no separators or NUL, and do not start
/// with `.` or `_` (reserved for temp files and vault bookkeeping). A
/// segment may not end in the record extension, where a directory would
/// shadow a record file, nor name one of the vault's own root files.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(VaultError::InvalidKeyFormat("empty segment".into()));
    }
    if segment.starts_with('.') || segment.starts_with('_') {
        return Err(VaultError::InvalidKeyFormat(format!(
            "segment {segment:?} starts with a reserved character"
        )));
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(VaultError::InvalidKeyFormat(format!(
            "segment {segment:?} contains a separator"
        )));
    }
    if segment.ends_with(&format!(".{RECORD_EXTENSION}"))
        || [CONFIG_FILE, AUDIT_FILE, INDEX_FILE, ACCOUNTS_FILE].contains(&segment)
    {
        return Err(VaultError::InvalidKeyFormat(format!(
            "segment {segment:?} is reserved"
        )));
    }
    Ok(())
}

/// Check a category, which may span several `/`-separated segments.
pub fn validate_category(category: &str) -> Result<()> {
    if category.is_empty() {
        return Err(VaultError::InvalidKeyFormat("empty category".into()));
    }
    category.split('/').try_for_each(validate_segment)
}

impl StorageKey {
    /// Build a key from its parts.
    pub fn new(
        owner: impl Into<String>,
        category: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            owner: owner.into(),
            category: category.into(),
            identifier: identifier.into(),
        };
        validate_segment(&key.owner)?;
        validate_category(&key.category)?;
        validate_segment(&key.identifier)?;
        Ok(key)
    }

    /// Parse `owner/category[/...]/identifier`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (owner, rest) = raw.split_once('/').ok_or_else(|| {
            VaultError::InvalidKeyFormat(format!(
                "{raw:?}: expected owner/category/identifier"
            ))
        })?;
        let (category, identifier) = rest.rsplit_once('/').ok_or_else(|| {
            VaultError::InvalidKeyFormat(format!(
                "{raw:?}: expected owner/category/identifier"
            ))
        })?;
        Self::new(owner, category, identifier)
    }

    /// A fresh key in partition (`owner`, `category`).
    ///
    /// The identifier is `YYYYmmdd_HHMMSS_<uuid-v4>`: sortable by creation
    /// second, unique through the random suffix.
    pub fn generate(owner: &str, category: &str, timestamp_micros: u64) -> Result<Self> {
        let stamp = micros_to_datetime(timestamp_micros).format("%Y%m%d_%H%M%S");
        Self::new(
            owner,
            category,
            format!("{stamp}_{}", Uuid::new_v4().simple()),
        )
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Path of the record file relative to the vault root.
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.owner);
        for part in self.category.split('/') {
            path.push(part);
        }
        path.push(format!("{}.{RECORD_EXTENSION}", self.identifier));
        path
    }

    /// Directory holding every record of this key's partition, relative to
    /// the vault root.
    pub fn partition_dir(owner: &str, category: &str) -> PathBuf {
        let mut path = PathBuf::from(owner);
        for part in category.split('/') {
            path.push(part);
        }
        path
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.category, self.identifier)
    }
}

impl FromStr for StorageKey {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StorageKey {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<StorageKey> for String {
    fn from(key: StorageKey) -> Self {
        key.to_string()
    }
}
