//! Partition index: owner → category → keys in insertion order.
//!
//! The index is a cache over the record tree. It is persisted as a single
//! JSON file and rewritten wholesale on every change; callers serialize
//! mutation (the store holds it behind a mutex). A missing or unreadable
//! index file yields an empty index, and queries fall back to scanning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::storage::fs::write_atomic;
use crate::storage::key::StorageKey;

const INDEX_VERSION: u32 = 1;

type Partitions = BTreeMap<String, BTreeMap<String, Vec<StorageKey>>>;

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    partitions: Partitions,
}

/// In-memory partition index bound to its backing file.
#[derive(Debug)]
pub struct PartitionIndex {
    path: PathBuf,
    partitions: Partitions,
}

impl PartitionIndex {
    /// Load the index from `path`.
    ///
    /// Never fails: an absent file gives an empty index, and an unreadable
    /// one is reported on the log channel and treated as absent.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let partitions = match read_index(&path) {
            Ok(Some(p)) => p,
            Ok(None) => Partitions::new(),
            Err(e) => {
                log::warn!(
                    "index {} unusable, falling back to directory scans: {e}",
                    path.display()
                );
                Partitions::new()
            }
        };
        Self { path, partitions }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys recorded for a partition, if the index knows it.
    pub fn keys(&self, owner: &str, category: &str) -> Option<&[StorageKey]> {
        self.partitions
            .get(owner)?
            .get(category)
            .map(Vec::as_slice)
    }

    /// Append `key` to its partition. Returns `false` if already present.
    pub fn insert(&mut self, key: &StorageKey) -> bool {
        let keys = self
            .partitions
            .entry(key.owner().to_string())
            .or_default()
            .entry(key.category().to_string())
            .or_default();
        if keys.contains(key) {
            return false;
        }
        keys.push(key.clone());
        true
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &StorageKey) -> bool {
        let Some(categories) = self.partitions.get_mut(key.owner()) else {
            return false;
        };
        let Some(keys) = categories.get_mut(key.category()) else {
            return false;
        };
        let before = keys.len();
        keys.retain(|k| k != key);
        let removed = keys.len() != before;
        if keys.is_empty() {
            categories.remove(key.category());
        }
        if categories.is_empty() {
            self.partitions.remove(key.owner());
        }
        removed
    }

    /// Replace one partition's key list, dropping it when `keys` is empty.
    pub fn replace_partition(&mut self, owner: &str, category: &str, keys: Vec<StorageKey>) {
        if keys.is_empty() {
            if let Some(categories) = self.partitions.get_mut(owner) {
                categories.remove(category);
                if categories.is_empty() {
                    self.partitions.remove(owner);
                }
            }
            return;
        }
        self.partitions
            .entry(owner.to_string())
            .or_default()
            .insert(category.to_string(), keys);
    }

    /// Replace the whole table.
    pub fn replace_all(&mut self, keys: impl IntoIterator<Item = StorageKey>) {
        self.partitions.clear();
        for key in keys {
            self.insert(&key);
        }
    }

    /// Total number of indexed keys.
    pub fn len(&self) -> usize {
        self.partitions
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Rewrite the backing file from the in-memory table.
    pub fn save(&self) -> Result<()> {
        let file = IndexFile {
            version: INDEX_VERSION,
            partitions: self.partitions.clone(),
        };
        let json =
            serde_json::to_vec(&file).map_err(|e| VaultError::SerializationError(e.to_string()))?;
        write_atomic(&self.path, &json)
    }
}

fn read_index(path: &Path) -> Result<Option<Partitions>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(VaultError::Io(e)),
    };
    let file: IndexFile = serde_json::from_slice(&bytes)
        .map_err(|e| VaultError::InvalidFileFormat(format!("failed to parse index: {e}")))?;
    if file.version != INDEX_VERSION {
        return Err(VaultError::InvalidFileFormat(format!(
            "unsupported index version={}",
            file.version
        )));
    }
    Ok(Some(file.partitions))
}
