//! Append-only, hash-chained access log.
//!
//! One line per access attempt:
//!
//! ```text
//! 2024-01-01T10:15:00.000000+00:00 | USER: alice | OPERATION: store_vitals | SUCCESS: true | HASH: 3f1c…
//! ```
//!
//! `HASH` is `SHA-256(previous_hash || body)` in hex, where `body` is the
//! line up to (not including) ` | HASH: `. The first line chains from 64
//! zeros. Editing, dropping or reordering any earlier line breaks every hash
//! after it.
//!
//! Write faults never propagate to the caller; they are reported on the
//! `log` error channel instead.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};
use crate::time::{micros_to_rfc3339, rfc3339_to_micros};

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const HASH_SEPARATOR: &str = " | HASH: ";

/// One parsed audit line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Microseconds since Unix epoch.
    pub timestamp: u64,
    pub owner_id: String,
    pub operation: String,
    pub success: bool,
}

impl AuditEntry {
    fn body(&self) -> String {
        format!(
            "{} | USER: {} | OPERATION: {} | SUCCESS: {}",
            micros_to_rfc3339(self.timestamp),
            sanitize(&self.owner_id),
            sanitize(&self.operation),
            self.success
        )
    }

    fn parse_body(body: &str) -> Option<Self> {
        let mut parts = body.split(" | ");
        let timestamp = rfc3339_to_micros(parts.next()?)?;
        let owner_id = parts.next()?.strip_prefix("USER: ")?.to_string();
        let operation = parts.next()?.strip_prefix("OPERATION: ")?.to_string();
        let success = match parts.next()?.strip_prefix("SUCCESS: ")? {
            "true" => true,
            "false" => false,
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            timestamp,
            owner_id,
            operation,
            success,
        })
    }
}

// Line and field separators must not be forgeable from identities or
// operation names.
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if c.is_control() || c == '|' { '_' } else { c })
        .collect()
}

fn chain_hash(previous: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

struct Writer {
    file: File,
    head: String,
}

/// Append-only audit log backed by a single file.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Option<Writer>>,
}

impl AuditLog {
    /// Open (or create) the audit log at `path`.
    ///
    /// The chain head is recovered from the last line already in the file.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Io` if the file or its directory cannot be
    /// created or read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let head = last_hash(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(Writer { file, head })),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry.
    pub fn record(&self, identity: &str, operation: &str, timestamp: u64, success: bool) {
        let entry = AuditEntry {
            timestamp,
            owner_id: identity.to_string(),
            operation: operation.to_string(),
            success,
        };
        if let Err(e) = self.append(&entry) {
            log::error!(
                "audit log write failed ({}): {} {} success={}: {e}",
                self.path.display(),
                entry.owner_id,
                entry.operation,
                entry.success
            );
        }
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| VaultError::Io(std::io::Error::other("audit writer lock poisoned")))?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| VaultError::Io(std::io::Error::other("audit writer closed")))?;

        let body = entry.body();
        let hash = chain_hash(&writer.head, &body);
        // One write call per line so appenders never interleave.
        let line = format!("{body}{HASH_SEPARATOR}{hash}\n");
        writer.file.write_all(line.as_bytes())?;
        writer.file.flush()?;
        writer.head = hash;
        Ok(())
    }

    /// Parse every entry in the log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::InvalidFileFormat` for a line that does not parse.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for (n, line) in read_lines(&self.path)?.into_iter().enumerate() {
            let (body, _) = split_line(&line).ok_or_else(|| {
                VaultError::InvalidFileFormat(format!("audit line {} has no hash", n + 1))
            })?;
            let entry = AuditEntry::parse_body(body).ok_or_else(|| {
                VaultError::InvalidFileFormat(format!("audit line {} is malformed", n + 1))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Entries recorded for one identity.
    pub fn entries_for(&self, identity: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.owner_id == identity)
            .collect())
    }

    /// Recompute the hash chain over the whole file.
    ///
    /// Returns the number of verified lines.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::AuditChainBroken` with the 1-based number of the
    /// first line whose hash does not match.
    pub fn verify_chain(&self) -> Result<usize> {
        let lines = read_lines(&self.path)?;
        let mut previous = GENESIS_HASH.to_string();
        for (n, line) in lines.iter().enumerate() {
            let (body, hash) = split_line(line).ok_or(VaultError::AuditChainBroken { line: n + 1 })?;
            if chain_hash(&previous, body) != hash {
                return Err(VaultError::AuditChainBroken { line: n + 1 });
            }
            previous = hash.to_string();
        }
        Ok(lines.len())
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("path", &self.path).finish()
    }
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    line.rsplit_once(HASH_SEPARATOR)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(VaultError::Io(e)),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

fn last_hash(path: &Path) -> Result<String> {
    let lines = read_lines(path)?;
    match lines.last() {
        None => Ok(GENESIS_HASH.to_string()),
        Some(line) => match split_line(line) {
            Some((_, hash)) => Ok(hash.to_string()),
            None => {
                log::warn!(
                    "audit log {} ends with an unchained line; continuing from its digest",
                    path.display()
                );
                Ok(chain_hash(GENESIS_HASH, line))
            }
        },
    }
}
