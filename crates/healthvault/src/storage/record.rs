//! On-disk record format.
//!
//! Each record is a JSON file:
//! ```json
//! {
//!     "version": 1,
//!     "format": "hvr-v1",
//!     "encryption": {
//!         "algorithm": "AES-256-GCM",
//!         "nonce": "<base64-12-bytes>",
//!         "auth_tag": "<base64-16-bytes>"
//!     },
//!     "ciphertext": "<base64>",
//!     "metadata": { "timestamp": "2024-01-01T10:15:00+00:00" }
//! }
//! ```
//!
//! Metadata is plaintext and used for query filtering only; it must not
//! carry sensitive content.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::encryption::{CipherAlgorithm, EncryptedPayload};
use crate::error::{Result, VaultError};

const RECORD_VERSION: u32 = 1;
const RECORD_FORMAT: &str = "hvr-v1";

/// Metadata key holding an RFC 3339 timestamp, used by time-range filters.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Plaintext metadata attached to a record.
pub type Metadata = BTreeMap<String, String>;

/// The unit persisted per storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub encrypted: EncryptedPayload,
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    version: u32,
    format: String,
    encryption: EncryptionMetadata,
    ciphertext: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptionMetadata {
    algorithm: CipherAlgorithm,
    nonce: String,
    auth_tag: String,
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| VaultError::InvalidFileFormat(format!("invalid {field} base64: {e}")))
}

impl StoredRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let file = RecordFile {
            version: RECORD_VERSION,
            format: RECORD_FORMAT.to_string(),
            encryption: EncryptionMetadata {
                algorithm: self.encrypted.algorithm,
                nonce: STANDARD.encode(&self.encrypted.nonce),
                auth_tag: STANDARD.encode(&self.encrypted.auth_tag),
            },
            ciphertext: STANDARD.encode(&self.encrypted.ciphertext),
            metadata: self.metadata.clone(),
        };
        serde_json::to_vec_pretty(&file).map_err(|e| VaultError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: RecordFile = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::InvalidFileFormat(format!("failed to parse record: {e}")))?;
        if file.version != RECORD_VERSION || file.format != RECORD_FORMAT {
            return Err(VaultError::InvalidFileFormat(format!(
                "unsupported record version={} format={}",
                file.version, file.format
            )));
        }
        Ok(Self {
            encrypted: EncryptedPayload {
                ciphertext: decode("ciphertext", &file.ciphertext)?,
                nonce: decode("nonce", &file.encryption.nonce)?,
                auth_tag: decode("auth_tag", &file.encryption.auth_tag)?,
                algorithm: file.encryption.algorithm,
            },
            metadata: file.metadata,
        })
    }
}
