//! HealthVault — encrypted, partitioned storage for personal health records.
//!
//! Provides AES-256-GCM record encryption under password-derived keys,
//! owner/category partitioning with a persisted index, password sessions
//! with failed-login rate limiting, and a hash-chained audit trail of every
//! access attempt.

pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod storage;
pub mod time;
pub mod vault;

// Re-export primary types
pub use audit::{AuditEntry, AuditLog};
pub use auth::{AccountStore, AuthReason, AuthResult, Session, SessionRegistry};
pub use config::VaultConfig;
pub use crypto::{CipherAlgorithm, EncryptedPayload};
pub use error::{Result, VaultError};
pub use storage::{EncryptedStore, Metadata, QueryFilter, RecordEntry, StorageKey};
pub use vault::Vault;
