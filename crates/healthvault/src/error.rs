//! Error types for HealthVault.
//!
//! All errors are strongly typed and propagated without panicking.
//! Key material, passwords and plaintext are never included in messages.

/// Vault error types covering all operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid storage key: {0}")]
    InvalidKeyFormat(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tag verification failed: tampered payload, wrong key, or corruption.
    #[error("Authentication failed: ciphertext could not be verified")]
    AuthenticationFailed,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Too many failed attempts for {0}")]
    RateLimited(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{identity} is not authorized for {resource}")]
    Unauthorized { identity: String, resource: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Index references missing record: {0}")]
    IndexCorruption(String),

    #[error("Audit chain broken at line {line}")]
    AuditChainBroken { line: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, VaultError>;
