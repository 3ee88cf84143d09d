//! Cryptographic primitives for HealthVault.
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption with detached tags
//! - PBKDF2-HMAC-SHA256 password-based key derivation
//! - Argon2id password hashing and verification
//! - Cryptographically secure random number generation

pub mod derivation;
pub mod encryption;
pub mod password;
pub mod random;

pub use derivation::derive_key;
pub use encryption::{decrypt, encrypt, CipherAlgorithm, EncryptedPayload};
pub use password::{hash_password, verify_password};
