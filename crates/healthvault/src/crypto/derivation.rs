//! Password-based key derivation using PBKDF2-HMAC-SHA256.
//!
//! Turns a user password into the 32-byte data key that seals that user's
//! records. The round count is fixed: changing it changes every derived key.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::crypto::random::random_salt_16;

/// PBKDF2 iteration count.
pub const PBKDF2_ROUNDS: u32 = 100_000;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derive a 32-byte key from `password`.
///
/// When `salt` is `None` a fresh random salt is generated. The salt used is
/// returned so it can be stored next to whatever the key protects.
pub fn derive_key(password: &str, salt: Option<[u8; SALT_LEN]>) -> ([u8; 32], [u8; SALT_LEN]) {
    let salt = salt.unwrap_or_else(random_salt_16);
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut key);
    (key, salt)
}
