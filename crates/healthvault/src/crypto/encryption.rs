//! Authenticated symmetric encryption using AES-256-GCM.
//!
//! Every call to [`encrypt`] draws a fresh 12-byte nonce from the OS random
//! source; there is no counter to reset. The 16-byte tag is carried detached
//! from the ciphertext in [`EncryptedPayload`] and verified on every decrypt.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::random::random_nonce_12;
use crate::error::{Result, VaultError};

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Symmetric cipher used for a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
}

impl CipherAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "AES-256-GCM",
        }
    }
}

impl std::fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`encrypt`]: ciphertext plus everything needed to verify and
/// decrypt it except the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub algorithm: CipherAlgorithm,
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(VaultError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(format!("cipher init: {e}")))
}

/// Encrypt `plaintext` under a 32-byte key.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload> {
    encrypt_with_aad(plaintext, key, &[])
}

/// Encrypt `plaintext`, binding `aad` into the tag without encrypting it.
pub fn encrypt_with_aad(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<EncryptedPayload> {
    let cipher = cipher(key)?;
    let nonce = random_nonce_12();
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), aad, &mut buffer)
        .map_err(|e| VaultError::EncryptionFailed(format!("encrypt: {e}")))?;

    Ok(EncryptedPayload {
        ciphertext: buffer,
        nonce: nonce.to_vec(),
        auth_tag: tag.to_vec(),
        algorithm: CipherAlgorithm::Aes256Gcm,
    })
}

/// Decrypt and verify a payload.
///
/// Returns `AuthenticationFailed` if the tag does not verify; no plaintext
/// is released in that case.
pub fn decrypt(payload: &EncryptedPayload, key: &[u8]) -> Result<Vec<u8>> {
    decrypt_with_aad(payload, key, &[])
}

/// Decrypt and verify a payload that was sealed with associated data.
pub fn decrypt_with_aad(payload: &EncryptedPayload, key: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    if payload.nonce.len() != NONCE_LEN || payload.auth_tag.len() != TAG_LEN {
        return Err(VaultError::AuthenticationFailed);
    }

    let mut buffer = payload.ciphertext.clone();
    match cipher.decrypt_in_place_detached(
        GenericArray::from_slice(&payload.nonce),
        aad,
        &mut buffer,
        GenericArray::from_slice(&payload.auth_tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(VaultError::AuthenticationFailed)
        }
    }
}
