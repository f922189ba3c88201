//! Connection string encryption
//!
//! ODS instance connection strings are stored as `base64(nonce || ciphertext || tag)`
//! produced by AES-256-GCM under the deployment's encryption key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Length of AES-256 key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base64 key: {0}")]
    InvalidKeyEncoding(String),
    #[error("key must be {KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Decrypt capability consumed by the sync. Failure is reported through `None`, never a panic.
pub trait SymmetricStringEncryptionProvider: Send + Sync {
    fn try_decrypt(&self, cipher_text: &str, key: &[u8]) -> Option<String>;

    fn encrypt(&self, plain_text: &str, key: &[u8]) -> Result<String, CryptoError>;
}

/// Decode the configured base64 encryption key
pub fn decode_key(base64_key: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(base64_key.trim())
        .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmEncryptionProvider;

impl SymmetricStringEncryptionProvider for AesGcmEncryptionProvider {
    fn try_decrypt(&self, cipher_text: &str, key: &[u8]) -> Option<String> {
        let raw = STANDARD.decode(cipher_text.trim()).ok()?;
        if raw.len() < NONCE_LENGTH + TAG_LENGTH {
            return None;
        }

        let cipher = Aes256Gcm::new_from_slice(key).ok()?;
        let (nonce_bytes, encrypted) = raw.split_at(NONCE_LENGTH);
        let plain = cipher.decrypt(Nonce::from_slice(nonce_bytes), encrypted).ok()?;
        String::from_utf8(plain).ok()
    }

    fn encrypt(&self, plain_text: &str, key: &[u8]) -> Result<String, CryptoError> {
        if key.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plain_text.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut result = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(result))
    }
}
