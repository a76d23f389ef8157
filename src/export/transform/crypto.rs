//! Message body decryption
//!
//! Bodies are stored as base64 of AES-ECB ciphertext with PKCS7 padding under
//! a pre-shared key. The AES variant follows the key length.

use aes::cipher::{BlockDecryptMut, KeyInit, block_padding::Pkcs7};
use aes::{Aes128, Aes192, Aes256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mongodb::bson::Bson;

use crate::error::{ConfigError, Result};

/// Outcome of decrypting one body cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Nothing to decrypt
    Empty,
    Plaintext(String),
    /// Bad base64, bad padding, wrong key or an empty plaintext
    Failed,
}

impl DecryptOutcome {
    /// Render the outcome as a cell, substituting `sentinel` on failure
    pub fn into_cell(self, sentinel: &str) -> String {
        match self {
            DecryptOutcome::Empty => String::new(),
            DecryptOutcome::Plaintext(text) => text,
            DecryptOutcome::Failed => sentinel.to_string(),
        }
    }
}

/// AES-ECB/PKCS7 decryptor holding the pre-shared key
#[derive(Clone)]
pub struct BodyDecryptor {
    key: Vec<u8>,
}

impl std::fmt::Debug for BodyDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyDecryptor")
            .field("key_bits", &(self.key.len() * 8))
            .finish()
    }
}

impl BodyDecryptor {
    /// Build a decryptor from a UTF-8 key of 16, 24 or 32 bytes
    pub fn new(key: &str) -> Result<Self> {
        let key = key.as_bytes().to_vec();
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(ConfigError::Generic(format!(
                "transform.decrypt_key must be 16, 24 or 32 bytes, got {}",
                key.len()
            ))
            .into());
        }
        Ok(Self { key })
    }

    /// Decrypt a base64 ciphertext
    pub fn decrypt(&self, encoded: &str) -> DecryptOutcome {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return DecryptOutcome::Empty;
        }
        let Ok(mut buf) = STANDARD.decode(encoded) else {
            return DecryptOutcome::Failed;
        };
        let Some(len) = self.decrypt_in_place(&mut buf) else {
            return DecryptOutcome::Failed;
        };
        if len == 0 {
            return DecryptOutcome::Failed;
        }
        DecryptOutcome::Plaintext(String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    /// Decrypt a BSON cell; only strings carry ciphertext
    pub fn decrypt_value(&self, value: Option<&Bson>) -> DecryptOutcome {
        match value {
            None | Some(Bson::Null) | Some(Bson::Undefined) => DecryptOutcome::Empty,
            Some(Bson::String(s)) => self.decrypt(s),
            Some(_) => DecryptOutcome::Failed,
        }
    }

    fn decrypt_in_place(&self, buf: &mut [u8]) -> Option<usize> {
        let plain = match self.key.len() {
            16 => ecb::Decryptor::<Aes128>::new_from_slice(&self.key)
                .ok()?
                .decrypt_padded_mut::<Pkcs7>(buf)
                .ok()?,
            24 => ecb::Decryptor::<Aes192>::new_from_slice(&self.key)
                .ok()?
                .decrypt_padded_mut::<Pkcs7>(buf)
                .ok()?,
            32 => ecb::Decryptor::<Aes256>::new_from_slice(&self.key)
                .ok()?
                .decrypt_padded_mut::<Pkcs7>(buf)
                .ok()?,
            _ => return None,
        };
        Some(plain.len())
    }
}
