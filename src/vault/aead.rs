//! AES-256-GCM sealing used for secrets and wrapped keys.
//!
//! Sealed layout: `nonce (12) || ciphertext || tag (16)`, encoded as
//! URL-safe base64 without padding.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

use super::{SecretKey, VaultError};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<String, VaultError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encrypt(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::Encrypt(e.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Decrypts a value produced by [`seal`].
///
/// Fails with [`VaultError::Decode`] on bad encoding, truncation, or a tag
/// that does not verify under `key`.
pub fn open(key: &SecretKey, sealed: &str) -> Result<Vec<u8>, VaultError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(sealed.trim())
        .map_err(|e| VaultError::Decode(format!("invalid encoding: {e}")))?;

    if bytes.len() < NONCE_LEN + TAG_LEN {
        return Err(VaultError::Decode("ciphertext too short".to_string()));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Decode(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| VaultError::Decode("authentication failed".to_string()))
}
