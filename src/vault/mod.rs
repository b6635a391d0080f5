//! Key vault.
//!
//! Holds one symmetric key per owner identifier in the `credentials_keys`
//! collection of a [`DocumentStore`]. Records are written once and never
//! updated in place; rotation deletes the old record and inserts a new one.
//!
//! When a master key is configured, stored keys are themselves sealed with
//! AES-256-GCM under it, so the store never holds usable key material.

pub mod aead;
pub mod cipher;

pub use cipher::{CredentialCipher, SealedSecret};

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::store::{Document, DocumentStore, Filter, StoreError};

/// Collection holding key records.
pub const KEYS_COLLECTION: &str = "credentials_keys";

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Errors from key and secret operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No key record exists for the owner.
    #[error("Key not found for owner: {0}")]
    NotFound(String),

    /// Owner identifier is empty.
    #[error("Invalid owner id: {0:?}")]
    InvalidOwner(String),

    /// Ciphertext failed to validate under the presented key.
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// A stored key record is malformed.
    #[error("Corrupt key record: {0}")]
    CorruptRecord(String),

    /// Underlying store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// 256-bit key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Generates a key from the OS random number generator.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Builds a key from a 32-byte slice.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_LEN] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parses a standard or URL-safe base64 key.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        let encoded = encoded.trim();
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|e| VaultError::CorruptRecord(format!("invalid key encoding: {e}")))?;
        Self::from_slice(&bytes).ok_or_else(|| {
            VaultError::CorruptRecord(format!("key must be {KEY_LEN} bytes, got {}", bytes.len()))
        })
    }

    /// Encodes the key as URL-safe base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretKey {}

/// A key bound to its owner identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Opaque owner identifier.
    pub owner_id: String,
    /// Key material.
    pub key: SecretKey,
}

/// Vault settings, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct VaultConfig {
    /// Optional key that wraps every stored key.
    pub master_key: Option<SecretKey>,
}

/// Per-owner key storage on top of a document store.
#[derive(Clone)]
pub struct KeyVault {
    store: Arc<dyn DocumentStore>,
    config: VaultConfig,
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault")
            .field("wrapped", &self.config.master_key.is_some())
            .finish_non_exhaustive()
    }
}

impl KeyVault {
    /// Creates a vault over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, config: VaultConfig) -> Self {
        Self { store, config }
    }

    /// Generates a fresh key for `owner_id` and persists it with one insert.
    ///
    /// Callers must not reuse an owner id that still has a live record; use
    /// [`KeyVault::rotate_key`] for that.
    pub fn generate_key(&self, owner_id: &str) -> Result<KeyRecord, VaultError> {
        if owner_id.trim().is_empty() {
            return Err(VaultError::InvalidOwner(owner_id.to_string()));
        }

        let key = SecretKey::generate();
        let doc = self.encode_record(owner_id, &key)?;
        self.store.insert_one(KEYS_COLLECTION, doc)?;

        debug!("Generated key for owner {}", owner_id);
        Ok(KeyRecord {
            owner_id: owner_id.to_string(),
            key,
        })
    }

    /// Looks up the key for `owner_id`.
    pub fn get_key(&self, owner_id: &str) -> Result<SecretKey, VaultError> {
        let doc = self
            .store
            .find_one(KEYS_COLLECTION, &Filter::eq("owner_id", owner_id))?
            .ok_or_else(|| VaultError::NotFound(owner_id.to_string()))?;
        self.decode_record(&doc)
    }

    /// Deletes the key for `owner_id`. Returns true if a record was removed.
    pub fn delete_key(&self, owner_id: &str) -> Result<bool, VaultError> {
        let removed = self
            .store
            .delete_one(KEYS_COLLECTION, &Filter::eq("owner_id", owner_id))?;
        if removed {
            debug!("Deleted key for owner {}", owner_id);
        }
        Ok(removed)
    }

    /// Replaces any key held by `owner_id` with a fresh one.
    pub fn rotate_key(&self, owner_id: &str) -> Result<KeyRecord, VaultError> {
        while self.delete_key(owner_id)? {}
        self.generate_key(owner_id)
    }

    fn encode_record(&self, owner_id: &str, key: &SecretKey) -> Result<Document, VaultError> {
        let (stored, wrapped) = match self.config.master_key {
            Some(ref master) => (aead::seal(master, key.as_bytes())?, true),
            None => (key.to_base64(), false),
        };

        let mut doc = Document::new();
        doc.insert("owner_id".into(), json!(owner_id));
        doc.insert("key".into(), json!(stored));
        doc.insert("wrapped".into(), json!(wrapped));
        Ok(doc)
    }

    fn decode_record(&self, doc: &Document) -> Result<SecretKey, VaultError> {
        let stored = doc
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| VaultError::CorruptRecord("missing key field".to_string()))?;
        let wrapped = doc.get("wrapped").and_then(Value::as_bool).unwrap_or(false);

        match (wrapped, self.config.master_key.as_ref()) {
            (false, _) => SecretKey::from_base64(stored),
            (true, Some(master)) => {
                let mut raw = aead::open(master, stored)?;
                let key = SecretKey::from_slice(&raw);
                raw.zeroize();
                key.ok_or_else(|| VaultError::CorruptRecord("wrapped key has wrong length".into()))
            }
            (true, None) => Err(VaultError::CorruptRecord(
                "key is wrapped but no master key is configured".to_string(),
            )),
        }
    }
}
