//! Named credentials, sealed at rest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{RegistryError, from_document, to_document};
use crate::store::{DocumentStore, Filter};
use crate::vault::{CredentialCipher, SealedSecret};

/// Collection holding credential records.
pub const CREDENTIALS_COLLECTION: &str = "credentials";

/// A stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Owner id the password was sealed under.
    pub owner_id: String,
    pub username: String,
    pub encrypted_password: SealedSecret,
}

/// Username/password pairs stored encrypted, one key per credential.
pub struct CredentialBook {
    store: Arc<dyn DocumentStore>,
    cipher: CredentialCipher,
}

impl CredentialBook {
    /// Creates a credential book.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, cipher: CredentialCipher) -> Self {
        Self { store, cipher }
    }

    /// Stores a credential and returns its owner id.
    pub fn add(&self, username: &str, password: &str) -> Result<String, RegistryError> {
        if username.trim().is_empty() {
            return Err(RegistryError::InvalidName(username.to_string()));
        }

        if self.find(username)?.is_some() {
            return Err(RegistryError::DuplicateName(username.to_string()));
        }

        let (encrypted_password, owner_id) = self.cipher.encrypt(password, None)?;
        let record = CredentialRecord {
            owner_id: owner_id.clone(),
            username: username.to_string(),
            encrypted_password,
        };
        if let Err(e) = self
            .store
            .insert_one(CREDENTIALS_COLLECTION, to_document(&record)?)
        {
            self.cipher.vault().delete_key(&owner_id)?;
            return Err(e.into());
        }

        info!("Stored credential for {}", username);
        Ok(owner_id)
    }

    /// Decrypts the password stored for `username`.
    pub fn get(&self, username: &str) -> Result<String, RegistryError> {
        let record = self
            .find(username)?
            .ok_or_else(|| RegistryError::CredentialNotFound(username.to_string()))?;
        Ok(self
            .cipher
            .decrypt(&record.encrypted_password, &record.owner_id)?)
    }

    /// Stored usernames in insertion order.
    pub fn list(&self) -> Result<Vec<String>, RegistryError> {
        self.store
            .find_many(CREDENTIALS_COLLECTION, &Filter::all())?
            .into_iter()
            .map(|doc| {
                from_document::<CredentialRecord>(doc)
                    .map(|r| r.username)
                    .map_err(RegistryError::from)
            })
            .collect()
    }

    /// Deletes the credential and its key. Returns false if absent.
    pub fn delete(&self, username: &str) -> Result<bool, RegistryError> {
        let Some(record) = self.find(username)? else {
            return Ok(false);
        };
        self.store.delete_one(
            CREDENTIALS_COLLECTION,
            &Filter::eq("owner_id", record.owner_id.as_str()),
        )?;
        self.cipher.vault().delete_key(&record.owner_id)?;
        info!("Deleted credential for {}", username);
        Ok(true)
    }

    fn find(&self, username: &str) -> Result<Option<CredentialRecord>, RegistryError> {
        self.store
            .find_one(CREDENTIALS_COLLECTION, &Filter::eq("username", username))?
            .map(from_document)
            .transpose()
            .map_err(RegistryError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vault::{KEYS_COLLECTION, KeyVault, VaultConfig};

    fn book() -> (Arc<MemoryStore>, CredentialBook) {
        let store = Arc::new(MemoryStore::new());
        let cipher = CredentialCipher::new(KeyVault::new(store.clone(), VaultConfig::default()));
        (store.clone(), CredentialBook::new(store, cipher))
    }

    #[test]
    fn test_blank_username_is_rejected() {
        let (store, book) = book();
        for name in ["", "  "] {
            assert!(matches!(book.add(name, "pw"), Err(RegistryError::InvalidName(_))));
        }
        assert_eq!(store.count(KEYS_COLLECTION), 0);
    }

    #[test]
    fn test_add_get_roundtrip() {
        let (_, book) = book();
        book.add("ops", "s3cret").unwrap();
        assert_eq!(book.get("ops").unwrap(), "s3cret");
        assert_eq!(book.list().unwrap(), vec!["ops"]);
    }

    #[test]
    fn test_password_not_stored_in_clear() {
        let (store, book) = book();
        book.add("ops", "s3cret").unwrap();
        let doc = store
            .find_one(CREDENTIALS_COLLECTION, &Filter::eq("username", "ops"))
            .unwrap()
            .unwrap();
        assert!(!serde_json::to_string(&doc).unwrap().contains("s3cret"));
    }

    #[test]
    fn test_delete_removes_key() {
        let (store, book) = book();
        book.add("ops", "pw").unwrap();
        assert!(book.delete("ops").unwrap());
        assert_eq!(store.count(KEYS_COLLECTION), 0);
        assert_eq!(store.count(CREDENTIALS_COLLECTION), 0);
        assert!(!book.delete("ops").unwrap());
        assert!(matches!(book.get("ops"), Err(RegistryError::CredentialNotFound(_))));
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let (_, book) = book();
        book.add("ops", "a").unwrap();
        assert!(matches!(book.add("ops", "b"), Err(RegistryError::DuplicateName(_))));
    }
}
