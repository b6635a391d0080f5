//! Credential cipher.
//!
//! Encrypts one secret per owner identifier with a key minted for that
//! encryption. Compromise of one key exposes exactly one secret.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{KeyVault, VaultError, aead};

/// Opaque encrypted secret.
///
/// Carries no owner id; callers store it next to the id used to seal it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    /// Wraps an encoded ciphertext read back from storage.
    #[must_use]
    pub fn new(encoded: String) -> Self {
        Self(encoded)
    }

    /// Encoded ciphertext.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedSecret({} bytes)", self.0.len())
    }
}

impl fmt::Display for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encrypts and decrypts secrets with per-owner keys from a [`KeyVault`].
#[derive(Debug, Clone)]
pub struct CredentialCipher {
    vault: KeyVault,
}

impl CredentialCipher {
    /// Creates a cipher backed by the given vault.
    #[must_use]
    pub fn new(vault: KeyVault) -> Self {
        Self { vault }
    }

    /// Returns the underlying vault.
    #[must_use]
    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Encrypts `plaintext` under a freshly minted key.
    ///
    /// Without an owner id a new UUID is generated. With an existing owner
    /// id the previous key is replaced, so earlier ciphertexts for that owner
    /// stop decrypting.
    pub fn encrypt(
        &self,
        plaintext: &str,
        owner_id: Option<&str>,
    ) -> Result<(SealedSecret, String), VaultError> {
        let record = match owner_id {
            Some(id) => self.vault.rotate_key(id)?,
            None => self.vault.generate_key(&Uuid::new_v4().to_string())?,
        };

        let sealed = aead::seal(&record.key, plaintext.as_bytes())?;
        debug!("Encrypted secret for owner {}", record.owner_id);
        Ok((SealedSecret(sealed), record.owner_id.clone()))
    }

    /// Decrypts a secret sealed for `owner_id`.
    pub fn decrypt(&self, sealed: &SealedSecret, owner_id: &str) -> Result<String, VaultError> {
        let key = self.vault.get_key(owner_id)?;
        let plaintext = aead::open(&key, sealed.as_str())?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Decode("invalid UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::vault::{KEYS_COLLECTION, VaultConfig};
    use std::sync::Arc;

    fn cipher() -> (Arc<MemoryStore>, CredentialCipher) {
        let store = Arc::new(MemoryStore::new());
        let vault = KeyVault::new(store.clone(), VaultConfig::default());
        (store, CredentialCipher::new(vault))
    }

    #[test]
    fn test_generated_owner_id_is_uuid() {
        let (_, cipher) = cipher();
        let (_, owner) = cipher.encrypt("pw", None).unwrap();
        assert!(Uuid::parse_str(&owner).is_ok());
    }

    #[test]
    fn test_empty_owner_id_is_an_error() {
        let (store, cipher) = cipher();
        assert!(matches!(
            cipher.encrypt("pw", Some("")),
            Err(VaultError::InvalidOwner(_))
        ));
        assert_eq!(store.count(KEYS_COLLECTION), 0);
    }

    #[test]
    fn test_supplied_owner_id_is_kept() {
        let (_, cipher) = cipher();
        let (sealed, owner) = cipher.encrypt("pw", Some("device-7")).unwrap();
        assert_eq!(owner, "device-7");
        assert_eq!(cipher.decrypt(&sealed, "device-7").unwrap(), "pw");
    }

    #[test]
    fn test_reencrypt_replaces_key() {
        let (store, cipher) = cipher();
        let (first, _) = cipher.encrypt("old", Some("dev")).unwrap();
        let (second, _) = cipher.encrypt("new", Some("dev")).unwrap();

        assert_eq!(store.count(KEYS_COLLECTION), 1);
        assert_eq!(cipher.decrypt(&second, "dev").unwrap(), "new");
        assert!(matches!(cipher.decrypt(&first, "dev"), Err(VaultError::Decode(_))));
    }

    #[test]
    fn test_sealed_secret_debug_hides_content() {
        let sealed = SealedSecret::new("abcdef".to_string());
        assert_eq!(format!("{sealed:?}"), "SealedSecret(6 bytes)");
    }
}
