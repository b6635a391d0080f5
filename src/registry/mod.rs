//! Device and credential registry.
//!
//! Ties the vault, prober and executor to the document store: devices are
//! registered with their password sealed under the device id, identified on
//! a best-effort basis, and addressed by name afterwards.

pub mod credentials;
pub mod devices;

pub use credentials::{CREDENTIALS_COLLECTION, CredentialBook, CredentialRecord};
pub use devices::{DEVICES_COLLECTION, DeviceRecord, DeviceRegistry, Network, NewDevice};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::ssh::SessionError;
use crate::store::{Document, StoreError};
use crate::vault::VaultError;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Name already registered: {0}")]
    DuplicateName(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid IPv4 address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::Json(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        )))),
    }
}

fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
