//! Integration tests for the device and credential registry on a file store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use netfleet::exec::CommandExecutor;
use netfleet::probe::{DeviceProber, SignatureTable};
use netfleet::registry::{CredentialBook, DeviceRegistry, NewDevice, RegistryError};
use netfleet::ssh::{DeviceScript, SshSettings, TranscriptConnector};
use netfleet::store::{DocumentStore, FileStore, Filter};
use netfleet::vault::{CredentialCipher, KEYS_COLLECTION, KeyVault, VaultConfig};

fn open(path: &Path, connector: TranscriptConnector) -> (Arc<FileStore>, DeviceRegistry) {
    let store = Arc::new(FileStore::new(path.to_path_buf()));
    let connector = Arc::new(connector);
    let settings = SshSettings::default();
    let cipher = CredentialCipher::new(KeyVault::new(store.clone(), VaultConfig::default()));
    let registry = DeviceRegistry::new(
        store.clone(),
        cipher,
        DeviceProber::new(connector.clone(), settings, SignatureTable::builtin()),
        CommandExecutor::new(connector, settings),
    );
    (store, registry)
}

fn fortigate() -> TranscriptConnector {
    TranscriptConnector::new().device(
        DeviceScript::new("192.168.1.1")
            .password("fortipass")
            .respond("show version", "FortiGate-60E v6.4.5")
            .respond(
                "get system status",
                "Version: FortiGate-60E v6.4.5,build1828\nHostname: branch-fw\n",
            )
            .respond("get system interface", "name  ip  status\nwan1  192.168.1.1  up"),
    )
}

fn new_device() -> NewDevice {
    NewDevice {
        name: "branch".to_string(),
        ip: "192.168.1.1".to_string(),
        device_type: "firewall".to_string(),
        username: "admin".to_string(),
        password: "fortipass".to_string(),
    }
}

#[test]
fn test_register_identify_and_execute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let device_id = {
        let (_, registry) = open(&path, fortigate());
        let record = registry.add_device(new_device()).unwrap();
        assert_eq!(record.identified_type, "fortinet");
        assert_eq!(record.model, "branch-fw");
        assert_eq!(record.version, "FortiGate-60E v6.4.5,build1828");
        record.device_id
    };

    let (_, registry) = open(&path, fortigate());
    let device = registry.get_device("branch").unwrap();
    assert_eq!(device.device_id, device_id);

    let report = registry.execute("branch", &["get system interface"]).unwrap();
    let rows = report.results[0].structured.parsed.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some("up"));
}

#[test]
fn test_password_never_stored_in_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let (_, registry) = open(&path, fortigate());
    registry.add_device(new_device()).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("fortipass"));
}

#[test]
fn test_remove_device_deletes_key_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let (store, registry) = open(&path, fortigate());
    let record = registry.add_device(new_device()).unwrap();

    assert!(registry.remove_device(&record.device_id).unwrap());
    assert!(
        store
            .find_one(KEYS_COLLECTION, &Filter::eq("owner_id", record.device_id.as_str()))
            .unwrap()
            .is_none()
    );
    assert!(matches!(
        registry.get_device("branch"),
        Err(RegistryError::DeviceNotFound(_))
    ));
}

#[test]
fn test_credentials_persist() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let store = Arc::new(FileStore::new(path.clone()));
        let cipher = CredentialCipher::new(KeyVault::new(store.clone(), VaultConfig::default()));
        let book = CredentialBook::new(store, cipher);
        book.add("netops", "pa55").unwrap();
        book.add("audit", "r3ad").unwrap();
    }

    let store = Arc::new(FileStore::new(path));
    let cipher = CredentialCipher::new(KeyVault::new(store.clone(), VaultConfig::default()));
    let book = CredentialBook::new(store, cipher);
    assert_eq!(book.list().unwrap(), vec!["netops", "audit"]);
    assert_eq!(book.get("audit").unwrap(), "r3ad");
}
