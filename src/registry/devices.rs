//! Device registry.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{RegistryError, from_document, to_document};
use crate::exec::{CommandExecutor, ExecutionReport};
use crate::probe::DeviceProber;
use crate::store::{DocumentStore, Filter};
use crate::vault::{CredentialCipher, SealedSecret};

/// Collection holding device records.
pub const DEVICES_COLLECTION: &str = "devices";

/// Input for [`DeviceRegistry::add_device`].
#[derive(Clone, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub ip: String,
    /// Operator-supplied role, e.g. `firewall`.
    pub device_type: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for NewDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewDevice")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("device_type", &self.device_type)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub name: String,
    pub ip: String,
    pub device_type: String,
    pub username: String,
    /// Password sealed under `device_id`.
    pub encrypted_password: SealedSecret,
    /// Family found by the prober, or `unknown`.
    pub identified_type: String,
    pub model: String,
    pub version: String,
}

/// Devices sharing a /24.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    /// e.g. `10.0.0.0/24`.
    pub cidr: String,
    /// Device names, sorted.
    pub devices: Vec<String>,
}

/// Registers, looks up and drives devices.
pub struct DeviceRegistry {
    store: Arc<dyn DocumentStore>,
    cipher: CredentialCipher,
    prober: DeviceProber,
    executor: CommandExecutor,
}

impl DeviceRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cipher: CredentialCipher,
        prober: DeviceProber,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            store,
            cipher,
            prober,
            executor,
        }
    }

    /// Registers a device.
    ///
    /// Identification is best-effort; an unreachable or unrecognized device
    /// is stored as `unknown`.
    pub fn add_device(&self, new: NewDevice) -> Result<DeviceRecord, RegistryError> {
        if new.name.trim().is_empty() {
            return Err(RegistryError::InvalidName(new.name));
        }
        let ip: Ipv4Addr = new
            .ip
            .trim()
            .parse()
            .map_err(|_| RegistryError::InvalidAddress(new.ip.clone()))?;
        if self.find(&new.name)?.is_some() {
            return Err(RegistryError::DuplicateName(new.name));
        }

        let device_id = Uuid::new_v4().to_string();
        let (encrypted_password, _) = self.cipher.encrypt(&new.password, Some(&device_id))?;

        let profile =
            self.prober
                .identify_or_unknown(&ip.to_string(), &new.username, &new.password);

        let record = DeviceRecord {
            device_id,
            name: new.name.clone(),
            ip: ip.to_string(),
            device_type: new.device_type.clone(),
            username: new.username.clone(),
            encrypted_password,
            identified_type: profile.family.to_string(),
            model: profile.model,
            version: profile.version,
        };

        if let Err(e) = self
            .store
            .insert_one(DEVICES_COLLECTION, to_document(&record)?)
        {
            warn!("Insert of device {} failed, dropping its key", record.name);
            self.cipher.vault().delete_key(&record.device_id)?;
            return Err(e.into());
        }

        info!(
            "Registered device {} ({}) as {}",
            record.name, record.ip, record.identified_type
        );
        Ok(record)
    }

    /// All devices in registration order.
    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
        self.store
            .find_many(DEVICES_COLLECTION, &Filter::all())?
            .into_iter()
            .map(|doc| from_document(doc).map_err(RegistryError::from))
            .collect()
    }

    /// Looks up a device by name.
    pub fn get_device(&self, name: &str) -> Result<DeviceRecord, RegistryError> {
        self.find(name)?
            .ok_or_else(|| RegistryError::DeviceNotFound(name.to_string()))
    }

    /// Removes a device and its key. Returns false if no such device.
    pub fn remove_device(&self, device_id: &str) -> Result<bool, RegistryError> {
        let removed = self
            .store
            .delete_one(DEVICES_COLLECTION, &Filter::eq("device_id", device_id))?;
        if removed {
            self.cipher.vault().delete_key(device_id)?;
            info!("Removed device {}", device_id);
        }
        Ok(removed)
    }

    /// Runs `commands` on the named device with its stored credentials.
    pub fn execute<S: AsRef<str>>(
        &self,
        name: &str,
        commands: &[S],
    ) -> Result<ExecutionReport, RegistryError> {
        let device = self.get_device(name)?;
        let password = self
            .cipher
            .decrypt(&device.encrypted_password, &device.device_id)?;
        Ok(self
            .executor
            .execute_all(&device.ip, &device.username, &password, commands)?)
    }

    /// Groups device addresses by /24, sorted by network address.
    pub fn networks(&self) -> Result<Vec<Network>, RegistryError> {
        let mut groups: BTreeMap<Ipv4Addr, Vec<String>> = BTreeMap::new();
        for device in self.list_devices()? {
            let Ok(ip) = device.ip.parse::<Ipv4Addr>() else {
                warn!("Skipping device {} with address {}", device.name, device.ip);
                continue;
            };
            let network = Ipv4Addr::from(u32::from(ip) & 0xFFFF_FF00);
            groups.entry(network).or_default().push(device.name);
        }

        Ok(groups
            .into_iter()
            .map(|(network, mut devices)| {
                devices.sort();
                Network {
                    cidr: format!("{network}/24"),
                    devices,
                }
            })
            .collect())
    }

    fn find(&self, name: &str) -> Result<Option<DeviceRecord>, RegistryError> {
        self.store
            .find_one(DEVICES_COLLECTION, &Filter::eq("name", name))?
            .map(from_document)
            .transpose()
            .map_err(RegistryError::from)
    }
}
