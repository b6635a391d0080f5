//! Device identification over SSH.
//!
//! [`DeviceProber::identify`] opens one session, runs the probe command of
//! each signature (each distinct command at most once), picks the first
//! signature whose markers appear in the output, then runs its detail
//! command to pull model and version.

pub mod signatures;

pub use signatures::{
    DEFAULT_PROBE_COMMAND, SignatureError, SignatureTable, UNKNOWN_FIELD, VendorSignature,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ssh::{SessionError, SessionGuard, SshConnector, SshSettings, open_session};

/// Model and version placeholder used when identification is skipped.
pub const UNIDENTIFIED: &str = "unknown";

/// Errors from identification. Callers registering a device treat all of
/// them as non-fatal.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connect or command failure.
    #[error("Probe session failed: {0}")]
    Session(#[from] SessionError),

    /// Every probe command returned empty output.
    #[error("No output from '{0}'")]
    NoOutput(String),

    /// Output matched no signature.
    #[error("Unknown device type")]
    UnknownDevice,
}

/// Device family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceFamily {
    #[default]
    Unknown,
    PaloAlto,
    CheckPoint,
    Fortinet,
    CiscoIos,
    Juniper,
    /// Family named by a user-defined signature.
    Custom(String),
}

impl DeviceFamily {
    /// Stable snake_case name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown => "unknown",
            Self::PaloAlto => "palo_alto",
            Self::CheckPoint => "check_point",
            Self::Fortinet => "fortinet",
            Self::CiscoIos => "cisco_ios",
            Self::Juniper => "juniper",
            Self::Custom(name) => name,
        }
    }

    /// Parses a name; anything unrecognized becomes [`DeviceFamily::Custom`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "" | "unknown" => Self::Unknown,
            "palo_alto" => Self::PaloAlto,
            "check_point" => Self::CheckPoint,
            "fortinet" => Self::Fortinet,
            "cisco_ios" => Self::CiscoIos,
            "juniper" => Self::Juniper,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for DeviceFamily {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<DeviceFamily> for String {
    fn from(family: DeviceFamily) -> Self {
        family.name().to_string()
    }
}

/// Result of identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub host: String,
    pub family: DeviceFamily,
    pub model: String,
    pub version: String,
}

impl DeviceProfile {
    /// Profile for a device that could not be identified.
    #[must_use]
    pub fn unidentified(host: &str) -> Self {
        Self {
            host: host.to_string(),
            family: DeviceFamily::Unknown,
            model: UNIDENTIFIED.to_string(),
            version: UNIDENTIFIED.to_string(),
        }
    }

    /// Returns true if a signature matched.
    #[must_use]
    pub fn is_identified(&self) -> bool {
        self.family != DeviceFamily::Unknown
    }
}

/// Classifies devices by probing them over SSH.
#[derive(Clone)]
pub struct DeviceProber {
    connector: Arc<dyn SshConnector>,
    settings: SshSettings,
    signatures: Arc<SignatureTable>,
}

impl fmt::Debug for DeviceProber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProber")
            .field("settings", &self.settings)
            .field("signatures", &self.signatures.len())
            .finish_non_exhaustive()
    }
}

impl DeviceProber {
    /// Creates a prober.
    #[must_use]
    pub fn new(
        connector: Arc<dyn SshConnector>,
        settings: SshSettings,
        signatures: SignatureTable,
    ) -> Self {
        Self {
            connector,
            settings,
            signatures: Arc::new(signatures),
        }
    }

    /// Identifies the device at `host`.
    pub fn identify(
        &self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<DeviceProfile, ProbeError> {
        let target = self.settings.target(host, username, password);
        let mut session = open_session(self.connector.as_ref(), &target, &self.settings)?;
        let result = self.classify(&mut session, host);
        session.close();
        result
    }

    /// Like [`DeviceProber::identify`] but downgrades every failure to an
    /// unidentified profile.
    #[must_use]
    pub fn identify_or_unknown(&self, host: &str, username: &str, password: &str) -> DeviceProfile {
        match self.identify(host, username, password) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("Could not identify {}: {}", host, e);
                DeviceProfile::unidentified(host)
            }
        }
    }

    fn classify(&self, session: &mut SessionGuard, host: &str) -> Result<DeviceProfile, ProbeError> {
        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut saw_output = false;

        for signature in self.signatures.iter() {
            let text = self.run_cached(session, &mut outputs, &signature.probe_command)?;
            saw_output |= !text.is_empty();
            if !signature.matches(&text) {
                continue;
            }

            debug!("{} matched signature {}", host, signature.family);
            let detail = self.run_cached(session, &mut outputs, &signature.detail_command)?;
            let profile = DeviceProfile {
                host: host.to_string(),
                family: signature.family.clone(),
                model: signature.extract_model(&detail),
                version: signature.extract_version(&detail),
            };
            info!(
                "Identified {} as {} {} {}",
                host, profile.family, profile.model, profile.version
            );
            return Ok(profile);
        }

        if saw_output {
            Err(ProbeError::UnknownDevice)
        } else {
            let command = self
                .signatures
                .iter()
                .next()
                .map_or(DEFAULT_PROBE_COMMAND, |s| s.probe_command.as_str());
            Err(ProbeError::NoOutput(command.to_string()))
        }
    }

    fn run_cached(
        &self,
        session: &mut SessionGuard,
        outputs: &mut HashMap<String, String>,
        command: &str,
    ) -> Result<String, ProbeError> {
        if let Some(text) = outputs.get(command) {
            return Ok(text.clone());
        }
        let output = session.exec(command, self.settings.command_timeout)?;
        let text = output.result_text().to_string();
        outputs.insert(command.to_string(), text.clone());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{DeviceScript, TranscriptConnector};

    fn prober(script: DeviceScript) -> (Arc<crate::ssh::TranscriptStats>, DeviceProber) {
        let connector = TranscriptConnector::new().device(script);
        let stats = connector.stats();
        let prober = DeviceProber::new(
            Arc::new(connector),
            SshSettings::default(),
            SignatureTable::builtin(),
        );
        (stats, prober)
    }

    #[test]
    fn test_probe_command_runs_once() {
        let (stats, prober) = prober(
            DeviceScript::new("r1")
                .respond("show version", "JUNOS 21.4R3\nModel: mx204\nJunos: 21.4R3-S1"),
        );
        let profile = prober.identify("r1", "admin", "pw").unwrap();

        assert_eq!(profile.family, DeviceFamily::Juniper);
        assert_eq!(profile.model, "mx204");
        assert_eq!(profile.version, "21.4R3-S1");
        assert_eq!(stats.commands(), vec!["r1: show version"]);
        assert_eq!(stats.closed(), 1);
    }

    #[test]
    fn test_stderr_is_scanned_when_stdout_empty() {
        let (_, prober) = prober(
            DeviceScript::new("fw")
                .respond_stderr("show version", "Fortinet FortiGate")
                .respond("get system status", "Version: FortiGate-60E v6.4.5\nHostname: edge"),
        );
        let profile = prober.identify("fw", "admin", "pw").unwrap();
        assert_eq!(profile.family, DeviceFamily::Fortinet);
        assert_eq!(profile.model, "edge");
        assert_eq!(profile.version, "FortiGate-60E v6.4.5");
    }

    #[test]
    fn test_empty_output_is_no_output() {
        let (_, prober) = prober(DeviceScript::new("r1").respond("show version", "  \n"));
        assert!(matches!(
            prober.identify("r1", "admin", "pw"),
            Err(ProbeError::NoOutput(cmd)) if cmd == "show version"
        ));
    }

    #[test]
    fn test_command_failure_propagates_and_closes() {
        let (stats, prober) = prober(
            DeviceScript::new("r1")
                .respond("show version", "PAN-OS")
                .fail("show system info", crate::ssh::Fault::Disconnect),
        );
        assert!(matches!(
            prober.identify("r1", "admin", "pw"),
            Err(ProbeError::Session(SessionError::Command(_)))
        ));
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.closed(), 1);
    }

    #[test]
    fn test_family_serde_uses_names() {
        assert_eq!(
            serde_json::to_string(&DeviceFamily::CheckPoint).unwrap(),
            "\"check_point\""
        );
        let custom: DeviceFamily = serde_json::from_str("\"arista_eos\"").unwrap();
        assert_eq!(custom, DeviceFamily::Custom("arista_eos".into()));
        assert_eq!(DeviceFamily::from_name("unknown"), DeviceFamily::Unknown);
    }
}
