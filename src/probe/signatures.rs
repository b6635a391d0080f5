//! Vendor signature table.
//!
//! Vendors are recognized by literal, case-sensitive markers in the output of
//! a probe command. The table is ordered and the first matching signature
//! wins, so adding a vendor is a data change.
//!
//! Extra signatures can be loaded from TOML:
//!
//! ```toml
//! [[signature]]
//! family = "arista_eos"
//! match_any = ["Arista"]
//! probe_command = "show version"
//! detail_command = "show version"
//! model_pattern = 'Arista (\S+)'
//! version_pattern = 'Software image version:\s*(\S+)'
//! ```

use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::DeviceFamily;

/// Probe command shared by the builtin signatures.
pub const DEFAULT_PROBE_COMMAND: &str = "show version";

/// Placeholder for a field whose pattern did not match.
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Maximum signature file size (1MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Errors building or loading signatures.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature: {0}")]
    Invalid(String),
}

/// One vendor recognition rule.
#[derive(Debug, Clone)]
pub struct VendorSignature {
    /// Family assigned on match.
    pub family: DeviceFamily,
    /// Literal markers; any one present selects this signature.
    pub match_any: Vec<String>,
    /// Command whose output is scanned for markers.
    pub probe_command: String,
    /// Command whose output holds model and version.
    pub detail_command: String,
    model_pattern: Regex,
    version_pattern: Regex,
}

impl VendorSignature {
    /// Builds a signature, compiling both patterns.
    pub fn new(
        family: DeviceFamily,
        match_any: &[&str],
        probe_command: &str,
        detail_command: &str,
        model_pattern: &str,
        version_pattern: &str,
    ) -> Result<Self, SignatureError> {
        let def = SignatureDef {
            family: family.name().to_string(),
            match_any: match_any.iter().map(|m| (*m).to_string()).collect(),
            probe_command: probe_command.to_string(),
            detail_command: detail_command.to_string(),
            model_pattern: model_pattern.to_string(),
            version_pattern: version_pattern.to_string(),
        };
        Self::from_def(def)
    }

    fn from_def(def: SignatureDef) -> Result<Self, SignatureError> {
        if def.match_any.iter().all(|m| m.is_empty()) {
            return Err(SignatureError::Invalid(format!(
                "{} has no match markers",
                def.family
            )));
        }
        if def.probe_command.trim().is_empty() || def.detail_command.trim().is_empty() {
            return Err(SignatureError::Invalid(format!(
                "{} needs probe and detail commands",
                def.family
            )));
        }

        let family = DeviceFamily::from_name(&def.family);
        if family == DeviceFamily::Unknown {
            return Err(SignatureError::Invalid(
                "family must not be 'unknown'".to_string(),
            ));
        }

        Ok(Self {
            family,
            match_any: def.match_any.into_iter().filter(|m| !m.is_empty()).collect(),
            probe_command: def.probe_command,
            detail_command: def.detail_command,
            model_pattern: compile(&def.model_pattern)?,
            version_pattern: compile(&def.version_pattern)?,
        })
    }

    /// Returns true if any marker occurs in `text`.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.match_any.iter().any(|marker| text.contains(marker.as_str()))
    }

    /// Model from detail output, or `"Unknown"`.
    #[must_use]
    pub fn extract_model(&self, detail: &str) -> String {
        capture(&self.model_pattern, detail)
    }

    /// Version from detail output, or `"Unknown"`.
    #[must_use]
    pub fn extract_version(&self, detail: &str) -> String {
        capture(&self.version_pattern, detail)
    }
}

fn compile(pattern: &str) -> Result<Regex, SignatureError> {
    let regex = Regex::new(pattern).map_err(|source| SignatureError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;
    if regex.captures_len() < 2 {
        return Err(SignatureError::Invalid(format!(
            "pattern '{pattern}' needs a capture group"
        )));
    }
    Ok(regex)
}

/// First capture group, trimmed; `"Unknown"` on no match or empty capture.
fn capture(pattern: &Regex, text: &str) -> String {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_FIELD)
        .to_string()
}

#[derive(Debug, Deserialize)]
struct SignatureDef {
    family: String,
    match_any: Vec<String>,
    #[serde(default = "default_probe_command")]
    probe_command: String,
    detail_command: String,
    model_pattern: String,
    version_pattern: String,
}

fn default_probe_command() -> String {
    DEFAULT_PROBE_COMMAND.to_string()
}

#[derive(Debug, Deserialize)]
struct SignatureFile {
    #[serde(default)]
    signature: Vec<SignatureDef>,
}

/// Builtin entry: family, markers, detail command, model and version patterns.
type BuiltinDef = (
    DeviceFamily,
    &'static [&'static str],
    &'static str,
    &'static str,
    &'static str,
);

/// Compiles builtin entries, logging and skipping any that fail validation.
fn compile_builtins(defs: impl IntoIterator<Item = BuiltinDef>) -> Vec<VendorSignature> {
    defs.into_iter()
        .filter_map(|(family, markers, detail, model, version)| {
            let name = family.to_string();
            VendorSignature::new(
                family,
                markers,
                DEFAULT_PROBE_COMMAND,
                detail,
                model,
                version,
            )
            .inspect_err(|e| warn!("Dropping builtin signature {}: {}", name, e))
            .ok()
        })
        .collect()
}

/// Ordered signature list; first match wins.
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    signatures: Vec<VendorSignature>,
}

impl SignatureTable {
    /// Creates a table from signatures in priority order.
    #[must_use]
    pub fn new(signatures: Vec<VendorSignature>) -> Self {
        Self { signatures }
    }

    /// The builtin vendor table.
    #[must_use]
    pub fn builtin() -> Self {
        let defs: [BuiltinDef; 5] = [
            (
                DeviceFamily::PaloAlto,
                &["PAN-OS", "Palo Alto"],
                "show system info",
                r"model:\s*(.+)",
                r"sw-version:\s*(.+)",
            ),
            (
                DeviceFamily::CheckPoint,
                &["Check Point", "Gaia"],
                "show version all",
                r"Product Name:\s*(.+)",
                r"OS Major:\s*(.+)",
            ),
            (
                DeviceFamily::Fortinet,
                &["FortiGate", "Fortinet"],
                "get system status",
                r"Hostname:\s*(.+)",
                r"Version:\s*(.+)",
            ),
            (
                DeviceFamily::CiscoIos,
                &["Cisco IOS"],
                DEFAULT_PROBE_COMMAND,
                r"[Cc]isco (\S+) \(.*\) processor",
                r"Version ([^\s,]+)",
            ),
            (
                DeviceFamily::Juniper,
                &["JUNOS", "Junos:"],
                DEFAULT_PROBE_COMMAND,
                r"Model:\s*(\S+)",
                r"Junos:\s*(\S+)",
            ),
        ];

        Self {
            signatures: compile_builtins(defs),
        }
    }

    /// Parses signatures from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, SignatureError> {
        let file: SignatureFile = toml::from_str(content)?;
        let signatures = file
            .signature
            .into_iter()
            .map(VendorSignature::from_def)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { signatures })
    }

    /// Loads signatures from a TOML file.
    pub fn load_file(path: &Path) -> Result<Self, SignatureError> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(SignatureError::Invalid(format!(
                "signature file exceeds {MAX_FILE_SIZE} bytes"
            )));
        }
        let table = Self::from_toml_str(&fs::read_to_string(path)?)?;
        debug!("Loaded {} signatures from {:?}", table.len(), path);
        Ok(table)
    }

    /// Builtins preceded by `custom`, so custom signatures win ties.
    #[must_use]
    pub fn with_overrides(custom: Self) -> Self {
        let mut signatures = custom.signatures;
        signatures.extend(Self::builtin().signatures);
        Self { signatures }
    }

    /// Signatures in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &VendorSignature> {
        self.signatures.iter()
    }

    /// Number of signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// First signature matching `text` among those probed with `probe_command`.
    #[must_use]
    pub fn find(&self, probe_command: &str, text: &str) -> Option<&VendorSignature> {
        self.signatures
            .iter()
            .filter(|s| s.probe_command == probe_command)
            .find(|s| s.matches(text))
    }
}
