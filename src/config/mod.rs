//! Configuration for netfleet.
//!
//! Reads `~/.netfleet/config`, a `key = value` file, then applies
//! `NETFLEET_<KEY>` environment overrides. The result is immutable and
//! handed to each component at construction.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::logging::LogConfig;
use crate::ssh::{DEFAULT_PORT, DEFAULT_TIMEOUT_SECS, SshSettings};
use crate::store::FileStore;
use crate::vault::{SecretKey, VaultConfig};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "NETFLEET_";

/// Environment variable holding the optional vault master key.
pub const MASTER_KEY_ENV: &str = "NETFLEET_MASTER_KEY";

/// Default config file content with every setting documented.
const DEFAULT_CONFIG: &str = r#"# netfleet configuration
# ======================
# Lines starting with '#' are comments.
# Every key can be overridden by an environment variable named
# NETFLEET_<KEY>, e.g. NETFLEET_SSH_PORT=2222.

# SSH
# ---
# ssh_port = 22            # Port used when a device has none
# connect_timeout = 10     # Seconds allowed for connect and login
# command_timeout = 10     # Seconds allowed per command

# Storage
# -------
# store_path = ~/.netfleet/store.json
#
# Extra vendor signatures (TOML), checked before the builtin ones:
# signatures_file = ~/.netfleet/signatures.toml
#
# Stored keys can be wrapped with a master key. It is read only from the
# NETFLEET_MASTER_KEY environment variable (base64, 32 bytes).

# Logging
# -------
# Logs are stored in ~/.netfleet/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging
# log_level = info         # trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files
# log_stderr = false       # Echo warnings and errors to stderr
"#;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path the configuration was read from.
    pub config_path: PathBuf,
    /// Default SSH port.
    pub ssh_port: u16,
    /// Connect timeout in seconds.
    pub connect_timeout: u64,
    /// Per-command timeout in seconds.
    pub command_timeout: u64,
    /// JSON document store file.
    pub store_path: PathBuf,
    /// Optional TOML file of extra vendor signatures.
    pub signatures_file: Option<PathBuf>,
    /// Logging configuration.
    pub log_config: LogConfig,
    /// Vault master key, from the environment only.
    pub master_key: Option<SecretKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            ssh_port: DEFAULT_PORT,
            connect_timeout: DEFAULT_TIMEOUT_SECS,
            command_timeout: DEFAULT_TIMEOUT_SECS,
            store_path: FileStore::default_path(),
            signatures_file: None,
            log_config: LogConfig::default(),
            master_key: None,
        }
    }
}

/// Returns `~/.netfleet`.
#[must_use]
pub fn base_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".netfleet")
}

/// Expands a leading `~/` to the home directory.
fn expand_path(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value)),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::invalid(key, value)),
    }
}

impl Config {
    /// Returns the default config file path (~/.netfleet/config).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        base_directory().join("config")
    }

    /// Loads configuration from the default path, creating it if missing.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or a value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_config_path())
    }

    /// Loads configuration from `path`, then applies environment overrides.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or a value is invalid.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::create_default_config(path)?;
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self {
            config_path: path.to_path_buf(),
            ..Self::default()
        };
        config.parse(&content)?;
        config.apply_env(std::env::vars())?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    fn create_default_config(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)
    }

    /// Parses config file content.
    ///
    /// # Errors
    /// Returns error on the first invalid value.
    pub fn parse(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.split('#').next().unwrap_or(value).trim();
                self.apply_setting(key, value)?;
            }
        }
        Ok(())
    }

    /// Applies `NETFLEET_<KEY>` overrides from `vars`.
    ///
    /// # Errors
    /// Returns error on an invalid value.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if name == MASTER_KEY_ENV {
                let key = SecretKey::from_base64(&value)
                    .map_err(|_| ConfigError::invalid(MASTER_KEY_ENV, "<redacted>"))?;
                self.master_key = Some(key);
            } else if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                let key = key.to_lowercase();
                if Self::is_known_key(&key) {
                    self.apply_setting(&key, value.trim())?;
                }
            }
        }
        Ok(())
    }

    fn is_known_key(key: &str) -> bool {
        matches!(
            key,
            "ssh_port"
                | "connect_timeout"
                | "command_timeout"
                | "store_path"
                | "signatures_file"
                | "log_enabled"
                | "log_level"
                | "log_retention"
                | "log_stderr"
        )
    }

    /// Applies a single setting. Unknown keys are ignored.
    fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "ssh_port" => {
                self.ssh_port = value
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port > 0)
                    .ok_or_else(|| ConfigError::invalid(key, value))?;
            }
            "connect_timeout" => self.connect_timeout = parse_seconds(key, value)?,
            "command_timeout" => self.command_timeout = parse_seconds(key, value)?,
            "store_path" => {
                if value.is_empty() {
                    return Err(ConfigError::invalid(key, value));
                }
                self.store_path = expand_path(value);
            }
            "signatures_file" => {
                self.signatures_file = (!value.is_empty()).then(|| expand_path(value));
            }
            "log_level" => self.log_config.level = LogConfig::parse_level(value),
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value)
                    .ok_or_else(|| ConfigError::invalid(key, value))?;
            }
            "log_enabled" | "logging" => self.log_config.enabled = parse_bool(key, value)?,
            "log_stderr" => self.log_config.to_stderr = parse_bool(key, value)?,
            _ => debug!("Ignoring unknown config key '{}'", key),
        }
        Ok(())
    }

    /// SSH settings derived from this configuration.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            port: self.ssh_port,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
        }
    }

    /// Logging configuration.
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        self.log_config.clone()
    }

    /// Vault configuration.
    #[must_use]
    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            master_key: self.master_key.clone(),
        }
    }
}
