//! Scripted SSH sessions.
//!
//! A [`TranscriptConnector`] answers commands from canned device scripts
//! instead of the network. It drives the test suite and the `--transcript`
//! CLI flag, which replays a TOML file:
//!
//! ```toml
//! [[device]]
//! host = "10.0.0.1"
//! password = "admin"
//!
//! [[device.command]]
//! command = "show version"
//! stdout = "PAN-OS 10.1"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{ExecOutput, SessionError, SshConnector, SshSession, SshTarget};

/// Maximum transcript file size (1MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Errors loading a transcript file.
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Transcript file too large (max {max} bytes)")]
    FileTooLarge { max: u64 },
}

/// How a scripted device answers a connection attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// Session opens.
    #[default]
    Ok,
    /// Nothing listens; no transport is opened.
    Refused,
    /// Transport opens, then the handshake stalls.
    Timeout,
    /// Transport opens, then the credentials are rejected.
    AuthRejected,
}

/// How a scripted command fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// The command never returns.
    Timeout,
    /// The channel drops mid-command.
    Disconnect,
}

#[derive(Debug, Clone, Deserialize)]
struct CommandScript {
    command: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    fault: Option<Fault>,
}

/// Canned behavior for one host.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceScript {
    host: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    connect: ConnectOutcome,
    #[serde(default, rename = "command")]
    commands: Vec<CommandScript>,
}

impl DeviceScript {
    /// Creates a script for `host` that accepts any password.
    #[must_use]
    pub fn new(host: &str) -> Self {
        assert!(!host.is_empty(), "host must not be empty");

        Self {
            host: host.to_string(),
            password: None,
            connect: ConnectOutcome::Ok,
            commands: Vec::new(),
        }
    }

    /// Only accepts this password; any other is rejected.
    #[must_use]
    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Sets the connection outcome.
    #[must_use]
    pub fn connect(mut self, outcome: ConnectOutcome) -> Self {
        self.connect = outcome;
        self
    }

    /// Answers `command` on stdout.
    #[must_use]
    pub fn respond(self, command: &str, stdout: &str) -> Self {
        self.push(command, stdout, "", None)
    }

    /// Answers `command` on stderr only.
    #[must_use]
    pub fn respond_stderr(self, command: &str, stderr: &str) -> Self {
        self.push(command, "", stderr, None)
    }

    /// Makes `command` fail.
    #[must_use]
    pub fn fail(self, command: &str, fault: Fault) -> Self {
        self.push(command, "", "", Some(fault))
    }

    fn push(mut self, command: &str, stdout: &str, stderr: &str, fault: Option<Fault>) -> Self {
        self.commands.retain(|c| c.command != command);
        self.commands.push(CommandScript {
            command: command.to_string(),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            fault,
        });
        self
    }
}

/// Counters shared by a connector and its sessions.
#[derive(Debug, Default)]
pub struct TranscriptStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl TranscriptStats {
    /// Transports opened, including ones that then failed to authenticate.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Transports closed.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Every command sent, in order, as `host: command`.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn record(&self, host: &str, command: &str) {
        if let Ok(mut log) = self.commands.lock() {
            log.push(format!("{host}: {command}"));
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptFile {
    #[serde(default)]
    device: Vec<DeviceScript>,
}

/// Connector that replays device scripts.
#[derive(Debug, Default)]
pub struct TranscriptConnector {
    devices: HashMap<String, DeviceScript>,
    stats: Arc<TranscriptStats>,
}

impl TranscriptConnector {
    /// Creates a connector with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a device script.
    #[must_use]
    pub fn device(mut self, script: DeviceScript) -> Self {
        self.devices.insert(script.host.clone(), script);
        self
    }

    /// Shared counters for this connector.
    #[must_use]
    pub fn stats(&self) -> Arc<TranscriptStats> {
        Arc::clone(&self.stats)
    }

    /// Parses a TOML transcript.
    pub fn from_toml_str(content: &str) -> Result<Self, TranscriptError> {
        let file: TranscriptFile = toml::from_str(content)?;
        Ok(file.device.into_iter().fold(Self::new(), Self::device))
    }

    /// Loads a TOML transcript file.
    pub fn load_file(path: &Path) -> Result<Self, TranscriptError> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(TranscriptError::FileTooLarge { max: MAX_FILE_SIZE });
        }
        let content = fs::read_to_string(path)?;
        let connector = Self::from_toml_str(&content)?;
        debug!(
            "Loaded transcript with {} devices from {:?}",
            connector.devices.len(),
            path
        );
        Ok(connector)
    }
}

impl SshConnector for TranscriptConnector {
    fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn SshSession>, SessionError> {
        let Some(script) = self.devices.get(&target.host) else {
            return Err(SessionError::Connection(format!(
                "no route to host {}",
                target.host
            )));
        };

        let outcome = match script.password {
            Some(ref expected) if *expected != target.password => ConnectOutcome::AuthRejected,
            _ => script.connect,
        };

        if outcome == ConnectOutcome::Refused {
            return Err(SessionError::Connection(format!(
                "connection refused by {}",
                target.host
            )));
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let mut session = TranscriptSession {
            script: script.clone(),
            stats: Arc::clone(&self.stats),
            closed: false,
        };

        match outcome {
            ConnectOutcome::Timeout => {
                session.close();
                Err(SessionError::Timeout(timeout))
            }
            ConnectOutcome::AuthRejected => {
                session.close();
                Err(SessionError::Authentication(format!(
                    "rejected for user {}",
                    target.username
                )))
            }
            ConnectOutcome::Ok | ConnectOutcome::Refused => Ok(Box::new(session)),
        }
    }
}

struct TranscriptSession {
    script: DeviceScript,
    stats: Arc<TranscriptStats>,
    closed: bool,
}

impl SshSession for TranscriptSession {
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, SessionError> {
        if self.closed {
            return Err(SessionError::Command("session is closed".to_string()));
        }
        self.stats.record(&self.script.host, command);

        let Some(entry) = self.script.commands.iter().find(|c| c.command == command) else {
            return Err(SessionError::Command(format!("unknown command: {command}")));
        };

        match entry.fault {
            Some(Fault::Timeout) => Err(SessionError::Timeout(timeout)),
            Some(Fault::Disconnect) => {
                Err(SessionError::Command("channel closed by peer".to_string()))
            }
            None => Ok(ExecOutput::new(&entry.stdout, &entry.stderr)),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for TranscriptSession {
    fn drop(&mut self) {
        self.close();
    }
}
