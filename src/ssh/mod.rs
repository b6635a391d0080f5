//! SSH session contract.
//!
//! Device probing and command execution talk to devices through the
//! [`SshConnector`] and [`SshSession`] traits so they can run against the
//! real `ssh2` client or a scripted transcript.
//!
//! # Session lifecycle
//!
//! Every operation opens exactly one session through [`open_session`], runs
//! its commands serially, and lets the returned [`SessionGuard`] close the
//! session. The guard closes on explicit [`SessionGuard::close`] or on drop,
//! whichever comes first, and never twice.

pub mod client;
pub mod transcript;

pub use client::Ssh2Connector;
pub use transcript::{
    ConnectOutcome, DeviceScript, Fault, TranscriptConnector, TranscriptError, TranscriptStats,
};

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default connect and command timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Errors from opening or using an SSH session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Host unreachable, handshake failure, or transport error.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Operation exceeded its bound.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A command could not be executed on an open session.
    #[error("Command failed: {0}")]
    Command(String),
}

impl SessionError {
    /// Returns true for failures that happen before a session exists.
    #[must_use]
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Connection(_))
    }
}

/// Who and where to connect.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SshTarget {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
}

impl SshTarget {
    /// Creates a target on the default port.
    #[must_use]
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Checks that the target names a host and a usable port.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.host.trim().is_empty() {
            return Err(SessionError::Connection("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(SessionError::Connection("port must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Returns `host` or `host:port` for non-default ports.
    #[must_use]
    pub fn connection_string(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("has_password", &!self.password.is_empty())
            .finish()
    }
}

/// Connection settings shared by every SSH-bearing component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshSettings {
    /// Port used when the caller gives none.
    pub port: u16,
    /// Bound on connect, handshake and authentication.
    pub connect_timeout: Duration,
    /// Bound on each command round-trip.
    pub command_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl SshSettings {
    /// Builds a target on the configured port.
    #[must_use]
    pub fn target(&self, host: &str, username: &str, password: &str) -> SshTarget {
        SshTarget::new(host, username, password).with_port(self.port)
    }
}

/// Captured output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Remote exit status, when the server reported one.
    pub exit_status: Option<i32>,
}

impl ExecOutput {
    /// Creates output with the given streams.
    #[must_use]
    pub fn new(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status: None,
        }
    }

    /// Trimmed stdout, or trimmed stderr when stdout is empty.
    ///
    /// The streams are never concatenated.
    #[must_use]
    pub fn result_text(&self) -> &str {
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            self.stderr.trim()
        } else {
            stdout
        }
    }
}

/// An open SSH session.
pub trait SshSession: Send {
    /// Runs one command and captures both streams.
    fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, SessionError>;

    /// Closes the session. Calling it again is a no-op.
    fn close(&mut self);
}

/// Opens SSH sessions.
pub trait SshConnector: Send + Sync {
    /// Connects and authenticates.
    ///
    /// A connector that opened a transport before failing closes it before
    /// returning the error.
    fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn SshSession>, SessionError>;
}

/// Scoped owner of an open session.
pub struct SessionGuard {
    session: Box<dyn SshSession>,
    host: String,
    closed: bool,
}

impl SessionGuard {
    /// Takes ownership of an open session.
    #[must_use]
    pub fn new(session: Box<dyn SshSession>, host: &str) -> Self {
        Self {
            session,
            host: host.to_string(),
            closed: false,
        }
    }

    /// Runs one command on the session.
    pub fn exec(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, SessionError> {
        debug!("exec on {}: {}", self.host, command);
        self.session.exec(command, timeout)
    }

    /// Closes the session now.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close();
            info!("SSH connection to {} closed", self.host);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Opens a session for `target` with the configured connect timeout.
///
/// A target without a host or port fails with [`SessionError::Connection`]
/// before the connector is asked for anything.
pub fn open_session(
    connector: &dyn SshConnector,
    target: &SshTarget,
    settings: &SshSettings,
) -> Result<SessionGuard, SessionError> {
    target.validate()?;
    match connector.connect(target, settings.connect_timeout) {
        Ok(session) => {
            info!("SSH connected to {}", target.connection_string());
            Ok(SessionGuard::new(session, &target.connection_string()))
        }
        Err(e) => {
            error!("SSH connect to {} failed: {}", target.connection_string(), e);
            Err(e)
        }
    }
}
