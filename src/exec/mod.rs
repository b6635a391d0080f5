//! Multi-command execution.
//!
//! One session per call; commands run serially in input order. A failing
//! command is recorded in its own result and the rest still run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::normalize::{NormalizedOutput, normalize};
use crate::ssh::{SessionError, SshConnector, SshSettings, open_session};

/// Outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Position in the input list.
    pub index: usize,
    pub command: String,
    /// Normalized result text.
    pub structured: NormalizedOutput,
    /// Stdout, or stderr when stdout was empty.
    pub raw_output: String,
    /// Execution failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// Returns true if the command ran without a transport error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Results of one [`CommandExecutor::execute_all`] call, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub host: String,
    pub results: Vec<CommandResult>,
}

impl ExecutionReport {
    /// Results keyed by command text. A repeated command keeps its last
    /// occurrence.
    #[must_use]
    pub fn by_command(&self) -> BTreeMap<&str, &CommandResult> {
        self.results
            .iter()
            .map(|r| (r.command.as_str(), r))
            .collect()
    }

    /// Number of commands that failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }
}

/// Runs command lists against one device at a time.
#[derive(Clone)]
pub struct CommandExecutor {
    connector: Arc<dyn SshConnector>,
    settings: SshSettings,
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CommandExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(connector: Arc<dyn SshConnector>, settings: SshSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Runs `commands` on `host` over a single session.
    ///
    /// Connect failures abort the call. Command failures are recorded per
    /// result.
    pub fn execute_all<S: AsRef<str>>(
        &self,
        host: &str,
        username: &str,
        password: &str,
        commands: &[S],
    ) -> Result<ExecutionReport, SessionError> {
        let target = self.settings.target(host, username, password);
        let mut session = open_session(self.connector.as_ref(), &target, &self.settings)?;

        let mut results = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            let command = command.as_ref();
            let result = match session.exec(command, self.settings.command_timeout) {
                Ok(output) => {
                    let text = output.result_text();
                    debug!("{} '{}' returned {} bytes", host, command, text.len());
                    CommandResult {
                        index,
                        command: command.to_string(),
                        structured: normalize(text, command),
                        raw_output: text.to_string(),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("{} '{}' failed: {}", host, command, e);
                    CommandResult {
                        index,
                        command: command.to_string(),
                        structured: normalize("", command),
                        raw_output: String::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        session.close();

        let report = ExecutionReport {
            host: host.to_string(),
            results,
        };
        info!(
            "Executed {} commands on {} ({} failed)",
            report.results.len(),
            host,
            report.failures()
        );
        Ok(report)
    }
}
