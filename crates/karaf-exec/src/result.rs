//! Result types for command execution

use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw output of one remote execution channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// stdout bytes, color escapes included
    pub stdout: Vec<u8>,
    /// stderr bytes
    pub stderr: Vec<u8>,
    /// Exit status, `None` when the remote side never reported one
    pub exit_status: Option<u32>,
}

impl CommandResult {
    /// Create a result from captured output
    pub fn new(
        stdout: impl Into<Vec<u8>>,
        stderr: impl Into<Vec<u8>>,
        exit_status: Option<u32>,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    /// stdout decoded lossily as UTF-8
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// stderr decoded lossily as UTF-8
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Final verdict on a remote execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The command succeeded
    Success,
    /// The command failed; `message` is extracted from its output
    Failure {
        /// Human-readable reason
        message: String,
    },
}

impl ExecutionOutcome {
    /// Build a failure outcome
    pub fn failure(message: impl Into<String>) -> Self {
        ExecutionOutcome::Failure {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

/// Remote endpoint to run commands on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Port (default 8101, the Karaf console port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    #[serde(default = "default_user")]
    pub user: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8101
}

fn default_user() -> String {
    "karaf".to_string()
}

impl Default for Target {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
        }
    }
}

impl Target {
    /// Create a new target on the default port
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
