//! Error types for karaf-exec

use thiserror::Error;

/// Errors that can occur while connecting to and running commands on a remote shell
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host (refused, unreachable, negotiation failure)
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No offered credential was accepted
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Key material could not be read or decoded
    #[error("SSH key error: {0}")]
    KeyParse(String),

    /// Opening or driving the execution channel failed
    #[error("channel error: {0}")]
    ChannelError(String),

    /// Remote command reported failure
    #[error("{message}")]
    CommandFailed {
        /// Exit status, absent when the remote side reported none
        status: Option<u32>,
        /// Message extracted from the remote output
        message: String,
    },

    /// Releasing the session or channel failed
    #[error("failed to close session: {0}")]
    Cleanup(String),

    /// Reading a password from the terminal failed
    #[error("unable to prompt for password: {0}")]
    Prompt(String),

    /// I/O error while echoing output
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::ConnectionFailed(_))
    }

    /// Whether the error is the remote command's own failure
    #[must_use]
    pub fn is_command_failure(&self) -> bool {
        matches!(self, ExecError::CommandFailed { .. })
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::IoError(e.to_string())
    }
}
