//! Transport strategy seam
//!
//! The retry, execution and classification logic only talk to these traits,
//! so the SSH library behind them can be swapped or mocked.

use async_trait::async_trait;

use crate::credentials::{Credential, PasswordPrompt};
use crate::error::ExecError;
use crate::result::{CommandResult, Target};

/// Opens sessions to a target
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an unauthenticated session
    ///
    /// # Errors
    /// Returns `ExecError::ConnectionFailed` for refused, unreachable or
    /// failed negotiation; the connector retries those
    async fn open(&self, target: &Target) -> Result<Box<dyn RemoteSession>, ExecError>;

    fn transport_type(&self) -> &'static str;
}

/// An open transport-layer connection
#[async_trait]
pub trait RemoteSession: Send {
    /// Offer one credential as `user`
    ///
    /// Returns `Ok(false)` when the server rejects it; errors are reserved for
    /// transport or prompt failures.
    async fn authenticate(
        &mut self,
        user: &str,
        credential: &Credential,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<bool, ExecError>;

    /// Run `command` on a fresh channel and wait for the channel to close
    ///
    /// The command is sent as-is; callers terminate it.
    async fn exec(&mut self, command: &str) -> Result<CommandResult, ExecError>;

    /// Release the connection
    async fn close(&mut self) -> Result<(), ExecError>;
}
