//! Command execution on an authenticated session

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::RemoteSession;

/// Where captured remote output is echoed
pub struct OutputSinks {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl std::fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSinks").finish_non_exhaustive()
    }
}

impl Default for OutputSinks {
    fn default() -> Self {
        Self::std()
    }
}

impl OutputSinks {
    pub fn new(stdout: impl Write + Send + 'static, stderr: impl Write + Send + 'static) -> Self {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    /// The process's own standard streams
    #[must_use]
    pub fn std() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Discard everything
    #[must_use]
    pub fn sink() -> Self {
        Self::new(io::sink(), io::sink())
    }

    fn echo(&mut self, result: &CommandResult) -> io::Result<()> {
        self.stdout.write_all(&result.stdout)?;
        self.stdout.flush()?;
        self.stderr.write_all(&result.stderr)?;
        self.stderr.flush()
    }
}

/// Cloneable in-memory writer, readable after execution
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs command scripts and echoes their raw output
#[derive(Debug)]
pub struct CommandExecutor {
    line_separator: String,
    sinks: OutputSinks,
}

impl CommandExecutor {
    pub fn new(line_separator: impl Into<String>, sinks: OutputSinks) -> Self {
        Self {
            line_separator: line_separator.into(),
            sinks,
        }
    }

    /// Join commands into one script, each line terminated
    #[must_use]
    pub fn script<S: AsRef<str>>(&self, commands: &[S]) -> String {
        commands.iter().fold(String::new(), |mut script, cmd| {
            script.push_str(cmd.as_ref());
            script.push_str(&self.line_separator);
            script
        })
    }

    /// Run `command` on `session`
    ///
    /// The command gets a trailing line separator so the remote shell sees a
    /// complete final line. Blocks until the remote channel closes. Output is
    /// not echoed here; see [`CommandExecutor::echo`].
    ///
    /// # Errors
    /// Returns channel errors from the session
    #[instrument(skip_all)]
    pub async fn execute(
        &mut self,
        session: &mut dyn RemoteSession,
        command: &str,
    ) -> Result<CommandResult, ExecError> {
        let mut script = String::with_capacity(command.len() + self.line_separator.len());
        script.push_str(command);
        script.push_str(&self.line_separator);

        debug!(bytes = script.len(), "sending command script");

        session.exec(&script).await
    }

    /// Echo captured output verbatim to the sinks
    ///
    /// # Errors
    /// Returns `IoError` if a sink cannot be written
    pub fn echo(&mut self, result: &CommandResult) -> Result<(), ExecError> {
        self.sinks.echo(result)?;
        Ok(())
    }
}
