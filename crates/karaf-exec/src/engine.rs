//! End-to-end run: connect, execute, classify, disconnect

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::classify::{MarkerClassifier, OutcomeClassifier};
use crate::config::{EngineOptions, RetryPolicy};
use crate::connector::Connector;
use crate::credentials::{CredentialProvider, NoPrompt, PasswordPrompt, TerminalPrompt};
use crate::error::ExecError;
use crate::executor::{CommandExecutor, OutputSinks};
use crate::result::{CommandResult, ExecutionOutcome, Target};
use crate::traits::{RemoteSession, Transport};

/// Runs one command script against one target
pub struct Engine {
    connector: Connector,
    credentials: CredentialProvider,
    executor: CommandExecutor,
    classifier: Box<dyn OutcomeClassifier>,
    prompt: Box<dyn PasswordPrompt>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("connector", &self.connector)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start building an engine on top of `transport`
    pub fn builder(
        transport: Arc<dyn Transport>,
        credentials: CredentialProvider,
    ) -> EngineBuilder {
        EngineBuilder {
            transport,
            credentials,
            retry: RetryPolicy::default(),
            options: EngineOptions::default(),
            sinks: None,
            classifier: None,
            prompt: None,
        }
    }

    /// Run `commands` as a single script on `target`
    ///
    /// The session is closed whatever happens after it was opened. A failure
    /// to close is only reported when nothing failed before it.
    ///
    /// # Errors
    /// `ConnectionFailed` / `AuthenticationFailed` from the connector,
    /// `CommandFailed` with the extracted message when the command fails,
    /// `Cleanup` when only the disconnect failed
    #[instrument(skip(self, commands), fields(host = %target.host))]
    pub async fn run<S: AsRef<str>>(
        &mut self,
        target: &Target,
        commands: &[S],
    ) -> Result<CommandResult, ExecError> {
        if commands.is_empty() {
            return Err(ExecError::ConfigError("no command to execute".to_string()));
        }

        for cmd in commands {
            info!("{}", cmd.as_ref());
        }
        let script = self.executor.script(commands);

        let credentials = self.credentials.credentials();
        let mut session = self
            .connector
            .connect(target, &credentials, self.prompt.as_mut())
            .await?;

        let outcome = self.execute_and_classify(session.as_mut(), &script).await;
        let closed = session.close().await;

        match (outcome, closed) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to close session after failure");
                Err(e)
            }
        }
    }

    async fn execute_and_classify(
        &mut self,
        session: &mut dyn RemoteSession,
        script: &str,
    ) -> Result<CommandResult, ExecError> {
        let result = self.executor.execute(session, script).await?;
        let echoed = self.executor.echo(&result);

        match self.classifier.classify(&result) {
            ExecutionOutcome::Success => {
                echoed?;
                Ok(result)
            }
            ExecutionOutcome::Failure { message } => {
                if let Err(e) = echoed {
                    warn!(error = %e, "failed to echo remote output");
                }
                Err(ExecError::CommandFailed {
                    status: result.exit_status,
                    message,
                })
            }
        }
    }
}

/// Builder for `Engine`
pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    credentials: CredentialProvider,
    retry: RetryPolicy,
    options: EngineOptions,
    sinks: Option<OutputSinks>,
    classifier: Option<Box<dyn OutcomeClassifier>>,
    prompt: Option<Box<dyn PasswordPrompt>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Echo output somewhere other than the process's standard streams
    #[must_use]
    pub fn sinks(mut self, sinks: OutputSinks) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Replace the marker-based classifier
    #[must_use]
    pub fn classifier(mut self, classifier: impl OutcomeClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Replace the terminal password prompt
    #[must_use]
    pub fn prompt(mut self, prompt: impl PasswordPrompt + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let options = self.options;

        let prompt = self.prompt.unwrap_or_else(|| {
            if options.interactive {
                Box::new(TerminalPrompt)
            } else {
                Box::new(NoPrompt)
            }
        });
        let classifier = self
            .classifier
            .unwrap_or_else(|| Box::new(MarkerClassifier::new(options.legacy_error_scan)));

        Engine {
            connector: Connector::new(self.transport, self.retry),
            credentials: self.credentials.with_interactive(options.interactive),
            executor: CommandExecutor::new(
                options.line_separator,
                self.sinks.unwrap_or_default(),
            ),
            classifier,
            prompt,
        }
    }
}
