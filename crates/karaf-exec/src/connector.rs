//! Session establishment with bounded retry

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::RetryPolicy;
use crate::credentials::{Credential, PasswordPrompt};
use crate::error::ExecError;
use crate::result::Target;
use crate::traits::{RemoteSession, Transport};

/// Produces authenticated sessions, retrying transient connection failures
#[derive(Clone)]
pub struct Connector {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("transport", &self.transport.transport_type())
            .field("retry", &self.retry)
            .finish()
    }
}

impl Connector {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Open a session to `target` and authenticate it
    ///
    /// Only connection failures are retried. When every credential is
    /// rejected the session is closed before `AuthenticationFailed` is
    /// returned.
    ///
    /// # Errors
    /// `ConnectionFailed` once the retry budget is spent, `AuthenticationFailed`
    /// when no credential is accepted
    #[instrument(skip(self, credentials, prompt), fields(host = %target.host, port = target.port))]
    pub async fn connect(
        &self,
        target: &Target,
        credentials: &[Credential],
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        let mut session = self.open(target).await?;

        if let Err(e) = authenticate(session.as_mut(), target, credentials, prompt).await {
            if let Err(close_err) = session.close().await {
                warn!(error = %close_err, "failed to close rejected session");
            }
            return Err(e);
        }

        info!(target = %target, "authenticated");
        Ok(session)
    }

    async fn open(&self, target: &Target) -> Result<Box<dyn RemoteSession>, ExecError> {
        let mut retries = 0u32;

        loop {
            info!(
                target = %target,
                transport = self.transport.transport_type(),
                "connecting"
            );

            match self.transport.open(target).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() && retries < self.retry.attempts => {
                    retries += 1;
                    debug!(error = %e, "connection attempt failed");
                    sleep(self.retry.delay).await;
                    info!("retrying (attempt {retries}) ...");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn authenticate(
    session: &mut dyn RemoteSession,
    target: &Target,
    credentials: &[Credential],
    prompt: &mut dyn PasswordPrompt,
) -> Result<(), ExecError> {
    for credential in credentials {
        let user = match credential {
            Credential::Identity(identity) => identity.user(),
            _ => target.user.as_str(),
        };

        match session.authenticate(user, credential, prompt).await {
            Ok(true) => {
                debug!(method = credential.kind(), user = %user, "credential accepted");
                return Ok(());
            }
            Ok(false) => {
                debug!(method = credential.kind(), user = %user, "credential rejected");
            }
            // connection dropped mid-handshake
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(method = credential.kind(), error = %e, "credential could not be offered");
            }
        }
    }

    let tried: Vec<_> = credentials.iter().map(Credential::kind).collect();
    Err(ExecError::AuthenticationFailed(format!(
        "no credential accepted for {target} (tried: {})",
        if tried.is_empty() {
            "none".to_string()
        } else {
            tried.join(", ")
        }
    )))
}
