//! SSH transport using russh crate

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse, Prompt};
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
#[cfg(unix)]
use russh::AgentAuthError;
use russh::{Channel, ChannelMsg, Disconnect};
use tracing::{debug, info, instrument};

use crate::credentials::{Credential, PasswordPrompt};
use crate::error::ExecError;
use crate::result::{CommandResult, Target};
use crate::traits::{RemoteSession, Transport};

/// Extended data stream number of stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler {
    print_banner: bool,
}

impl SshClientHandler {
    /// Show the pre-authentication banner, on `out` when interactive
    fn welcome(&self, banner: &str, out: &mut impl Write) -> io::Result<()> {
        if !self.print_banner {
            debug!(banner = banner.trim_end(), "server banner");
            return Ok(());
        }
        out.write_all(banner.as_bytes())?;
        out.flush()
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        if let Err(e) = self.welcome(banner, &mut io::stderr()) {
            debug!(error = %e, "failed to print server banner");
        }
        Ok(())
    }

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

/// Transport opening russh client sessions
#[derive(Debug, Clone)]
pub struct SshTransport {
    config: Arc<client::Config>,
    print_banner: bool,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    /// Use a custom russh client configuration
    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
            print_banner: false,
        }
    }

    /// Print the server's login banner to stderr instead of only logging it
    #[must_use]
    pub fn with_banner(mut self, print: bool) -> Self {
        self.print_banner = print;
        self
    }
}

#[async_trait]
impl Transport for SshTransport {
    #[instrument(skip(self), fields(host = %target.host))]
    async fn open(&self, target: &Target) -> Result<Box<dyn RemoteSession>, ExecError> {
        let handler = SshClientHandler {
            print_banner: self.print_banner,
        };
        let handle = client::connect(
            Arc::clone(&self.config),
            (&target.host[..], target.port),
            handler,
        )
        .await
        .map_err(|e| {
            ExecError::ConnectionFailed(format!("{}:{}: {e}", target.host, target.port))
        })?;

        info!(host = %target.host, port = target.port, "SSH connected");

        Ok(Box::new(SshSession {
            host: target.host.clone(),
            handle: Some(handle),
        }))
    }

    fn transport_type(&self) -> &'static str {
        "ssh"
    }
}

/// An open russh session
pub struct SshSession {
    host: String,
    handle: Option<client::Handle<SshClientHandler>>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .field("open", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl SshSession {
    fn handle(&mut self) -> Result<&mut client::Handle<SshClientHandler>, ExecError> {
        self.handle
            .as_mut()
            .ok_or_else(|| ExecError::ChannelError("session already closed".to_string()))
    }

    async fn auth_identity(
        &mut self,
        user: &str,
        key: Arc<russh::keys::PrivateKey>,
    ) -> Result<bool, ExecError> {
        let handle = self.handle()?;
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let auth_res = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
            .await
            .map_err(auth_error)?;

        Ok(auth_res.success())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<bool, ExecError> {
        let auth_res = self
            .handle()?
            .authenticate_password(user, password)
            .await
            .map_err(auth_error)?;

        Ok(auth_res.success())
    }

    #[cfg(unix)]
    async fn auth_agent(&mut self, user: &str) -> Result<bool, ExecError> {
        use russh::keys::agent::client::AgentClient;

        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| ExecError::KeyParse(format!("ssh-agent unavailable: {e}")))?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| ExecError::KeyParse(format!("failed to list agent identities: {e}")))?;

        debug!(count = identities.len(), "offering agent identities");

        let handle = self.handle()?;
        for public_key in identities {
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            let auth_res = handle
                .authenticate_publickey_with(user, public_key, hash_alg, &mut agent)
                .await
                .map_err(agent_auth_error)?;

            if auth_res.success() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    #[cfg(not(unix))]
    async fn auth_agent(&mut self, _user: &str) -> Result<bool, ExecError> {
        Err(ExecError::KeyParse(
            "ssh-agent not supported on this platform".to_string(),
        ))
    }

    /// Keyboard-interactive exchange answering every server prompt through `prompt`
    ///
    /// Falls back to a single password prompt when the server does not offer
    /// keyboard-interactive.
    async fn auth_interactive(
        &mut self,
        user: &str,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<bool, ExecError> {
        let mut response = self
            .handle()?
            .authenticate_keyboard_interactive_start(user, None::<String>)
            .await
            .map_err(auth_error)?;

        let mut asked = false;
        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure { .. } if asked => return Ok(false),
                KeyboardInteractiveAuthResponse::Failure { .. } => {
                    debug!("keyboard-interactive not offered, prompting for password");
                    let password = prompt.provide_password("Password: ")?;
                    return self.auth_password(user, &password).await;
                }
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    let answers = answer_prompts(&prompts, prompt)?;
                    asked = asked || !prompts.is_empty();

                    response = self
                        .handle()?
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(auth_error)?;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn authenticate(
        &mut self,
        user: &str,
        credential: &Credential,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<bool, ExecError> {
        match credential {
            Credential::Identity(identity) => self.auth_identity(user, identity.key()).await,
            Credential::Password(password) => self.auth_password(user, password).await,
            Credential::Agent => self.auth_agent(user).await,
            Credential::Prompt => self.auth_interactive(user, prompt).await,
        }
    }

    #[instrument(skip(self, command), fields(host = %self.host))]
    async fn exec(&mut self, command: &str) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| ExecError::ChannelError(e.to_string()))?;

        let mut remote_closed = false;
        let result = drive_channel(&mut channel, command, &mut remote_closed).await;
        let closed = channel.close().await;
        let result = settle_channel(result, closed, remote_closed)?;
        debug!(
            exit_status = ?result.exit_status,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            duration = ?start.elapsed(),
            "remote command completed"
        );

        Ok(result)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::Cleanup(e.to_string()))?;
            info!(host = %self.host, "SSH disconnected");
        }
        Ok(())
    }
}

/// Send `command`, an empty stdin, and collect output until the channel closes
///
/// `remote_closed` is set once the remote side has closed the channel.
async fn drive_channel(
    channel: &mut Channel<client::Msg>,
    command: &str,
    remote_closed: &mut bool,
) -> Result<CommandResult, ExecError> {
    channel
        .exec(true, command)
        .await
        .map_err(|e| ExecError::ChannelError(e.to_string()))?;

    // no interactive input is ever sent
    channel
        .eof()
        .await
        .map_err(|e| ExecError::ChannelError(e.to_string()))?;

    let mut result = CommandResult::default();

    // Eof may precede ExitStatus, so read until the channel is gone
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                result.stdout.extend_from_slice(&data);
            }
            ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                result.stderr.extend_from_slice(&data);
            }
            ChannelMsg::ExitStatus { exit_status } => {
                result.exit_status = Some(exit_status);
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    *remote_closed = true;

    Ok(result)
}

/// Combine the channel outcome with our own close request
///
/// Once the remote side closed the channel a failing close is expected and
/// ignored. Otherwise it is reported, unless the channel already failed.
fn settle_channel(
    result: Result<CommandResult, ExecError>,
    closed: Result<(), russh::Error>,
    remote_closed: bool,
) -> Result<CommandResult, ExecError> {
    match (result, closed) {
        (result, Ok(())) => result,
        (result, Err(e)) if remote_closed => {
            debug!(error = %e, "channel already closed");
            result
        }
        (Ok(_), Err(e)) => Err(ExecError::Cleanup(format!("channel close: {e}"))),
        (Err(err), Err(e)) => {
            debug!(error = %e, "failed to close channel after failure");
            Err(err)
        }
    }
}

/// Ask for each keyboard-interactive answer, echoed only where the server allows
fn answer_prompts(
    prompts: &[Prompt],
    prompt: &mut dyn PasswordPrompt,
) -> Result<Vec<String>, ExecError> {
    prompts
        .iter()
        .map(|p| prompt.provide_answer(&format!("{} ", p.prompt.trim_end()), p.echo))
        .collect()
}

fn auth_error(e: russh::Error) -> ExecError {
    match e {
        russh::Error::Disconnect
        | russh::Error::HUP
        | russh::Error::SendError
        | russh::Error::IO(_) => ExecError::ConnectionFailed(e.to_string()),
        other => ExecError::AuthenticationFailed(other.to_string()),
    }
}

/// A send failure means the session is gone; a key failure only skips the agent
#[cfg(unix)]
fn agent_auth_error(e: AgentAuthError) -> ExecError {
    match e {
        AgentAuthError::Send(e) => ExecError::ConnectionFailed(e.to_string()),
        AgentAuthError::Key(e) => ExecError::AuthenticationFailed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::credentials::NoPrompt;

    /// Records which prompts were asked with echo on
    #[derive(Default)]
    struct ScriptedPrompt {
        asked: Vec<(String, bool)>,
    }

    impl PasswordPrompt for ScriptedPrompt {
        fn provide_password(&mut self, prompt: &str) -> Result<String, ExecError> {
            self.provide_answer(prompt, false)
        }

        fn provide_answer(&mut self, prompt: &str, echo: bool) -> Result<String, ExecError> {
            self.asked.push((prompt.to_string(), echo));
            Ok(if echo { "karaf" } else { "secret" }.to_string())
        }
    }

    #[test]
    fn test_auth_error_classification() {
        assert!(auth_error(russh::Error::Disconnect).is_retryable());
        assert!(auth_error(russh::Error::SendError).is_retryable());
        assert!(matches!(
            auth_error(russh::Error::NotAuthenticated),
            ExecError::AuthenticationFailed(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_agent_send_error_is_connection_failure() {
        let err = agent_auth_error(AgentAuthError::Send(russh::SendError {}));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_interactive_prompts_honour_echo() {
        let prompts = vec![
            Prompt {
                prompt: "Login:".to_string(),
                echo: true,
            },
            Prompt {
                prompt: "Password: ".to_string(),
                echo: false,
            },
        ];
        let mut prompt = ScriptedPrompt::default();

        let answers = answer_prompts(&prompts, &mut prompt).unwrap();

        assert_eq!(answers, vec!["karaf", "secret"]);
        assert_eq!(
            prompt.asked,
            vec![
                ("Login: ".to_string(), true),
                ("Password: ".to_string(), false)
            ]
        );
    }

    #[test]
    fn test_interactive_prompt_failure_aborts() {
        let prompts = vec![Prompt {
            prompt: "Password:".to_string(),
            echo: false,
        }];
        assert!(matches!(
            answer_prompts(&prompts, &mut NoPrompt),
            Err(ExecError::Prompt(_))
        ));
    }

    #[test]
    fn test_banner_printed_when_interactive() {
        let mut out = Vec::new();
        let handler = SshClientHandler {
            print_banner: true,
        };
        handler.welcome("Apache Karaf\n", &mut out).unwrap();
        assert_eq!(out, b"Apache Karaf\n");

        let mut out = Vec::new();
        let handler = SshClientHandler {
            print_banner: false,
        };
        handler.welcome("Apache Karaf\n", &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_channel_close_after_remote_close_ignored() {
        let closed = Err(russh::Error::SendError);
        let result = settle_channel(Ok(CommandResult::default()), closed, true);
        assert!(result.is_ok());
    }

    #[test]
    fn test_channel_close_failure_reported() {
        let closed = Err(russh::Error::SendError);
        let result = settle_channel(Ok(CommandResult::default()), closed, false);
        assert!(matches!(result, Err(ExecError::Cleanup(_))));

        let result = settle_channel(
            Err(ExecError::ChannelError("exec refused".to_string())),
            Err(russh::Error::SendError),
            false,
        );
        assert!(matches!(result, Err(ExecError::ChannelError(_))));
    }

    #[tokio::test]
    async fn test_open_refused() {
        // port 1 on loopback is not expected to accept SSH
        let target = Target::new("127.0.0.1", "karaf").with_port(1);
        let result = SshTransport::new().open(&target).await;
        assert!(matches!(result, Err(ExecError::ConnectionFailed(_))));
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_exec_against_local_karaf() {
        let target = Target::default();
        let mut session = SshTransport::new().open(&target).await.unwrap();
        let password = Credential::Password("karaf".into());
        let accepted = session
            .authenticate("karaf", &password, &mut NoPrompt)
            .await
            .unwrap();
        assert!(accepted);
        let result = session.exec("feature:list\n").await.unwrap();
        assert_eq!(result.exit_status, Some(0));
        session.close().await.unwrap();
    }
}
