//! Authentication material offered to the remote shell
//!
//! [`CredentialProvider`] assembles the ordered credential list; the connector
//! offers the entries in order until the server accepts one. No network I/O
//! happens here.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use russh::keys::PrivateKey;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::keys::KeySource;

/// A decoded private key bound to the user it authenticates
#[derive(Clone)]
pub struct Identity {
    key: Arc<PrivateKey>,
    user: String,
    origin: String,
}

impl Identity {
    pub fn new(key: PrivateKey, user: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            key: Arc::new(key),
            user: user.into(),
            origin: origin.into(),
        }
    }

    #[must_use]
    pub fn key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Where the key came from (path, variable or "bundled key")
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user", &self.user)
            .field("origin", &self.origin)
            .field("algorithm", &self.key.algorithm())
            .finish()
    }
}

/// One unit of authentication material
#[derive(Clone)]
pub enum Credential {
    /// Password offered through the `password` method
    Password(String),
    /// Local key pair offered through the `publickey` method
    Identity(Identity),
    /// Identities held by the running ssh-agent
    Agent,
    /// Password read from the terminal once the server asks for one
    Prompt,
}

impl Credential {
    /// Short name used in log lines
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::Identity(_) => "publickey",
            Credential::Agent => "agent",
            Credential::Prompt => "keyboard-interactive",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::Identity(identity) => f.debug_tuple("Identity").field(identity).finish(),
            Credential::Agent => f.write_str("Agent"),
            Credential::Prompt => f.write_str("Prompt"),
        }
    }
}

/// Synchronous password callback used during authentication
///
/// Invoked on the connect path when the server asks for a password that was
/// not configured. Blocking is expected.
pub trait PasswordPrompt: Send {
    /// Ask for a password, echo disabled
    ///
    /// # Errors
    /// Returns `ExecError::Prompt` if no answer can be obtained
    fn provide_password(&mut self, prompt: &str) -> Result<String, ExecError>;

    /// Answer one keyboard-interactive prompt
    ///
    /// `echo` is the server's hint that the answer is not secret. The default
    /// treats every prompt as a password.
    ///
    /// # Errors
    /// Returns `ExecError::Prompt` if no answer can be obtained
    fn provide_answer(&mut self, prompt: &str, _echo: bool) -> Result<String, ExecError> {
        self.provide_password(prompt)
    }
}

/// Prompts on the controlling terminal, masking secret answers
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn provide_password(&mut self, prompt: &str) -> Result<String, ExecError> {
        rpassword::prompt_password(prompt).map_err(|e| ExecError::Prompt(e.to_string()))
    }

    fn provide_answer(&mut self, prompt: &str, echo: bool) -> Result<String, ExecError> {
        if !echo {
            return self.provide_password(prompt);
        }

        let mut stderr = io::stderr();
        stderr.write_all(prompt.as_bytes())?;
        stderr.flush()?;
        read_answer(&mut io::stdin().lock())
    }
}

/// Read one line, without its terminator
fn read_answer(input: &mut impl BufRead) -> Result<String, ExecError> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(ExecError::Prompt("end of input".to_string()));
    }
    let answer = line.trim_end_matches(['\r', '\n']);
    Ok(answer.to_string())
}

/// Refuses every prompt; used when no terminal is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn provide_password(&mut self, _prompt: &str) -> Result<String, ExecError> {
        Err(ExecError::Prompt("no terminal attached".to_string()))
    }
}

/// Assembles the ordered credential list for one invocation
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    user: String,
    key: Option<KeySource>,
    passphrase: Option<String>,
    password: Option<String>,
    use_agent: bool,
    interactive: bool,
}

impl CredentialProvider {
    /// Provider offering only the bundled key for `user`
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            key: None,
            passphrase: None,
            password: None,
            use_agent: false,
            interactive: false,
        }
    }

    /// Add a user-supplied key
    #[must_use]
    pub fn with_key(mut self, source: KeySource, passphrase: Option<String>) -> Self {
        self.key = Some(source);
        self.passphrase = passphrase;
        self
    }

    /// Register a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Also offer the identities of a running ssh-agent
    #[must_use]
    pub fn with_agent(mut self, enabled: bool) -> Self {
        self.use_agent = enabled;
        self
    }

    /// Allow a password prompt when nothing else was supplied
    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Resolve the credentials in the order they are offered
    ///
    /// Bundled key first, then the user key, the ssh-agent, the password and
    /// finally a terminal prompt when neither a usable user key nor a
    /// password is available. A user key that fails to load is skipped with
    /// a warning.
    #[must_use]
    pub fn credentials(&self) -> Vec<Credential> {
        let mut credentials = Vec::new();

        match load_identity(&KeySource::Bundled, None, &self.user) {
            Ok(identity) => credentials.push(Credential::Identity(identity)),
            Err(e) => warn!(error = %e, "unable to load bundled key"),
        }

        let mut user_key = false;
        if let Some(source) = &self.key {
            match load_identity(source, self.passphrase.as_deref(), &self.user) {
                Ok(identity) => {
                    credentials.push(Credential::Identity(identity));
                    user_key = true;
                }
                Err(e) => warn!(key = %source, error = %e, "unable to read key, skipping it"),
            }
        }

        if self.use_agent {
            credentials.push(Credential::Agent);
        }

        if let Some(password) = &self.password {
            credentials.push(Credential::Password(password.clone()));
        } else if !user_key && self.interactive {
            credentials.push(Credential::Prompt);
        }

        debug!(
            user = %self.user,
            kinds = ?credentials.iter().map(Credential::kind).collect::<Vec<_>>(),
            "resolved credentials"
        );

        credentials
    }
}

fn load_identity(
    source: &KeySource,
    passphrase: Option<&str>,
    user: &str,
) -> Result<Identity, ExecError> {
    let material = source
        .read()
        .map_err(|e| ExecError::KeyParse(e.to_string()))?;
    let key = material
        .decode(passphrase)
        .map_err(|e| ExecError::KeyParse(e.to_string()))?;
    Ok(Identity::new(key, user, material.origin()))
}
