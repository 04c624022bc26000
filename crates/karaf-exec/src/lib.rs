//! karaf-exec: Remote shell command execution
//!
//! Connects to a remote shell over SSH (retrying transient failures),
//! authenticates with the bundled key, a user key, an ssh-agent or a
//! password, runs a command script on one channel and decides success or
//! failure from the exit status and the shell's in-band error markers.

pub mod classify;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod executor;
pub mod keys;
pub mod result;
pub mod ssh;
pub mod traits;

pub use classify::{MarkerClassifier, OutcomeClassifier};
pub use config::{EngineOptions, RetryPolicy};
pub use credentials::{Credential, CredentialProvider, PasswordPrompt};
pub use engine::{Engine, EngineBuilder};
pub use error::ExecError;
pub use executor::{OutputSinks, SharedBuffer};
pub use keys::KeySource;
pub use result::{CommandResult, ExecutionOutcome, Target};
pub use traits::{RemoteSession, Transport};
