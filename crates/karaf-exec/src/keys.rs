//! SSH key material sources and decoding

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use russh::keys::{PrivateKey, decode_secret_key};
use tracing::{debug, warn};

/// Private key shipped with the client, authorized by cooperating default servers
const BUNDLED_KEY: &str = include_str!("../resources/karaf.key");

/// Where private key material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Key compiled into the client
    Bundled,
    /// Explicit path to key file
    Path(PathBuf),
    /// Base64-encoded key from environment
    Env(String),
}

impl KeySource {
    /// Read the raw key text
    ///
    /// # Errors
    /// Returns `KeyError` if the file is missing, the variable is unset or the
    /// content is not valid base64 / UTF-8
    pub fn read(&self) -> Result<KeyMaterial, KeyError> {
        let text = match self {
            KeySource::Bundled => BUNDLED_KEY.to_string(),
            KeySource::Path(path) => {
                if !path.exists() {
                    return Err(KeyError::NotFound(path.display().to_string()));
                }
                check_key_permissions(path);
                std::fs::read_to_string(path)?
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;
                String::from_utf8(key_data).map_err(|_| KeyError::NotText)?
            }
        };

        debug!(source = %self, "read key material");

        Ok(KeyMaterial {
            text,
            origin: self.to_string(),
        })
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Bundled => f.write_str("bundled key"),
            KeySource::Path(path) => write!(f, "{}", path.display()),
            KeySource::Env(var) => write!(f, "${var}"),
        }
    }
}

/// Undecoded private key text (PEM or OpenSSH encoding)
#[derive(Clone)]
pub struct KeyMaterial {
    text: String,
    origin: String,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Wrap key text from an arbitrary origin
    pub fn new(text: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: origin.into(),
        }
    }

    /// Human-readable origin (path, variable or "bundled key")
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Decode the key, unlocking it with `passphrase` when encrypted
    ///
    /// # Errors
    /// Returns `KeyError::Decode` if the encoding is unsupported or the passphrase is wrong
    pub fn decode(&self, passphrase: Option<&str>) -> Result<PrivateKey, KeyError> {
        decode_secret_key(&self.text, passphrase)
            .map_err(|e| KeyError::Decode(format!("{}: {e}", self.origin)))
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("decoded key is not text")]
    NotText,

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("unable to decode key {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

#[cfg(unix)]
fn check_key_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        return;
    };

    // group and other bits
    if metadata.permissions().mode() & 0o77 != 0 {
        warn!(path = %path.display(), "key file permissions too open (should be 600)");
    }
}

#[cfg(not(unix))]
fn check_key_permissions(_path: &Path) {}
