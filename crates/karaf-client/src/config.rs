//! Configuration file loading and types

use std::path::{Path, PathBuf};

use karaf_exec::{RetryPolicy, Target};
use serde::{Deserialize, Serialize};

/// Top-level configuration for karaf-client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote shell to connect to
    #[serde(default)]
    pub target: Target,
    /// Connection retry settings
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,
    /// Commands run before the script contents
    #[serde(default)]
    pub commands: Vec<String>,
    /// Script files with one command per line
    #[serde(default)]
    pub scripts: Vec<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Treat "Error executing command" as failure when no exit status arrives
    #[serde(default = "default_legacy_error_scan")]
    pub legacy_error_scan: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: Target::default(),
            retry: RetryPolicy::default(),
            auth: AuthConfig::default(),
            commands: Vec::new(),
            scripts: Vec::new(),
            log_level: default_log_level(),
            legacy_error_scan: default_legacy_error_scan(),
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Password offered after the keys; an empty string disables it
    #[serde(default = "default_password")]
    pub password: Option<String>,
    /// Path to a private key (PEM or OpenSSH encoding)
    pub key_file: Option<PathBuf>,
    /// Environment variable holding a base64-encoded private key
    pub key_env: Option<String>,
    /// Passphrase of an encrypted key
    pub key_passphrase: Option<String>,
    /// Also offer identities from a running ssh-agent
    #[serde(default)]
    pub agent: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: default_password(),
            key_file: None,
            key_env: None,
            key_passphrase: None,
            agent: false,
        }
    }
}

/// Password of the stock Karaf `karaf` user
fn default_password() -> Option<String> {
    Some("karaf".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_legacy_error_scan() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// Returns the path the configuration came from, if any.
    pub fn load_default() -> eyre::Result<(Self, Option<PathBuf>)> {
        // Check environment variable
        if let Ok(path) = std::env::var("KARAF_CLIENT_CONFIG") {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        // Try common paths
        let mut paths = vec![PathBuf::from("karaf-client.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("karaf-client/karaf-client.toml"));
        }

        for path in paths {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }
}
