//! Command-line arguments and their merge with the configuration file

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use karaf_exec::{CredentialProvider, KeySource, RetryPolicy, Target};

use crate::config::Config;

/// Run shell commands on a remote Karaf console over SSH
#[derive(Parser, Debug, Default)]
#[command(name = "karaf-client", version, about, long_about = None)]
pub struct Cli {
    /// Commands to run, in order
    pub commands: Vec<String>,

    /// Configuration file (defaults to ./karaf-client.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server host
    #[arg(long, env = "KARAF_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, env = "KARAF_PORT")]
    pub port: Option<u16>,

    /// User name
    #[arg(short, long, env = "KARAF_USER")]
    pub user: Option<String>,

    /// User password (defaults to "karaf")
    #[arg(long, env = "KARAF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Offer no password, overriding any configured one; a terminal prompt
    /// is used instead
    #[arg(long)]
    pub no_password: bool,

    /// Private key file (PEM or OpenSSH encoding)
    #[arg(short, long)]
    pub key_file: Option<PathBuf>,

    /// Environment variable holding a base64-encoded private key
    #[arg(long, conflicts_with = "key_file")]
    pub key_env: Option<String>,

    /// Passphrase of an encrypted key
    #[arg(long, env = "KARAF_KEY_PASSPHRASE", hide_env_values = true)]
    pub key_passphrase: Option<String>,

    /// Also offer identities from a running ssh-agent
    #[arg(long)]
    pub agent: bool,

    /// Retry connection establishment up to this many times
    #[arg(short, long)]
    pub attempts: Option<u32>,

    /// Delay between connection attempts, in seconds
    #[arg(short, long)]
    pub delay: Option<u64>,

    /// Script files with one command per line
    #[arg(short, long = "script")]
    pub scripts: Vec<PathBuf>,

    /// Skip execution
    #[arg(long)]
    pub skip: bool,

    /// Do not treat "Error executing command" output as failure
    #[arg(long)]
    pub no_legacy_error_scan: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Effective settings after command-line overrides
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: Target,
    pub retry: RetryPolicy,
    pub password: Option<String>,
    pub key: Option<KeySource>,
    pub key_passphrase: Option<String>,
    pub agent: bool,
    pub commands: Vec<String>,
    pub scripts: Vec<PathBuf>,
    pub skip: bool,
    pub legacy_error_scan: bool,
    pub log_level: String,
}

impl Settings {
    /// Overlay `cli` on top of `config`
    ///
    /// Scalars given on the command line win; command and script lists are
    /// appended to the configured ones.
    pub fn resolve(cli: Cli, config: Config) -> Self {
        let target = Target {
            host: cli.host.unwrap_or(config.target.host),
            port: cli.port.unwrap_or(config.target.port),
            user: cli.user.unwrap_or(config.target.user),
        };

        let retry = RetryPolicy {
            attempts: cli.attempts.unwrap_or(config.retry.attempts),
            delay: cli.delay.map_or(config.retry.delay, Duration::from_secs),
        };

        let key = match (cli.key_file, cli.key_env) {
            (Some(path), _) => Some(KeySource::Path(path)),
            (None, Some(var)) => Some(KeySource::Env(var)),
            (None, None) => config
                .auth
                .key_file
                .map(KeySource::Path)
                .or(config.auth.key_env.map(KeySource::Env)),
        };

        let mut commands = config.commands;
        commands.extend(cli.commands);
        let mut scripts = config.scripts;
        scripts.extend(cli.scripts);

        let password = if cli.no_password {
            None
        } else {
            cli.password
                .or(config.auth.password)
                .filter(|password| !password.is_empty())
        };

        Self {
            target,
            retry,
            password,
            key,
            key_passphrase: cli.key_passphrase.or(config.auth.key_passphrase),
            agent: cli.agent || config.auth.agent,
            commands,
            scripts,
            skip: cli.skip,
            legacy_error_scan: config.legacy_error_scan && !cli.no_legacy_error_scan,
            log_level: cli.log_level.unwrap_or(config.log_level),
        }
    }

    /// Credential provider for the configured user
    pub fn credential_provider(&self) -> CredentialProvider {
        let mut provider = CredentialProvider::new(&self.target.user).with_agent(self.agent);
        if let Some(key) = &self.key {
            provider = provider.with_key(key.clone(), self.key_passphrase.clone());
        }
        if let Some(password) = &self.password {
            provider = provider.with_password(password.clone());
        }
        provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("karaf-client").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(parse(&[]), Config::default());
        assert_eq!(settings.target, Target::default());
        assert_eq!(settings.retry, RetryPolicy::default());
        assert!(settings.key.is_none());
        assert_eq!(settings.password.as_deref(), Some("karaf"));
        assert!(settings.legacy_error_scan);
        assert!(!settings.skip);
    }

    #[test]
    fn test_password_can_be_unset() {
        let settings = Settings::resolve(parse(&["--no-password"]), Config::default());
        assert!(settings.password.is_none());

        let mut config = Config::default();
        config.auth.password = Some(String::new());
        let settings = Settings::resolve(parse(&[]), config);
        assert!(settings.password.is_none());

        let settings = Settings::resolve(parse(&["--password", "admin"]), Config::default());
        assert_eq!(settings.password.as_deref(), Some("admin"));

        let settings = Settings::resolve(
            parse(&["--password", "admin", "--no-password"]),
            Config::default(),
        );
        assert!(settings.password.is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        config.target.host = "from-file".to_string();
        config.target.port = 9000;
        config.retry.attempts = 1;
        config.commands = vec!["feature:list".to_string()];

        let cli = parse(&[
            "--host",
            "from-cli",
            "--attempts",
            "5",
            "--delay",
            "1",
            "--no-legacy-error-scan",
            "bundle:list",
        ]);
        let settings = Settings::resolve(cli, config);

        assert_eq!(settings.target.host, "from-cli");
        assert_eq!(settings.target.port, 9000);
        assert_eq!(settings.retry, RetryPolicy::new(5, Duration::from_secs(1)));
        assert_eq!(settings.commands, vec!["feature:list", "bundle:list"]);
        assert!(!settings.legacy_error_scan);
    }

    #[test]
    fn test_key_sources() {
        let settings = Settings::resolve(parse(&["-k", "/tmp/id_rsa"]), Config::default());
        assert_eq!(settings.key, Some(KeySource::Path(PathBuf::from("/tmp/id_rsa"))));

        let settings = Settings::resolve(parse(&["--key-env", "KARAF_KEY"]), Config::default());
        assert_eq!(settings.key, Some(KeySource::Env("KARAF_KEY".to_string())));

        assert!(Cli::try_parse_from(["karaf-client", "-k", "a", "--key-env", "B"]).is_err());
    }

    #[test]
    fn test_scripts_accumulate() {
        let cli = parse(&["-s", "one.karaf", "--script", "two.karaf"]);
        let settings = Settings::resolve(cli, Config::default());
        assert_eq!(
            settings.scripts,
            vec![PathBuf::from("one.karaf"), PathBuf::from("two.karaf")]
        );
    }
}
