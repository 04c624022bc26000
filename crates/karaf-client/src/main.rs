//! karaf-client
//!
//! Runs shell commands on a remote Karaf console and fails when they fail,
//! for use as a build step.

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use eyre::eyre;
use karaf_exec::ssh::SshTransport;
use karaf_exec::{Engine, EngineOptions, ExecError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod script;

use cli::{Cli, Settings};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();
    let (config, config_path) = match &cli.config {
        Some(path) => (Config::load(path)?, Some(path.clone())),
        None => Config::load_default()?,
    };
    let settings = Settings::resolve(cli, config);

    init_tracing(&settings.log_level);
    match &config_path {
        Some(path) => debug!(path = %path.display(), "loaded configuration"),
        None => debug!("no config file found, using defaults"),
    }

    if settings.skip {
        info!("execution is skipped");
        return Ok(());
    }

    let commands = script::collect_commands(settings.commands.clone(), &settings.scripts)?;
    if commands.is_empty() {
        warn!("no command was specified");
        return Ok(());
    }

    let interactive = std::io::stdin().is_terminal();
    if interactive {
        eprintln!("Logging in as {}", settings.target.user);
    }

    let options = EngineOptions::default()
        .with_interactive(interactive)
        .with_legacy_error_scan(settings.legacy_error_scan);

    // server banner goes to the terminal like the login line
    let transport = SshTransport::new().with_banner(interactive);
    let mut engine = Engine::builder(Arc::new(transport), settings.credential_provider())
        .retry(settings.retry)
        .options(options)
        .build();

    engine
        .run(&settings.target, &commands)
        .await
        .map_err(|e| match e {
            ExecError::CommandFailed { message, .. } => eyre!("remote command failed:\n{message}"),
            other => eyre!(other),
        })?;

    Ok(())
}

/// Log to stderr so echoed remote output owns stdout
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
