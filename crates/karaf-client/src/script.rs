//! Command script files

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use eyre::WrapErr;

/// Read commands from `path`, one per line, skipping blank lines
///
/// # Errors
/// Returns error if the file cannot be opened or read
pub fn read_script(path: &Path) -> eyre::Result<Vec<String>> {
    let file = File::open(path)
        .wrap_err_with(|| format!("failed to open script {}", path.display()))?;

    let mut commands = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.wrap_err_with(|| format!("failed to read script {}", path.display()))?;
        let line = line.trim();
        if !line.is_empty() {
            commands.push(line.to_string());
        }
    }

    Ok(commands)
}

/// Explicit commands followed by the contents of every script, in order
///
/// # Errors
/// Returns the first script read failure
pub fn collect_commands(commands: Vec<String>, scripts: &[PathBuf]) -> eyre::Result<Vec<String>> {
    let mut all = commands;
    for script in scripts {
        all.extend(read_script(script)?);
    }
    Ok(all)
}
