//! Success/failure decision from captured output
//!
//! The remote shell highlights errors in red, so a failed command's message
//! sits between the red-foreground escape and the default-foreground escape
//! in stdout. Some shell versions also drop the exit status on internal
//! command errors; for those the literal [`LEGACY_ERROR_TEXT`] is the only
//! failure signal.

use crate::result::{CommandResult, ExecutionOutcome};

/// `ESC[31m`, red foreground
pub const ERROR_MARKER: &str = "\x1b[31m";

/// `ESC[39m`, default foreground
pub const DEFAULT_MARKER: &str = "\x1b[39m";

/// Printed by older remote shells on command errors that exit without a status
pub const LEGACY_ERROR_TEXT: &str = "Error executing command";

/// Decides the outcome of a remote execution
pub trait OutcomeClassifier: Send + Sync {
    fn classify(&self, result: &CommandResult) -> ExecutionOutcome;
}

/// Classifier driven by exit status and in-band color markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerClassifier {
    legacy_scan: bool,
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self { legacy_scan: true }
    }
}

impl MarkerClassifier {
    #[must_use]
    pub fn new(legacy_scan: bool) -> Self {
        Self { legacy_scan }
    }
}

impl OutcomeClassifier for MarkerClassifier {
    fn classify(&self, result: &CommandResult) -> ExecutionOutcome {
        let stdout = result.stdout_lossy();

        match result.exit_status {
            Some(0) => ExecutionOutcome::Success,
            Some(_) => ExecutionOutcome::failure(extract_error_message(&stdout)),
            None if self.legacy_scan => match legacy_error_message(&stdout) {
                Some(message) => ExecutionOutcome::failure(message),
                None => ExecutionOutcome::Success,
            },
            None => ExecutionOutcome::Success,
        }
    }
}

/// Text between the first error marker and the last default marker after it
///
/// A missing start marker means "from the beginning", a missing end marker
/// "to the end"; output without markers is returned unchanged.
#[must_use]
pub fn extract_error_message(stdout: &str) -> &str {
    let start = stdout
        .find(ERROR_MARKER)
        .map_or(0, |idx| idx + ERROR_MARKER.len());
    let rest = &stdout[start..];
    let end = rest.rfind(DEFAULT_MARKER).unwrap_or(rest.len());
    &rest[..end]
}

/// Rest of the line following [`LEGACY_ERROR_TEXT`], if present
#[must_use]
pub fn legacy_error_message(stdout: &str) -> Option<String> {
    let idx = stdout.find(LEGACY_ERROR_TEXT)?;
    let after = &stdout[idx + LEGACY_ERROR_TEXT.len()..];
    let line = after.lines().next().unwrap_or_default();
    let detail = line.trim_start_matches(':').trim();

    if detail.is_empty() {
        Some(LEGACY_ERROR_TEXT.to_string())
    } else {
        Some(detail.to_string())
    }
}
