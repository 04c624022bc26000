//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection retry policy
///
/// The initial attempt is not counted: a policy with `attempts = N` makes at
/// most `N + 1` connection attempts and sleeps `delay` between adjacent ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    #[serde(default)]
    pub attempts: u32,
    /// Pause between attempts, in seconds when read from config
    #[serde(with = "duration_secs", default = "default_delay")]
    pub delay: Duration,
}

fn default_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay: default_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total number of attempts the policy allows
    #[must_use]
    pub fn max_tries(&self) -> u64 {
        u64::from(self.attempts) + 1
    }
}

/// Settings that would otherwise come from process-wide state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Terminator appended to the command script
    pub line_separator: String,
    /// Whether a terminal is attached for password prompts
    pub interactive: bool,
    /// Scan output for the legacy "Error executing command" text when no exit status arrives
    pub legacy_error_scan: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            line_separator: platform_line_separator().to_string(),
            interactive: false,
            legacy_error_scan: true,
        }
    }
}

impl EngineOptions {
    /// Set line separator
    #[must_use]
    pub fn with_line_separator(mut self, separator: impl Into<String>) -> Self {
        self.line_separator = separator.into();
        self
    }

    /// Mark the session as attached to a terminal
    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Enable or disable the legacy error text scan
    #[must_use]
    pub fn with_legacy_error_scan(mut self, enabled: bool) -> Self {
        self.legacy_error_scan = enabled;
        self
    }
}

/// Line separator of the host platform
#[must_use]
pub fn platform_line_separator() -> &'static str {
    if cfg!(windows) { "\r\n" } else { "\n" }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
