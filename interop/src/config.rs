//! Configuration consumed by the interop core.
//!
//! The binary deserializes these from the `[interop]` and `[engine]` tables of
//! its config file.

use serde::Deserialize;
use std::time::Duration;

/// Dispatcher-wide settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteropConfig {
    /// Timeout for calls that do not set their own, in milliseconds.
    /// Default: none (calls wait until completed or canceled).
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Report full error chains for failed inbound calls instead of the
    /// generic message. Default: false.
    #[serde(default)]
    pub detailed_errors: bool,
}

impl InteropConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}

/// The script engine process to spawn.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Executable command (e.g. "node").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
}

impl EngineConfig {
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}
