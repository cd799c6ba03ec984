//! Severity levels shared by records and transports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered severity, most severe first.
///
/// A record is "at or above" a threshold when it is at least as severe,
/// i.e. `record <= threshold` under this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
    Verbose,
    Debug,
    Silly,
}

impl Level {
    /// Whether a record at this level should reach a sink whose minimum
    /// level is `threshold`.
    pub fn passes(self, threshold: Level) -> bool {
        self <= threshold
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Verbose => "verbose",
            Level::Debug => "debug",
            Level::Silly => "silly",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name is not recognised.
#[derive(Debug, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Level::Error),
            "warn" | "warning" => Ok(Level::Warn),
            "info" => Ok(Level::Info),
            "verbose" => Ok(Level::Verbose),
            "debug" => Ok(Level::Debug),
            "silly" | "trace" => Ok(Level::Silly),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::TRACE => Level::Silly,
        }
    }
}
