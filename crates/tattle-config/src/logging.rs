//! Logging vocabulary shared by the agent and the CLI.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output format of the agent's own diagnostics.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    #[default]
    Json,
    /// Human-readable single line output.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Ordered severities understood by `monitor` subscriptions.
///
/// Log lines carry their level as a bracketed tag (`[WARN]`); a subscription
/// receives every line at or above its minimum level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
    /// Finest-grained tracing output.
    #[strum(serialize = "TRACE")]
    Trace,
    /// Debugging detail.
    #[strum(serialize = "DEBUG")]
    Debug,
    /// Routine operational messages.
    #[strum(serialize = "INFO")]
    Info,
    /// Recoverable problems.
    #[strum(serialize = "WARN")]
    Warn,
    /// Failures; `ERROR` is accepted as an alias.
    #[strum(to_string = "ERR", serialize = "ERROR")]
    Err,
}

impl LogLevel {
    /// Tag written between brackets at the start of a rendered line.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Err => "ERR",
        }
    }

    /// Extracts the level from a line rendered as `[LEVEL] ...`.
    ///
    /// Returns `None` when the line carries no recognised tag.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let rest = line.trim_start().strip_prefix('[')?;
        let (tag, _) = rest.split_once(']')?;
        tag.parse().ok()
    }
}
