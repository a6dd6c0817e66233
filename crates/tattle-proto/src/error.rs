//! In-band protocol error kinds.
//!
//! Errors travel as plain strings in [`crate::ResponseHeader::error`]; clients
//! branch on exact matches. Internally they are a closed set of kinds and are
//! only turned into text when a header is serialised.

use thiserror::Error;

/// Protocol violations and sentinel conditions reported in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The header named a command the agent does not know.
    #[error("Unsupported command")]
    UnsupportedCommand,
    /// The handshake asked for a version outside the supported range.
    #[error("Unsupported IPC version")]
    UnsupportedVersion,
    /// A second handshake arrived on a session that already negotiated.
    #[error("Handshake already performed")]
    DuplicateHandshake,
    /// A command arrived before the handshake.
    #[error("Handshake required")]
    HandshakeRequired,
    /// The session already owns a log stream.
    #[error("Monitor already exists")]
    MonitorExists,
    /// The event filter expression could not be parsed.
    #[error("Invalid event filter")]
    InvalidFilter,
    /// An event stream is already registered under the request's sequence.
    #[error("Stream with given sequence exists")]
    StreamExists,
    /// A `respond` named a query that is unknown or already expired.
    #[error("No pending query with given ID")]
    InvalidQueryId,
    /// A `monitor` asked for a log level outside the known set.
    #[error("Unknown log level")]
    UnknownLogLevel,
}

impl ProtocolError {
    const ALL: [Self; 9] = [
        Self::UnsupportedCommand,
        Self::UnsupportedVersion,
        Self::DuplicateHandshake,
        Self::HandshakeRequired,
        Self::MonitorExists,
        Self::InvalidFilter,
        Self::StreamExists,
        Self::InvalidQueryId,
        Self::UnknownLogLevel,
    ];

    /// Recognises a sentinel string received in a response header.
    #[must_use]
    pub fn from_wire(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string() == text)
    }
}

/// Raised when a header names a command outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command '{name}'")]
pub struct UnknownCommand {
    /// The unrecognised command name.
    pub name: String,
}
