//! Request and response headers.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Header preceding every client request.
///
/// The command is kept as text so that an unrecognised name can still be
/// answered with [`ProtocolError::UnsupportedCommand`] instead of failing the
/// decode and tearing the connection down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestHeader {
    /// Command name, for example `members` or `force-leave`.
    pub command: String,
    /// Caller-chosen correlation and subscription identifier.
    pub seq: u64,
}

impl RequestHeader {
    /// Builds a header for `command` tagged with `seq`.
    #[must_use]
    pub fn new(command: impl Into<String>, seq: u64) -> Self {
        Self {
            command: command.into(),
            seq,
        }
    }
}

/// Header preceding every agent response and pushed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseHeader {
    /// Sequence echoed from the originating request.
    pub seq: u64,
    /// Error message; empty means success.
    #[serde(default)]
    pub error: String,
}

impl ResponseHeader {
    /// Builds a successful header for `seq`.
    #[must_use]
    pub const fn ok(seq: u64) -> Self {
        Self {
            seq,
            error: String::new(),
        }
    }

    /// Builds a failed header carrying the display text of `error`.
    #[must_use]
    pub fn failed(seq: u64, error: &impl ToString) -> Self {
        Self {
            seq,
            error: error.to_string(),
        }
    }

    /// Builds a header from an outcome, stringifying the error side.
    #[must_use]
    pub fn from_outcome<E: ToString>(seq: u64, outcome: &Result<(), E>) -> Self {
        match outcome {
            Ok(()) => Self::ok(seq),
            Err(error) => Self::failed(seq, error),
        }
    }

    /// Returns true when the error field is empty.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    /// Returns the sentinel kind when the error text matches one exactly.
    #[must_use]
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        ProtocolError::from_wire(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_error_text() {
        let failed: Result<(), ProtocolError> = Err(ProtocolError::HandshakeRequired);
        let header = ResponseHeader::from_outcome(9, &failed);
        assert_eq!(header.seq, 9);
        assert_eq!(header.error, "Handshake required");
        assert_eq!(
            header.protocol_error(),
            Some(ProtocolError::HandshakeRequired)
        );
    }

    #[test]
    fn ok_header_has_no_error() {
        let header = ResponseHeader::ok(3);
        assert!(header.is_ok());
        assert_eq!(header.protocol_error(), None);
    }
}
