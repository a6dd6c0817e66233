//! Records pushed from the agent to a client under a subscription's sequence.

use serde::{Deserialize, Serialize};

use crate::member::Member;

/// One log line delivered by a log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRecord {
    /// Rendered log line.
    pub log: String,
}

/// One event delivered by an event stream, tagged by its `Event` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Event")]
pub enum EventRecord {
    /// Members joined the cluster.
    #[serde(rename = "member-join", rename_all = "PascalCase")]
    MemberJoin {
        /// Members affected by the event.
        members: Vec<Member>,
    },
    /// Members left the cluster.
    #[serde(rename = "member-leave", rename_all = "PascalCase")]
    MemberLeave {
        /// Members affected by the event.
        members: Vec<Member>,
    },
    /// Members were detected as failed.
    #[serde(rename = "member-failed", rename_all = "PascalCase")]
    MemberFailed {
        /// Members affected by the event.
        members: Vec<Member>,
    },
    /// Member metadata changed.
    #[serde(rename = "member-update", rename_all = "PascalCase")]
    MemberUpdate {
        /// Members affected by the event.
        members: Vec<Member>,
    },
    /// Members were reaped from the member list.
    #[serde(rename = "member-reap", rename_all = "PascalCase")]
    MemberReap {
        /// Members affected by the event.
        members: Vec<Member>,
    },
    /// A user event.
    #[serde(rename = "user", rename_all = "PascalCase")]
    User {
        /// Lamport time of the event.
        #[serde(rename = "LTime")]
        ltime: u64,
        /// Event name.
        name: String,
        /// Event payload.
        payload: Vec<u8>,
        /// Whether the event was eligible for coalescing.
        coalesce: bool,
    },
    /// A query awaiting a `respond` command.
    #[serde(rename = "query", rename_all = "PascalCase")]
    Query {
        /// Identifier to quote in the `respond` command.
        #[serde(rename = "ID")]
        id: u64,
        /// Lamport time of the query.
        #[serde(rename = "LTime")]
        ltime: u64,
        /// Query name.
        name: String,
        /// Query payload.
        payload: Vec<u8>,
    },
}

impl EventRecord {
    /// Returns the wire name of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MemberJoin { .. } => "member-join",
            Self::MemberLeave { .. } => "member-leave",
            Self::MemberFailed { .. } => "member-failed",
            Self::MemberUpdate { .. } => "member-update",
            Self::MemberReap { .. } => "member-reap",
            Self::User { .. } => "user",
            Self::Query { .. } => "query",
        }
    }
}

/// Progress kinds reported by a query stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRecordKind {
    /// A member acknowledged receipt.
    Ack,
    /// A member responded with a payload.
    Response,
    /// The query deadline passed; always the final record.
    Done,
}

/// One progress record delivered by a query stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryRecord {
    /// Record kind.
    #[serde(rename = "Type")]
    pub kind: QueryRecordKind,
    /// Member that produced the ack or response; empty for `done`.
    #[serde(default)]
    pub from: String,
    /// Response payload; empty for acks and `done`.
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl QueryRecord {
    /// Builds an ack record from `from`.
    #[must_use]
    pub fn ack(from: impl Into<String>) -> Self {
        Self {
            kind: QueryRecordKind::Ack,
            from: from.into(),
            payload: Vec::new(),
        }
    }

    /// Builds a response record from `from`.
    #[must_use]
    pub fn response(from: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: QueryRecordKind::Response,
            from: from.into(),
            payload,
        }
    }

    /// Builds the terminal `done` record.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            kind: QueryRecordKind::Done,
            from: String::new(),
            payload: Vec::new(),
        }
    }
}
