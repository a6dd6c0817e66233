//! The membership engine seam and the member snapshot it exposes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use thiserror::Error;

/// Liveness of a member as judged by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberStatus {
    /// Status not yet known.
    None,
    /// Responding to probes.
    Alive,
    /// Announced an intent to leave.
    Leaving,
    /// Left gracefully or was forced out.
    Left,
    /// Stopped responding.
    Failed,
}

impl MemberStatus {
    /// Text used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Alive => "alive",
            Self::Leaving => "leaving",
            Self::Left => "left",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Supported and active versions of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Oldest supported version.
    pub min: u8,
    /// Newest supported version.
    pub max: u8,
    /// Version currently spoken.
    pub cur: u8,
}

impl VersionRange {
    /// A range pinned to a single version.
    #[must_use]
    pub const fn exactly(version: u8) -> Self {
        Self {
            min: version,
            max: version,
            cur: version,
        }
    }
}

/// Read-only member snapshot owned by the membership engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Unique member name.
    pub name: String,
    /// Gossip address.
    pub addr: IpAddr,
    /// Gossip port.
    pub port: u16,
    /// Member tags.
    pub tags: BTreeMap<String, String>,
    /// Current liveness.
    pub status: MemberStatus,
    /// Gossip protocol versions.
    pub protocol: VersionRange,
    /// Delegate protocol versions.
    pub delegate: VersionRange,
}

/// Delivery constraints for a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// Only members with these names receive the query; empty means all.
    pub filter_nodes: Vec<String>,
    /// Only members whose tags match these regular expressions receive it.
    pub filter_tags: BTreeMap<String, String>,
    /// Whether recipients acknowledge receipt.
    pub request_ack: bool,
    /// Deadline override; `None` selects the engine default.
    pub timeout: Option<Duration>,
}

/// A response to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResponse {
    /// Responding member.
    pub from: String,
    /// Response payload.
    pub payload: Vec<u8>,
}

/// Live progress of an issued query.
///
/// The engine closes both channels once the query expires; consumers must
/// still rely on [`QueryHandle::deadline`] to decide when the query is done.
#[derive(Debug)]
pub struct QueryHandle {
    acks: Receiver<String>,
    responses: Receiver<NodeResponse>,
    deadline: Instant,
}

impl QueryHandle {
    /// Bundles the channels the engine feeds with the query deadline.
    #[must_use]
    pub const fn new(
        acks: Receiver<String>,
        responses: Receiver<NodeResponse>,
        deadline: Instant,
    ) -> Self {
        Self {
            acks,
            responses,
            deadline,
        }
    }

    /// Names of members acknowledging receipt.
    #[must_use]
    pub const fn ack_rx(&self) -> &Receiver<String> {
        &self.acks
    }

    /// Responses in arrival order.
    #[must_use]
    pub const fn response_rx(&self) -> &Receiver<NodeResponse> {
        &self.responses
    }

    /// Instant after which no further progress is reported.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Cluster operations the RPC layer invokes on behalf of clients.
///
/// Implementations must be safe to call from many session threads at once
/// and must never call back into a session synchronously.
pub trait MembershipEngine: Send + Sync {
    /// Contacts existing members; returns how many were reached.
    ///
    /// # Errors
    ///
    /// Fails when no address could be contacted.
    fn join(&self, addresses: &[String], replay: bool) -> Result<usize, EngineError>;

    /// Leaves the cluster gracefully.
    ///
    /// # Errors
    ///
    /// Fails when the leave intent cannot be broadcast.
    fn leave(&self) -> Result<(), EngineError>;

    /// Forces a failed member into the left state.
    ///
    /// # Errors
    ///
    /// Fails when the member is unknown.
    fn force_leave(&self, node: &str) -> Result<(), EngineError>;

    /// Snapshot of the member list.
    fn members(&self) -> Vec<Member>;

    /// Broadcasts a user event.
    ///
    /// # Errors
    ///
    /// Fails when the event is too large or the local member has left.
    fn user_event(&self, name: &str, payload: &[u8], coalesce: bool) -> Result<(), EngineError>;

    /// Issues a query and returns a handle tracking its progress.
    ///
    /// # Errors
    ///
    /// Fails when the query is too large or a filter is invalid.
    fn query(
        &self,
        name: &str,
        payload: &[u8],
        params: QueryParams,
    ) -> Result<QueryHandle, EngineError>;

    /// Answers a query previously delivered to the local member.
    ///
    /// # Errors
    ///
    /// Fails when the query is unknown or has expired.
    fn respond(&self, id: u64, payload: &[u8]) -> Result<(), EngineError>;
}

/// Failures reported by the membership engine.
///
/// The RPC layer forwards the display text verbatim in response headers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No address in a join request could be contacted.
    #[error("failed to join any of {attempted} address(es): {reason}")]
    JoinFailed {
        /// Number of addresses tried.
        attempted: usize,
        /// Failure of the last address tried.
        reason: String,
    },
    /// The named member is not in the member list.
    #[error("unknown member '{name}'")]
    UnknownMember {
        /// Requested member name.
        name: String,
    },
    /// The query is unknown or its deadline has passed.
    #[error("No pending query with given ID")]
    UnknownQuery {
        /// Requested query identifier.
        id: u64,
    },
    /// A tag filter was not a valid regular expression.
    #[error("invalid tag filter for '{tag}': {source}")]
    InvalidTagFilter {
        /// Tag the filter applies to.
        tag: String,
        /// Regex compile error.
        #[source]
        source: regex::Error,
    },
    /// Name and payload together exceed the engine's size limit.
    #[error("{kind} exceeds size limit: {size} > {limit} bytes")]
    TooLarge {
        /// `user event` or `query`.
        kind: &'static str,
        /// Encoded size.
        size: usize,
        /// Limit enforced.
        limit: usize,
    },
    /// The local member has already left the cluster.
    #[error("local member has left the cluster")]
    Left,
}
