//! Command names and their typed request and response bodies.
//!
//! Each command owns at most one body type. The agent resolves the command
//! name first and only then decodes the body directly into the matching
//! [`RequestBody`] variant, so unknown commands are rejected before any body
//! bytes are interpreted.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::UnknownCommand;
use crate::member::Member;

/// Commands understood by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Negotiates the protocol version; must be the first request.
    Handshake,
    /// Fires a user event into the cluster.
    Event,
    /// Forces a failed member into the left state.
    ForceLeave,
    /// Joins one or more existing cluster addresses.
    Join,
    /// Returns a snapshot of the member list.
    Members,
    /// Opens an event stream filtered by event type.
    Stream,
    /// Cancels a log or event stream by sequence.
    Stop,
    /// Opens a log stream at a minimum level.
    Monitor,
    /// Leaves the cluster gracefully and shuts the agent down.
    Leave,
    /// Issues a cluster query and streams its acks and responses.
    Query,
    /// Answers a query event received over an event stream.
    Respond,
}

impl Command {
    /// Every command in wire order.
    pub const ALL: [Self; 11] = [
        Self::Handshake,
        Self::Event,
        Self::ForceLeave,
        Self::Join,
        Self::Members,
        Self::Stream,
        Self::Stop,
        Self::Monitor,
        Self::Leave,
        Self::Query,
        Self::Respond,
    ];

    /// Returns the wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Event => "event",
            Self::ForceLeave => "force-leave",
            Self::Join => "join",
            Self::Members => "members",
            Self::Stream => "stream",
            Self::Stop => "stop",
            Self::Monitor => "monitor",
            Self::Leave => "leave",
            Self::Query => "query",
            Self::Respond => "respond",
        }
    }

    /// Returns true when a request for this command carries a body.
    #[must_use]
    pub const fn has_request_body(self) -> bool {
        !matches!(self, Self::Members | Self::Leave)
    }

    /// Returns true when a successful response carries a body.
    #[must_use]
    pub const fn has_response_body(self) -> bool {
        matches!(self, Self::Join | Self::Members)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == name)
            .ok_or_else(|| UnknownCommand {
                name: name.to_owned(),
            })
    }
}

/// Body of a `handshake` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeRequest {
    /// Protocol version proposed by the client.
    pub version: i32,
}

/// Body of an `event` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRequest {
    /// User event name.
    pub name: String,
    /// Opaque event payload.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Whether the event bus may coalesce repeats of this name.
    #[serde(default)]
    pub coalesce: bool,
}

/// Body of a `force-leave` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForceLeaveRequest {
    /// Name of the member to force out.
    pub node: String,
}

/// Body of a `join` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    /// Addresses of existing cluster members.
    pub existing: Vec<String>,
    /// Whether historical user events should be replayed after joining.
    #[serde(default)]
    pub replay: bool,
}

/// Body of a successful `join` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    /// Number of addresses successfully contacted.
    pub num: u32,
}

/// Body of a `members` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MembersResponse {
    /// Point-in-time member snapshot.
    pub members: Vec<Member>,
}

/// Body of a `stream` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRequest {
    /// Event filter expression, for example `member-join,user:deploy`.
    #[serde(rename = "Type")]
    pub filter: String,
}

/// Body of a `stop` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopRequest {
    /// Sequence of the subscription to cancel.
    pub stop: u64,
}

/// Body of a `monitor` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorRequest {
    /// Minimum log level, for example `INFO`.
    pub log_level: String,
}

/// Body of a `query` request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryRequest {
    /// Restricts delivery to members with these names.
    #[serde(default)]
    pub filter_nodes: Vec<String>,
    /// Restricts delivery to members whose tags match these patterns.
    #[serde(default)]
    pub filter_tags: BTreeMap<String, String>,
    /// Whether recipients should acknowledge receipt.
    #[serde(default)]
    pub request_ack: bool,
    /// Query deadline in nanoseconds; zero selects the agent default.
    #[serde(default)]
    pub timeout: u64,
    /// Query name.
    pub name: String,
    /// Opaque query payload.
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Body of a `respond` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RespondRequest {
    /// Identifier of the query event being answered.
    #[serde(rename = "ID")]
    pub id: u64,
    /// Response payload.
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// A request body decoded directly into the type its command names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// `handshake` body.
    Handshake(HandshakeRequest),
    /// `event` body.
    Event(EventRequest),
    /// `force-leave` body.
    ForceLeave(ForceLeaveRequest),
    /// `join` body.
    Join(JoinRequest),
    /// `members` carries no body.
    Members,
    /// `stream` body.
    Stream(StreamRequest),
    /// `stop` body.
    Stop(StopRequest),
    /// `monitor` body.
    Monitor(MonitorRequest),
    /// `leave` carries no body.
    Leave,
    /// `query` body.
    Query(QueryRequest),
    /// `respond` body.
    Respond(RespondRequest),
}

impl RequestBody {
    /// Returns the command this body belongs to.
    #[must_use]
    pub const fn command(&self) -> Command {
        match self {
            Self::Handshake(_) => Command::Handshake,
            Self::Event(_) => Command::Event,
            Self::ForceLeave(_) => Command::ForceLeave,
            Self::Join(_) => Command::Join,
            Self::Members => Command::Members,
            Self::Stream(_) => Command::Stream,
            Self::Stop(_) => Command::Stop,
            Self::Monitor(_) => Command::Monitor,
            Self::Leave => Command::Leave,
            Self::Query(_) => Command::Query,
            Self::Respond(_) => Command::Respond,
        }
    }
}
