//! Wire types and framing for the tattle RPC protocol.
//!
//! Both the agent and its clients depend on this crate so that the two sides
//! agree on header layouts, command names, request bodies, push records, and
//! the exact sentinel error strings exchanged in response headers.
//!
//! Every unit on the wire is a CBOR-encoded header, optionally followed by a
//! CBOR-encoded body:
//!
//! ```text
//! client -> agent   {Command, Seq} [body]
//! agent  -> client  {Seq, Error}   [body]
//! ```
//!
//! The sequence number is chosen by the client. For streaming commands it also
//! names the resulting subscription, and every pushed record echoes it.

mod codec;
mod command;
mod error;
mod header;
mod member;
mod records;

pub use codec::{CodecError, FrameReader, FrameWriter};
pub use command::{
    Command, EventRequest, ForceLeaveRequest, HandshakeRequest, JoinRequest, JoinResponse,
    MembersResponse, MonitorRequest, QueryRequest, RequestBody, RespondRequest, StopRequest,
    StreamRequest,
};
pub use error::{ProtocolError, UnknownCommand};
pub use header::{RequestHeader, ResponseHeader};
pub use member::Member;
pub use records::{EventRecord, LogRecord, QueryRecord, QueryRecordKind};

/// Lowest protocol version the agent accepts during the handshake.
pub const MIN_IPC_VERSION: i32 = 1;

/// Highest protocol version the agent accepts during the handshake.
pub const MAX_IPC_VERSION: i32 = 1;

/// Returns true when `version` falls inside the supported range.
#[must_use]
pub const fn is_supported_version(version: i32) -> bool {
    version >= MIN_IPC_VERSION && version <= MAX_IPC_VERSION
}
