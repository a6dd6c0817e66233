//! Wire representation of a cluster member.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Member snapshot as serialised in `members` responses and member events.
///
/// The address travels as raw octets (four for IPv4, sixteen for IPv6) so the
/// record stays independent of any textual address format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    /// Unique member name.
    pub name: String,
    /// Address octets.
    pub addr: Vec<u8>,
    /// Gossip port.
    pub port: u16,
    /// Member tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Status text: `alive`, `leaving`, `left`, `failed`, or `none`.
    pub status: String,
    /// Minimum supported gossip protocol version.
    pub protocol_min: u8,
    /// Maximum supported gossip protocol version.
    pub protocol_max: u8,
    /// Gossip protocol version currently spoken.
    pub protocol_cur: u8,
    /// Minimum supported delegate protocol version.
    pub delegate_min: u8,
    /// Maximum supported delegate protocol version.
    pub delegate_max: u8,
    /// Delegate protocol version currently spoken.
    pub delegate_cur: u8,
}
