//! In-process membership engine used when no gossip transport is attached.
//!
//! It keeps a member list, Lamport clocks for user events and queries, and
//! the table of pending queries the `respond` command routes into. Joined
//! addresses are recorded as alive members without any network contact.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use regex::Regex;
use tracing::{debug, info, warn};

use super::AGENT_TARGET;
use super::engine::{
    EngineError, Member, MemberStatus, MembershipEngine, NodeResponse, QueryHandle, QueryParams,
    VersionRange,
};
use super::event_bus::{Event, EventBus, MemberEvent, MemberEventKind, QueryEvent, UserEvent};

/// Upper bound on user event name plus payload.
pub const USER_EVENT_SIZE_LIMIT: usize = 512;
/// Upper bound on query name plus payload.
pub const QUERY_SIZE_LIMIT: usize = 1024;
/// Port assumed for join addresses that omit one.
pub const DEFAULT_GOSSIP_PORT: u16 = 7946;

const PROTOCOL_VERSION: u8 = 4;
const DELEGATE_VERSION: u8 = 5;

/// Identity of the local member.
#[derive(Debug, Clone)]
pub struct StandaloneOptions {
    /// Local member name.
    pub node_name: String,
    /// Address advertised for the local member.
    pub advertise: SocketAddr,
    /// Local member tags.
    pub tags: BTreeMap<String, String>,
    /// Deadline applied to queries that do not set one.
    pub query_timeout: Duration,
}

impl StandaloneOptions {
    /// Options for a member called `node_name` on the loopback address.
    #[must_use]
    pub fn named(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            advertise: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_GOSSIP_PORT),
            tags: BTreeMap::new(),
            query_timeout: Duration::from_secs(15),
        }
    }
}

struct PendingQuery {
    deadline: Instant,
    responses: Sender<NodeResponse>,
    // Held so the ack channel stays open until the query expires.
    _acks: Sender<String>,
}

struct EngineState {
    members: BTreeMap<String, Member>,
    event_clock: u64,
    query_clock: u64,
    pending: HashMap<u64, PendingQuery>,
}

/// Membership engine that never leaves the process.
pub struct StandaloneEngine {
    local: String,
    query_timeout: Duration,
    bus: Arc<EventBus>,
    state: Mutex<EngineState>,
}

impl StandaloneEngine {
    /// Creates an engine whose only member is the local one.
    #[must_use]
    pub fn new(options: StandaloneOptions, bus: Arc<EventBus>) -> Self {
        let local = Member {
            name: options.node_name.clone(),
            addr: options.advertise.ip(),
            port: options.advertise.port(),
            tags: options.tags,
            status: MemberStatus::Alive,
            protocol: VersionRange::exactly(PROTOCOL_VERSION),
            delegate: VersionRange::exactly(DELEGATE_VERSION),
        };
        let mut members = BTreeMap::new();
        members.insert(local.name.clone(), local);
        Self {
            local: options.node_name,
            query_timeout: options.query_timeout,
            bus,
            state: Mutex::new(EngineState {
                members,
                event_clock: 0,
                query_clock: 0,
                pending: HashMap::new(),
            }),
        }
    }

    /// Name of the local member.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Marks a remote member as failed, as the failure detector would.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownMember`] when `node` is not known.
    pub fn mark_failed(&self, node: &str) -> Result<(), EngineError> {
        let member = {
            let mut state = self.lock();
            let member = state
                .members
                .get_mut(node)
                .ok_or_else(|| EngineError::UnknownMember {
                    name: node.to_owned(),
                })?;
            if member.status == MemberStatus::Failed {
                return Ok(());
            }
            member.status = MemberStatus::Failed;
            member.clone()
        };
        warn!(target: AGENT_TARGET, member = node, "member failed");
        self.publish_members(MemberEventKind::Failed, vec![member]);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_present(state: &EngineState, local: &str) -> Result<(), EngineError> {
        match state.members.get(local).map(|member| member.status) {
            Some(MemberStatus::Leaving | MemberStatus::Left) => Err(EngineError::Left),
            _ => Ok(()),
        }
    }

    fn publish_members(&self, kind: MemberEventKind, members: Vec<Member>) {
        if members.is_empty() {
            return;
        }
        self.bus
            .publish(&Event::Member(MemberEvent { kind, members }));
    }

    fn local_matches(
        &self,
        state: &EngineState,
        params: &QueryParams,
    ) -> Result<bool, EngineError> {
        if !params.filter_nodes.is_empty() && !params.filter_nodes.contains(&self.local) {
            return Ok(false);
        }
        let tags = state
            .members
            .get(&self.local)
            .map(|member| &member.tags);
        for (tag, pattern) in &params.filter_tags {
            let expr = Regex::new(pattern).map_err(|source| EngineError::InvalidTagFilter {
                tag: tag.clone(),
                source,
            })?;
            let value = tags.and_then(|tags| tags.get(tag));
            if !value.is_some_and(|value| expr.is_match(value)) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn parse_join_address(address: &str) -> Result<SocketAddr, String> {
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return Ok(socket);
    }
    address
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_GOSSIP_PORT))
        .map_err(|error| format!("invalid address '{address}': {error}"))
}

fn check_size(kind: &'static str, name: &str, payload: &[u8], limit: usize) -> Result<(), EngineError> {
    let size = name.len() + payload.len();
    if size > limit {
        return Err(EngineError::TooLarge { kind, size, limit });
    }
    Ok(())
}

impl MembershipEngine for StandaloneEngine {
    fn join(&self, addresses: &[String], replay: bool) -> Result<usize, EngineError> {
        let mut joined = Vec::new();
        let mut contacted = 0;
        let mut last_error = String::from("no addresses given");
        {
            let mut state = self.lock();
            Self::ensure_present(&state, &self.local)?;
            for address in addresses {
                let socket = match parse_join_address(address) {
                    Ok(socket) => socket,
                    Err(error) => {
                        warn!(target: AGENT_TARGET, address = %address, "join skipped: {error}");
                        last_error = error;
                        continue;
                    }
                };
                contacted += 1;
                let name = socket.to_string();
                if state.members.contains_key(&name) {
                    continue;
                }
                let member = Member {
                    name: name.clone(),
                    addr: socket.ip(),
                    port: socket.port(),
                    tags: BTreeMap::new(),
                    status: MemberStatus::Alive,
                    protocol: VersionRange::exactly(PROTOCOL_VERSION),
                    delegate: VersionRange::exactly(DELEGATE_VERSION),
                };
                state.members.insert(name, member.clone());
                joined.push(member);
            }
        }
        if contacted == 0 {
            return Err(EngineError::JoinFailed {
                attempted: addresses.len(),
                reason: last_error,
            });
        }
        debug!(target: AGENT_TARGET, contacted, replay, "join complete");
        self.publish_members(MemberEventKind::Join, joined);
        Ok(contacted)
    }

    fn leave(&self) -> Result<(), EngineError> {
        let local = {
            let mut state = self.lock();
            let Some(member) = state.members.get_mut(&self.local) else {
                return Ok(());
            };
            if member.status == MemberStatus::Left {
                return Ok(());
            }
            member.status = MemberStatus::Left;
            member.clone()
        };
        info!(target: AGENT_TARGET, member = %self.local, "leaving cluster");
        self.publish_members(MemberEventKind::Leave, vec![local]);
        Ok(())
    }

    fn force_leave(&self, node: &str) -> Result<(), EngineError> {
        let member = {
            let mut state = self.lock();
            let member = state
                .members
                .get_mut(node)
                .ok_or_else(|| EngineError::UnknownMember {
                    name: node.to_owned(),
                })?;
            if member.status != MemberStatus::Failed {
                debug!(target: AGENT_TARGET, member = node, status = %member.status,
                    "force-leave ignored for member that has not failed");
                return Ok(());
            }
            member.status = MemberStatus::Left;
            member.clone()
        };
        info!(target: AGENT_TARGET, member = node, "forced member to leave");
        self.publish_members(MemberEventKind::Leave, vec![member]);
        Ok(())
    }

    fn members(&self) -> Vec<Member> {
        self.lock().members.values().cloned().collect()
    }

    fn user_event(&self, name: &str, payload: &[u8], coalesce: bool) -> Result<(), EngineError> {
        check_size("user event", name, payload, USER_EVENT_SIZE_LIMIT)?;
        let ltime = {
            let mut state = self.lock();
            Self::ensure_present(&state, &self.local)?;
            state.event_clock += 1;
            state.event_clock
        };
        debug!(target: AGENT_TARGET, event = name, ltime, "user event");
        self.bus.publish(&Event::User(UserEvent {
            ltime,
            name: name.to_owned(),
            payload: payload.to_vec(),
            coalesce,
        }));
        Ok(())
    }

    fn query(
        &self,
        name: &str,
        payload: &[u8],
        params: QueryParams,
    ) -> Result<QueryHandle, EngineError> {
        check_size("query", name, payload, QUERY_SIZE_LIMIT)?;
        let timeout = params.timeout.unwrap_or(self.query_timeout);
        let deadline = Instant::now() + timeout;
        let (ack_tx, ack_rx) = channel::unbounded();
        let (response_tx, response_rx) = channel::unbounded();
        let (id, delivered) = {
            let mut state = self.lock();
            Self::ensure_present(&state, &self.local)?;
            let delivered = self.local_matches(&state, &params)?;
            let now = Instant::now();
            state.pending.retain(|_, pending| pending.deadline > now);
            state.query_clock += 1;
            let id = state.query_clock;
            if delivered && params.request_ack {
                // Delivery to the local member is immediate.
                let _ = ack_tx.send(self.local.clone());
            }
            state.pending.insert(
                id,
                PendingQuery {
                    deadline,
                    responses: response_tx,
                    _acks: ack_tx,
                },
            );
            (id, delivered)
        };
        debug!(target: AGENT_TARGET, query = name, id, delivered, ?timeout, "query issued");
        if delivered {
            self.bus.publish(&Event::Query(QueryEvent {
                id,
                ltime: id,
                name: name.to_owned(),
                payload: payload.to_vec(),
            }));
        }
        Ok(QueryHandle::new(ack_rx, response_rx, deadline))
    }

    fn respond(&self, id: u64, payload: &[u8]) -> Result<(), EngineError> {
        let pending = self
            .lock()
            .pending
            .remove(&id)
            .ok_or(EngineError::UnknownQuery { id })?;
        if pending.deadline <= Instant::now() {
            return Err(EngineError::UnknownQuery { id });
        }
        // The issuer may have stopped listening; that is not an error here.
        let _ = pending.responses.send(NodeResponse {
            from: self.local.clone(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
