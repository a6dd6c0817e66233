//! Collaborators the RPC layer drives: the membership engine, the log sink,
//! and the event bus.
//!
//! The gossip layer itself lives outside this crate. [`MembershipEngine`] is the
//! narrow seam the dispatcher calls through, and [`StandaloneEngine`] is the
//! in-process implementation the agent binary and the tests run against.

mod engine;
mod event_bus;
mod log_sink;
mod standalone;

pub use engine::{
    EngineError, Member, MemberStatus, MembershipEngine, NodeResponse, QueryHandle, QueryParams,
    VersionRange,
};
pub use event_bus::{
    Event, EventBus, EventHandler, MemberEvent, MemberEventKind, QueryEvent, UserEvent,
};
pub use log_sink::{DEFAULT_BACKLOG, LogHandler, LogSink};
pub use standalone::{StandaloneEngine, StandaloneOptions};

pub(crate) const AGENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::agent");

/// Lets request handlers ask the agent process to stop.
pub trait AgentControl: Send + Sync {
    /// Begins agent shutdown; must return without waiting for it to finish.
    fn shutdown(&self);
}
