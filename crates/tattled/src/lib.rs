//! The tattle agent.
//!
//! The agent exposes cluster membership over a control-plane RPC endpoint.
//! Local tools connect, negotiate a protocol version, and then issue
//! commands: request/response operations such as `join`, `members`, and
//! `event`, and streaming subscriptions that push the agent's own log lines
//! (`monitor`), membership and user events (`stream`), or the live progress
//! of a cluster query (`query`).
//!
//! The crate is organised around a few seams:
//!
//! - [`agent`] holds the collaborators the RPC layer drives: the
//!   [`agent::MembershipEngine`] trait with its in-process
//!   [`agent::StandaloneEngine`], the [`agent::LogSink`], and the
//!   [`agent::EventBus`].
//! - [`rpc`] binds the endpoint, runs one session per connection, and
//!   dispatches commands.
//! - [`bootstrap_with`] loads configuration, installs telemetry, and builds
//!   the collaborators; [`run_agent`] adds signal handling and orderly
//!   shutdown on top.

pub mod agent;
mod bootstrap;
mod health;
mod process;
pub mod rpc;
pub mod telemetry;

pub use bootstrap::{
    Agent, BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownLatch, ShutdownReason, ShutdownSignal,
    SystemShutdownSignal, run_agent, run_agent_with,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
