//! Shared configuration for the tattle agent and CLI.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file, then `TATTLE_*` environment variables, then command-line
//! flags. Both binaries resolve the same [`Config`] so that the CLI dials the
//! endpoint the agent listens on.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_LOG_FILTER, DEFAULT_LOG_QUEUE_CAPACITY,
    DEFAULT_QUERY_TIMEOUT_MS, DEFAULT_RPC_PORT, default_log_filter, default_log_filter_string,
    default_log_format, default_node_name, default_rpc_addr,
};
pub use logging::{LogFormat, LogFormatParseError, LogLevel};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved configuration shared by the agent and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TATTLE")]
pub struct Config {
    /// Endpoint of the agent's RPC listener.
    #[ortho_config(default = default_rpc_addr())]
    pub rpc_addr: SocketEndpoint,
    /// Name the local member advertises.
    #[ortho_config(default = default_node_name())]
    pub node_name: String,
    /// `tracing` filter expression for the agent's own diagnostics.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the agent's own diagnostics.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Capacity of each log stream's queue.
    #[ortho_config(default = DEFAULT_LOG_QUEUE_CAPACITY)]
    pub log_queue_capacity: usize,
    /// Capacity of each event stream's queue.
    #[ortho_config(default = DEFAULT_EVENT_QUEUE_CAPACITY)]
    pub event_queue_capacity: usize,
    /// Query deadline applied when a request leaves it unset.
    #[ortho_config(default = DEFAULT_QUERY_TIMEOUT_MS)]
    pub query_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_addr: default_rpc_addr(),
            node_name: default_node_name(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            log_queue_capacity: DEFAULT_LOG_QUEUE_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Endpoint of the agent's RPC listener.
    #[must_use]
    pub const fn rpc_addr(&self) -> &SocketEndpoint {
        &self.rpc_addr
    }

    /// Name the local member advertises.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// `tracing` filter expression for the agent's own diagnostics.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format of the agent's own diagnostics.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Capacity of each log stream's queue, never below one.
    #[must_use]
    pub fn log_queue_capacity(&self) -> usize {
        self.log_queue_capacity.max(1)
    }

    /// Capacity of each event stream's queue, never below one.
    #[must_use]
    pub fn event_queue_capacity(&self) -> usize {
        self.event_queue_capacity.max(1)
    }

    /// Query deadline applied when a request leaves it unset.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
