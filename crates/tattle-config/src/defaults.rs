use std::env;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port of the RPC listener.
pub const DEFAULT_RPC_PORT: u16 = 7373;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default capacity of each log stream's queue.
pub const DEFAULT_LOG_QUEUE_CAPACITY: usize = 512;

/// Default capacity of each event stream's queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 128;

/// Default query deadline in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 15_000;

const FALLBACK_NODE_NAME: &str = "tattle";

/// Default RPC endpoint: loopback TCP on [`DEFAULT_RPC_PORT`].
pub fn default_rpc_addr() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_RPC_PORT)
}

/// Default node name, taken from `HOSTNAME` when set.
pub fn default_node_name() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_NODE_NAME.to_owned())
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
