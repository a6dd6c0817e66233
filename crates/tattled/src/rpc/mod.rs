//! The agent's RPC endpoint.
//!
//! [`serve`] binds the configured endpoint and runs one thread per accepted
//! connection. Each connection thread owns its [`Session`] and the read half
//! of the socket; stream threads push through the session's shared writer.
//! [`RpcServerHandle::shutdown`] stops accepting, then force-closes every
//! live connection and waits for each session to run its ordinary teardown.

mod connection;
mod dispatch;
mod errors;
mod filter;
mod listener;
mod registry;
mod session;
mod streams;
mod wire;

#[cfg(test)]
pub(crate) mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tattle_config::{Config, SocketEndpoint};
use tattle_proto::{CodecError, FrameReader, FrameWriter};

use crate::agent::{AgentControl, EventBus, LogSink, MembershipEngine};

use self::connection::{ConnectionHandler, ConnectionStream};
use self::dispatch::{Dispatcher, Flow};
pub use self::errors::ListenerError;
use self::errors::SessionError;
use self::listener::{ListenerHandle, RpcListener};
use self::registry::SessionRegistry;
use self::session::Session;

pub(crate) const RPC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::rpc");

const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Collaborators every session dispatches into.
#[derive(Clone)]
pub struct AgentServices {
    /// Cluster membership operations.
    pub engine: Arc<dyn MembershipEngine>,
    /// Source of log stream lines.
    pub log_sink: Arc<LogSink>,
    /// Source of event stream events.
    pub event_bus: Arc<EventBus>,
    /// Lets `leave` stop the agent.
    pub control: Arc<dyn AgentControl>,
}

/// Queue capacities for push subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    /// Lines buffered per log stream before new lines are dropped.
    pub log_queue: usize,
    /// Events buffered per event stream before new events are dropped.
    pub event_queue: usize,
}

impl StreamLimits {
    /// Reads the capacities from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_queue: config.log_queue_capacity(),
            event_queue: config.event_queue_capacity(),
        }
    }
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct RpcConnectionHandler {
    dispatcher: Dispatcher,
    registry: Arc<SessionRegistry>,
}

impl ConnectionHandler for RpcConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let peer = stream.peer();
        debug!(target: RPC_TARGET, %peer, "accepted rpc client");
        match self.serve_connection(stream) {
            Ok(()) => debug!(target: RPC_TARGET, %peer, "rpc client disconnected"),
            Err(error) => warn!(target: RPC_TARGET, %peer, error = %error, "rpc session ended"),
        }
    }
}

impl RpcConnectionHandler {
    fn serve_connection(&self, stream: ConnectionStream) -> Result<(), SessionError> {
        let read_half = stream
            .try_clone()
            .map_err(|source| SessionError::Clone { source })?;
        let closer = stream
            .try_clone()
            .map_err(|source| SessionError::Clone { source })?;
        let Some(id) = self.registry.add(closer) else {
            debug!(target: RPC_TARGET, "endpoint closing, dropping new client");
            return Ok(());
        };
        let mut session = Session::new(id, FrameWriter::new(stream));
        let mut reader = FrameReader::new(read_half);
        let outcome = self.read_loop(&mut session, &mut reader);
        self.dispatcher.teardown(session);
        self.registry.remove(id);
        outcome.map_err(SessionError::from)
    }

    fn read_loop(
        &self,
        session: &mut Session<ConnectionStream>,
        reader: &mut FrameReader<ConnectionStream>,
    ) -> Result<(), CodecError> {
        loop {
            let header = match reader.read_request_header() {
                Ok(header) => header,
                Err(error) if error.is_closed() => return Ok(()),
                Err(error) => return Err(error),
            };
            if self.dispatcher.dispatch(session, &header, reader)? == Flow::Close {
                return Ok(());
            }
        }
    }
}

/// Running RPC endpoint.
pub struct RpcServerHandle {
    listener: ListenerHandle,
    registry: Arc<SessionRegistry>,
    local_addr: Option<SocketAddr>,
}

impl RpcServerHandle {
    /// Bound TCP address, useful when the endpoint asked for port zero.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of connected clients.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Stops accepting, closes every live connection and waits for the
    /// sessions to finish their teardown.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] when the accept thread panicked.
    pub fn shutdown(self) -> Result<(), ListenerError> {
        self.listener.shutdown();
        let joined = self.listener.join();
        let closed = self.registry.close_all();
        self.registry.wait_drained(TEARDOWN_GRACE);
        info!(target: RPC_TARGET, sessions = closed, "rpc endpoint closed");
        joined
    }
}

/// Binds `endpoint` and starts serving clients.
///
/// # Errors
///
/// Returns [`ListenerError`] when the endpoint cannot be bound.
pub fn serve(
    endpoint: &SocketEndpoint,
    services: AgentServices,
    limits: StreamLimits,
) -> Result<RpcServerHandle, ListenerError> {
    let listener = RpcListener::bind(endpoint)?;
    let local_addr = listener.local_addr();
    let registry = Arc::new(SessionRegistry::new());
    let handler = Arc::new(RpcConnectionHandler {
        dispatcher: Dispatcher::new(services, limits),
        registry: Arc::clone(&registry),
    });
    let listener = listener.start(handler)?;
    Ok(RpcServerHandle {
        listener,
        registry,
        local_addr,
    })
}
