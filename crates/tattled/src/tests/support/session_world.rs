//! BDD world for RPC session scenarios.
//!
//! Each world serves a fresh agent on an ephemeral loopback port, backed by a
//! standalone engine, and talks to it through raw protocol clients.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tattle_config::SocketEndpoint;
use tattle_proto::{RequestBody, ResponseHeader};

use crate::agent::{EventBus, LogSink, StandaloneEngine, StandaloneOptions};
use crate::rpc::test_utils::CountingControl;
use crate::rpc::{self, AgentServices, RpcServerHandle, StreamLimits};

use super::client::TestClient;

/// Scenario world shared across session steps.
#[derive(Default)]
pub struct SessionWorld {
    agent: Option<ServedAgent>,
    clients: Vec<TestClient>,
    replies: Vec<ResponseHeader>,
    /// When the most recent query was issued.
    pub query_issued_at: Option<Instant>,
}

struct ServedAgent {
    engine: Arc<StandaloneEngine>,
    sink: Arc<LogSink>,
    bus: Arc<EventBus>,
    control: Arc<CountingControl>,
    server: Option<RpcServerHandle>,
    addr: SocketAddr,
}

impl Drop for ServedAgent {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            let _ = server.shutdown();
        }
    }
}

impl SessionWorld {
    /// Starts an agent whose local member is called `name`.
    pub fn start_agent(&mut self, name: &str) {
        let bus = Arc::new(EventBus::new());
        // No backlog, so a new monitor only sees lines written after it.
        let sink = Arc::new(LogSink::with_backlog(0));
        let engine = Arc::new(StandaloneEngine::new(
            StandaloneOptions::named(name),
            Arc::clone(&bus),
        ));
        let control = Arc::new(CountingControl::default());
        let services = AgentServices {
            engine: engine.clone(),
            log_sink: Arc::clone(&sink),
            event_bus: Arc::clone(&bus),
            control: control.clone(),
        };
        let server = rpc::serve(
            &SocketEndpoint::tcp("127.0.0.1", 0),
            services,
            StreamLimits::default(),
        )
        .expect("serve rpc endpoint");
        let addr = server.local_addr().expect("tcp endpoint has an address");
        self.agent = Some(ServedAgent {
            engine,
            sink,
            bus,
            control,
            server: Some(server),
            addr,
        });
    }

    fn served(&self) -> &ServedAgent {
        self.agent.as_ref().expect("agent was not started")
    }

    /// Opens another client connection; returns its index.
    pub fn connect(&mut self) -> usize {
        let client = TestClient::connect(self.served().addr);
        self.clients.push(client);
        self.clients.len() - 1
    }

    /// Client by connection order.
    pub fn client(&mut self, index: usize) -> &mut TestClient {
        self.clients
            .get_mut(index)
            .unwrap_or_else(|| panic!("client {index} is not connected"))
    }

    /// Sends `body` from client `index` and records the reply header.
    pub fn call(&mut self, index: usize, seq: u64, body: &RequestBody) -> ResponseHeader {
        let header = self.client(index).call(seq, body);
        self.replies.push(header.clone());
        header
    }

    /// Performs the handshake from client `index` and records the reply.
    pub fn handshake(&mut self, index: usize, seq: u64) -> ResponseHeader {
        let header = self.client(index).handshake(seq);
        self.replies.push(header.clone());
        header
    }

    /// Records a reply read outside [`Self::call`].
    pub fn record(&mut self, header: ResponseHeader) {
        self.replies.push(header);
    }

    /// First recorded reply for `seq`.
    pub fn reply_to(&self, seq: u64) -> &ResponseHeader {
        self.replies
            .iter()
            .find(|header| header.seq == seq)
            .unwrap_or_else(|| panic!("no reply recorded for sequence {seq}"))
    }

    /// The `nth` recorded reply for `seq`, counting from zero.
    pub fn nth_reply_to(&self, seq: u64, nth: usize) -> &ResponseHeader {
        self.replies
            .iter()
            .filter(|header| header.seq == seq)
            .nth(nth)
            .unwrap_or_else(|| panic!("fewer than {} replies for sequence {seq}", nth + 1))
    }

    /// The agent's log sink.
    pub fn sink(&self) -> &LogSink {
        &self.served().sink
    }

    /// The agent's membership engine.
    pub fn engine(&self) -> &StandaloneEngine {
        &self.served().engine
    }

    /// Log and event handlers currently registered by sessions.
    pub fn subscriber_counts(&self) -> (usize, usize) {
        let served = self.served();
        (served.sink.handler_count(), served.bus.handler_count())
    }

    /// Polls until sessions hold no subscribers; returns the last counts seen.
    pub fn wait_for_no_subscribers(&self) -> (usize, usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let counts = self.subscriber_counts();
            if counts == (0, 0) || Instant::now() >= deadline {
                return counts;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Polls until no session is connected; returns the last count seen.
    pub fn wait_for_no_sessions(&self) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let count = self
                .served()
                .server
                .as_ref()
                .map_or(0, RpcServerHandle::session_count);
            if count == 0 || Instant::now() >= deadline {
                return count;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Shuts the RPC endpoint down, leaving the agent's collaborators alive.
    pub fn shutdown_endpoint(&mut self) {
        let server = self
            .agent
            .as_mut()
            .and_then(|agent| agent.server.take())
            .expect("endpoint is serving");
        server.shutdown().expect("shut endpoint down");
    }

    /// How many times a session asked the agent to shut down.
    pub fn shutdown_requests(&self) -> usize {
        self.served().control.count()
    }
}

/// Fixture constructor shared by the session suite.
#[must_use]
pub fn session_world() -> RefCell<SessionWorld> {
    RefCell::new(SessionWorld::default())
}
