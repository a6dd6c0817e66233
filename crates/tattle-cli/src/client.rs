//! Client-side multiplexer for the tattle RPC protocol.
//!
//! One [`RpcClient`] owns one connection. Writes go through the shared
//! [`FrameWriter`]; a single reader thread decodes every response header and
//! routes it by sequence to whichever caller is waiting: a one-shot slot for
//! request/response calls, or a record channel for a live subscription.
//!
//! Closing the client, or losing the connection, drops every route. Callers
//! blocked on a reply observe [`ClientError::Closed`] and subscriptions end.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde::de::IgnoredAny;
use thiserror::Error;

use tattle_config::{LogLevel, SocketEndpoint};
use tattle_proto::{
    CodecError, EventRecord, EventRequest, ForceLeaveRequest, FrameReader, FrameWriter,
    HandshakeRequest, JoinRequest, JoinResponse, LogRecord, MAX_IPC_VERSION, Member,
    MembersResponse, MonitorRequest, ProtocolError, QueryRecord, QueryRecordKind, QueryRequest,
    RequestBody, RespondRequest, ResponseHeader, StopRequest, StreamRequest,
};

use crate::transport::{self, Connection};

/// Errors surfaced by [`RpcClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing accepted the connection.
    #[error("could not reach agent at {endpoint}: {source}")]
    Unreachable {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying connect error.
        #[source]
        source: io::Error,
    },
    /// The connection closed while the call was pending.
    #[error("connection to the agent closed")]
    Closed,
    /// The agent answered with a sentinel protocol error.
    #[error(transparent)]
    Protocol(ProtocolError),
    /// The agent answered with any other error text.
    #[error("{0}")]
    Remote(String),
    /// The connection could not be duplicated for the reader thread.
    #[error("failed to prepare connection: {0}")]
    Setup(#[source] io::Error),
    /// Encoding a request or writing it failed.
    #[error("failed to send request: {0}")]
    Send(#[source] CodecError),
}

impl ClientError {
    fn from_reply(error: String) -> Self {
        match ProtocolError::from_wire(&error) {
            Some(kind) => Self::Protocol(kind),
            None => Self::Remote(error),
        }
    }
}

/// Typed body of a successful reply.
#[derive(Debug)]
enum Reply {
    Empty,
    Join(JoinResponse),
    Members(MembersResponse),
}

/// Body a call expects after a successful reply header.
#[derive(Debug, Clone, Copy)]
enum Expect {
    Empty,
    Join,
    Members,
}

/// Destination of pushed records for one subscription.
enum RecordSink {
    Log(Sender<LogRecord>),
    Event(Sender<EventRecord>),
    Query(Sender<QueryRecord>),
}

enum Route {
    Call {
        expect: Expect,
        reply: Sender<Result<Reply, ClientError>>,
    },
    Stream {
        /// Present until the reply to the subscribing request arrives.
        started: Option<Sender<Result<Reply, ClientError>>>,
        sink: RecordSink,
    },
}

#[derive(Default)]
struct RouteTable {
    closed: bool,
    routes: HashMap<u64, Route>,
}

#[derive(Default)]
struct Shared {
    table: Mutex<RouteTable>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RouteTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, seq: u64, route: Route) -> Result<(), ClientError> {
        let mut table = self.lock();
        if table.closed {
            return Err(ClientError::Closed);
        }
        table.routes.insert(seq, route);
        Ok(())
    }

    fn forget(&self, seq: u64) {
        self.lock().routes.remove(&seq);
    }

    /// Drops every route; waiting callers see their channel disconnect.
    fn close(&self) {
        let mut table = self.lock();
        table.closed = true;
        table.routes.clear();
    }

    /// Delivers the frame introduced by `header`, consuming its body if any.
    fn route<R: Read>(
        &self,
        header: ResponseHeader,
        reader: &mut FrameReader<R>,
    ) -> Result<(), CodecError> {
        let mut table = self.lock();
        let seq = header.seq;
        match table.routes.remove(&seq) {
            None => {
                // A record for a subscription dropped locally still carries a body.
                if header.is_ok() {
                    reader.read_item::<IgnoredAny>()?;
                }
            }
            Some(Route::Call { expect, reply }) => {
                let outcome = if header.is_ok() {
                    Ok(read_reply(expect, reader)?)
                } else {
                    Err(ClientError::from_reply(header.error))
                };
                let _ = reply.send(outcome);
            }
            Some(Route::Stream {
                started: Some(started),
                sink,
            }) => {
                if header.is_ok() {
                    let _ = started.send(Ok(Reply::Empty));
                    table.routes.insert(
                        seq,
                        Route::Stream {
                            started: None,
                            sink,
                        },
                    );
                } else {
                    let _ = started.send(Err(ClientError::from_reply(header.error)));
                }
            }
            Some(Route::Stream {
                started: None,
                sink,
            }) => {
                if forward_record(&sink, reader)? {
                    table.routes.insert(
                        seq,
                        Route::Stream {
                            started: None,
                            sink,
                        },
                    );
                }
            }
        }
        Ok(())
    }
}

fn read_reply<R: Read>(expect: Expect, reader: &mut FrameReader<R>) -> Result<Reply, CodecError> {
    Ok(match expect {
        Expect::Empty => Reply::Empty,
        Expect::Join => Reply::Join(reader.read_item()?),
        Expect::Members => Reply::Members(reader.read_item()?),
    })
}

/// Decodes one record into `sink`; returns whether the route stays open.
fn forward_record<R: Read>(sink: &RecordSink, reader: &mut FrameReader<R>) -> Result<bool, CodecError> {
    let open = match sink {
        RecordSink::Log(records) => records.send(reader.read_item()?).is_ok(),
        RecordSink::Event(records) => records.send(reader.read_item()?).is_ok(),
        RecordSink::Query(records) => {
            let record: QueryRecord = reader.read_item()?;
            let done = record.kind == QueryRecordKind::Done;
            records.send(record).is_ok() && !done
        }
    };
    Ok(open)
}

fn read_loop(mut reader: FrameReader<Connection>, shared: &Shared) {
    loop {
        let header = match reader.read_response_header() {
            Ok(header) => header,
            Err(_) => break,
        };
        if shared.route(header, &mut reader).is_err() {
            break;
        }
    }
    shared.close();
}

/// Records pushed under one subscription's sequence.
///
/// The subscription ends when the agent stops it, when a query reaches its
/// `done` record, or when the connection closes.
pub struct Subscription<T> {
    seq: u64,
    records: Receiver<T>,
}

impl<T> Subscription<T> {
    /// Sequence naming this subscription; pass it to [`RpcClient::stop`].
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Blocks for the next record.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the subscription has ended.
    pub fn recv(&self) -> Result<T, ClientError> {
        self.records.recv().map_err(|_| ClientError::Closed)
    }

    /// Waits up to `timeout` for the next record.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the subscription has ended.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, ClientError> {
        match self.records.recv_timeout(timeout) {
            Ok(record) => Ok(Some(record)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
        }
    }
}

/// A negotiated connection to the agent.
pub struct RpcClient {
    writer: FrameWriter<Connection>,
    closer: Connection,
    shared: Arc<Shared>,
    next_seq: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Connects to `endpoint` and performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unreachable`] when the agent cannot be reached
    /// and the agent's error when it refuses the handshake.
    pub fn connect(endpoint: &SocketEndpoint) -> Result<Self, ClientError> {
        let connection = transport::connect(endpoint)?;
        let client = Self::start(connection)?;
        client.handshake()?;
        Ok(client)
    }

    /// Wraps an open connection and starts the reader thread.
    pub(crate) fn start(connection: Connection) -> Result<Self, ClientError> {
        let read_half = connection.try_clone().map_err(ClientError::Setup)?;
        let closer = connection.try_clone().map_err(ClientError::Setup)?;
        let shared = Arc::new(Shared::default());
        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(String::from("tattle-rpc-reader"))
                .spawn(move || read_loop(FrameReader::new(read_half), &shared))
                .map_err(ClientError::Setup)?
        };
        Ok(Self {
            writer: FrameWriter::new(connection),
            closer,
            shared,
            next_seq: AtomicU64::new(0),
            reader: Mutex::new(Some(reader)),
        })
    }

    fn allocate_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `route`, writes `body`, and hands back the sequence used.
    fn send(&self, body: &RequestBody, route: Route) -> Result<u64, ClientError> {
        let seq = self.allocate_seq();
        self.shared.register(seq, route)?;
        if let Err(error) = self.writer.write_request(seq, body) {
            self.shared.forget(seq);
            return Err(if error.is_closed() {
                ClientError::Closed
            } else {
                ClientError::Send(error)
            });
        }
        Ok(seq)
    }

    fn call(&self, body: &RequestBody, expect: Expect) -> Result<Reply, ClientError> {
        let (reply, outcome) = channel::bounded(1);
        self.send(body, Route::Call { expect, reply })?;
        outcome.recv().map_err(|_| ClientError::Closed)?
    }

    fn subscribe<T>(
        &self,
        body: &RequestBody,
        sink: impl FnOnce(Sender<T>) -> RecordSink,
    ) -> Result<Subscription<T>, ClientError> {
        let (started, outcome) = channel::bounded(1);
        let (records_tx, records) = channel::unbounded();
        let seq = self.send(
            body,
            Route::Stream {
                started: Some(started),
                sink: sink(records_tx),
            },
        )?;
        outcome.recv().map_err(|_| ClientError::Closed)??;
        Ok(Subscription { seq, records })
    }

    fn handshake(&self) -> Result<(), ClientError> {
        self.call(
            &RequestBody::Handshake(HandshakeRequest {
                version: MAX_IPC_VERSION,
            }),
            Expect::Empty,
        )
        .map(drop)
    }

    /// Point-in-time snapshot of the cluster members.
    ///
    /// # Errors
    ///
    /// Returns the agent's error or [`ClientError::Closed`].
    pub fn members(&self) -> Result<Vec<Member>, ClientError> {
        match self.call(&RequestBody::Members, Expect::Members)? {
            Reply::Members(response) => Ok(response.members),
            Reply::Empty | Reply::Join(_) => Ok(Vec::new()),
        }
    }

    /// Asks the agent to join the members at `existing`; returns how many
    /// were contacted.
    ///
    /// # Errors
    ///
    /// Returns the agent's error or [`ClientError::Closed`].
    pub fn join(&self, existing: Vec<String>, replay: bool) -> Result<u32, ClientError> {
        let body = RequestBody::Join(JoinRequest { existing, replay });
        match self.call(&body, Expect::Join)? {
            Reply::Join(response) => Ok(response.num),
            Reply::Empty | Reply::Members(_) => Ok(0),
        }
    }

    /// Asks the agent to leave the cluster and shut down.
    ///
    /// # Errors
    ///
    /// Returns the agent's error or [`ClientError::Closed`].
    pub fn leave(&self) -> Result<(), ClientError> {
        self.call(&RequestBody::Leave, Expect::Empty).map(drop)
    }

    /// Forces a failed member out of the cluster.
    ///
    /// # Errors
    ///
    /// Returns the agent's error or [`ClientError::Closed`].
    pub fn force_leave(&self, node: &str) -> Result<(), ClientError> {
        let body = RequestBody::ForceLeave(ForceLeaveRequest {
            node: node.to_owned(),
        });
        self.call(&body, Expect::Empty).map(drop)
    }

    /// Broadcasts a user event.
    ///
    /// # Errors
    ///
    /// Returns the agent's error or [`ClientError::Closed`].
    pub fn user_event(&self, name: &str, payload: Vec<u8>, coalesce: bool) -> Result<(), ClientError> {
        let body = RequestBody::Event(EventRequest {
            name: name.to_owned(),
            payload,
            coalesce,
        });
        self.call(&body, Expect::Empty).map(drop)
    }

    /// Answers a query received through an event subscription.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] with
    /// [`ProtocolError::InvalidQueryId`] when the query is unknown or expired.
    pub fn respond(&self, id: u64, payload: Vec<u8>) -> Result<(), ClientError> {
        let body = RequestBody::Respond(RespondRequest { id, payload });
        self.call(&body, Expect::Empty).map(drop)
    }

    /// Subscribes to the agent's log lines at or above `level`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MonitorExists`] when this connection already
    /// monitors.
    pub fn monitor(&self, level: LogLevel) -> Result<Subscription<LogRecord>, ClientError> {
        let body = RequestBody::Monitor(MonitorRequest {
            log_level: level.to_string(),
        });
        self.subscribe(&body, RecordSink::Log)
    }

    /// Subscribes to cluster events matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidFilter`] for a malformed filter.
    pub fn stream(&self, filter: &str) -> Result<Subscription<EventRecord>, ClientError> {
        let body = RequestBody::Stream(StreamRequest {
            filter: filter.to_owned(),
        });
        self.subscribe(&body, RecordSink::Event)
    }

    /// Issues a query; the subscription yields acks and responses, then
    /// `done` at the deadline.
    ///
    /// # Errors
    ///
    /// Returns the agent's error when the query cannot be started.
    pub fn query(&self, request: QueryRequest) -> Result<Subscription<QueryRecord>, ClientError> {
        self.subscribe(&RequestBody::Query(request), RecordSink::Query)
    }

    /// Cancels the subscription named `seq`.
    ///
    /// Once this returns no further records arrive for `seq`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] when the connection is gone.
    pub fn stop(&self, seq: u64) -> Result<(), ClientError> {
        let body = RequestBody::Stop(StopRequest { stop: seq });
        self.call(&body, Expect::Empty)?;
        self.shared.forget(seq);
        Ok(())
    }

    /// Closes the connection and releases every pending call.
    pub fn close(&self) {
        self.shared.close();
        let _ = self.closer.shutdown();
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            let _ = reader.join();
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}
