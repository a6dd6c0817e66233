//! Command dispatch for one session.
//!
//! The dispatcher enforces the handshake gate, decodes the body the command
//! names, calls into the agent collaborators, and writes exactly one reply.
//! Streaming commands register their subscription before the reply is
//! written and start forwarding after it, so the reply always precedes the
//! first pushed record.

use std::io::{Read, Write};
use std::time::Duration;

use tracing::{debug, info, warn};

use tattle_config::LogLevel;
use tattle_proto::{
    CodecError, Command, EventRequest, FrameReader, JoinRequest, JoinResponse, MembersResponse,
    MonitorRequest, ProtocolError, QueryRequest, RequestBody, RequestHeader, ResponseHeader,
    StreamRequest,
};

use super::filter::EventFilter;
use super::session::Session;
use super::streams::{EventStream, LogStream, spawn_query_stream};
use super::{AgentServices, RPC_TARGET, StreamLimits, wire};
use crate::agent::QueryParams;

/// What the connection loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

pub(crate) struct Dispatcher {
    services: AgentServices,
    limits: StreamLimits,
}

impl Dispatcher {
    pub(crate) const fn new(services: AgentServices, limits: StreamLimits) -> Self {
        Self { services, limits }
    }

    /// Handles the request introduced by `header`.
    ///
    /// Errors are fatal to the connection: the stream either failed or can
    /// no longer be trusted to be frame aligned.
    pub(crate) fn dispatch<R, W>(
        &self,
        session: &mut Session<W>,
        header: &RequestHeader,
        reader: &mut FrameReader<R>,
    ) -> Result<Flow, CodecError>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let seq = header.seq;
        let parsed = header.command.parse::<Command>();
        if !session.is_ready() && !matches!(parsed, Ok(Command::Handshake)) {
            debug!(
                target: RPC_TARGET,
                session = session.id(),
                command = %header.command,
                "command before handshake"
            );
            reply_error(session, seq, ProtocolError::HandshakeRequired)?;
            return Ok(Flow::Close);
        }
        let command = match parsed {
            Ok(command) => command,
            Err(unknown) => {
                debug!(target: RPC_TARGET, session = session.id(), command = %unknown.name, "unsupported command");
                reply_error(session, seq, ProtocolError::UnsupportedCommand)?;
                return Ok(Flow::Continue);
            }
        };
        match reader.read_request_body(command)? {
            RequestBody::Handshake(request) => {
                let outcome = session.negotiate(request.version);
                reply(session, seq, &outcome)?;
            }
            RequestBody::Event(request) => self.user_event(session, seq, &request)?,
            RequestBody::ForceLeave(request) => {
                let outcome = self.services.engine.force_leave(&request.node);
                reply(session, seq, &outcome)?;
            }
            RequestBody::Join(request) => self.join(session, seq, &request)?,
            RequestBody::Members => self.members(session, seq)?,
            RequestBody::Stream(request) => self.open_event_stream(session, seq, &request)?,
            RequestBody::Stop(request) => {
                session.stop(request.stop, &self.services.log_sink, &self.services.event_bus);
                session.writer().write_response(&ResponseHeader::ok(seq))?;
            }
            RequestBody::Monitor(request) => self.open_log_stream(session, seq, &request)?,
            RequestBody::Leave => self.leave(session, seq)?,
            RequestBody::Query(request) => self.query(session, seq, request)?,
            RequestBody::Respond(request) => {
                let outcome = self.services.engine.respond(request.id, &request.payload);
                reply(session, seq, &outcome)?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Stops everything `session` owns.
    pub(crate) fn teardown<W: Write + Send + 'static>(&self, session: Session<W>) {
        let id = session.id();
        session.teardown(&self.services.log_sink, &self.services.event_bus);
        debug!(target: RPC_TARGET, session = id, "session torn down");
    }

    fn user_event<W: Write + Send + 'static>(
        &self,
        session: &Session<W>,
        seq: u64,
        request: &EventRequest,
    ) -> Result<(), CodecError> {
        let outcome = self
            .services
            .engine
            .user_event(&request.name, &request.payload, request.coalesce);
        reply(session, seq, &outcome)
    }

    fn join<W: Write + Send + 'static>(
        &self,
        session: &Session<W>,
        seq: u64,
        request: &JoinRequest,
    ) -> Result<(), CodecError> {
        match self.services.engine.join(&request.existing, request.replay) {
            Ok(count) => {
                let num = u32::try_from(count).unwrap_or(u32::MAX);
                session
                    .writer()
                    .write_response_with(&ResponseHeader::ok(seq), &JoinResponse { num })
            }
            Err(error) => session
                .writer()
                .write_response(&ResponseHeader::failed(seq, &error)),
        }
    }

    fn members<W: Write + Send + 'static>(
        &self,
        session: &Session<W>,
        seq: u64,
    ) -> Result<(), CodecError> {
        let members = self
            .services
            .engine
            .members()
            .iter()
            .map(wire::member)
            .collect();
        session
            .writer()
            .write_response_with(&ResponseHeader::ok(seq), &MembersResponse { members })
    }

    fn open_event_stream<W: Write + Send + 'static>(
        &self,
        session: &mut Session<W>,
        seq: u64,
        request: &StreamRequest,
    ) -> Result<(), CodecError> {
        let filter = match request.filter.parse::<EventFilter>() {
            Ok(filter) => filter,
            Err(error) => return reply_error(session, seq, error),
        };
        if session.has_event_stream(seq) {
            return reply_error(session, seq, ProtocolError::StreamExists);
        }
        let writer = session.writer().clone();
        let stream = EventStream::register(
            seq,
            filter,
            &self.services.event_bus,
            self.limits.event_queue,
        );
        let stream = session.attach_event_stream(seq, stream);
        writer.write_response(&ResponseHeader::ok(seq))?;
        stream.start(writer);
        debug!(target: RPC_TARGET, seq, filter = %request.filter, "event stream started");
        Ok(())
    }

    fn open_log_stream<W: Write + Send + 'static>(
        &self,
        session: &mut Session<W>,
        seq: u64,
        request: &MonitorRequest,
    ) -> Result<(), CodecError> {
        if session.has_log_stream() {
            return reply_error(session, seq, ProtocolError::MonitorExists);
        }
        let Ok(level) = request.log_level.parse::<LogLevel>() else {
            return reply_error(session, seq, ProtocolError::UnknownLogLevel);
        };
        let writer = session.writer().clone();
        let stream = LogStream::register(seq, level, &self.services.log_sink, self.limits.log_queue);
        let stream = session.attach_log_stream(stream);
        writer.write_response(&ResponseHeader::ok(seq))?;
        stream.start(writer);
        debug!(target: RPC_TARGET, seq, %level, "log stream started");
        Ok(())
    }

    fn leave<W: Write + Send + 'static>(
        &self,
        session: &Session<W>,
        seq: u64,
    ) -> Result<(), CodecError> {
        let outcome = self.services.engine.leave();
        if let Err(error) = &outcome {
            warn!(target: RPC_TARGET, error = %error, "graceful leave failed");
        }
        let replied = reply(session, seq, &outcome);
        info!(target: RPC_TARGET, session = session.id(), "leave requested, shutting down agent");
        self.services.control.shutdown();
        replied
    }

    fn query<W: Write + Send + 'static>(
        &self,
        session: &Session<W>,
        seq: u64,
        request: QueryRequest,
    ) -> Result<(), CodecError> {
        let params = QueryParams {
            filter_nodes: request.filter_nodes,
            filter_tags: request.filter_tags,
            request_ack: request.request_ack,
            timeout: (request.timeout > 0).then(|| Duration::from_nanos(request.timeout)),
        };
        match self
            .services
            .engine
            .query(&request.name, &request.payload, params)
        {
            Ok(handle) => {
                let writer = session.writer().clone();
                writer.write_response(&ResponseHeader::ok(seq))?;
                // Bounded by the query deadline; nothing waits on it.
                drop(spawn_query_stream(seq, handle, writer));
                Ok(())
            }
            Err(error) => session
                .writer()
                .write_response(&ResponseHeader::failed(seq, &error)),
        }
    }
}

fn reply<W, E>(session: &Session<W>, seq: u64, outcome: &Result<(), E>) -> Result<(), CodecError>
where
    W: Write + Send + 'static,
    E: ToString,
{
    session
        .writer()
        .write_response(&ResponseHeader::from_outcome(seq, outcome))
}

fn reply_error<W: Write + Send + 'static>(
    session: &Session<W>,
    seq: u64,
    error: ProtocolError,
) -> Result<(), CodecError> {
    session
        .writer()
        .write_response(&ResponseHeader::failed(seq, &error))
}
