//! Per-connection state: the negotiated version and owned subscriptions.
//!
//! Only the connection's own thread touches a [`Session`], so none of this
//! state is locked. Pushes from stream threads go through the shared
//! [`FrameWriter`].

use std::collections::HashMap;
use std::io::Write;

use tracing::debug;

use tattle_proto::{FrameWriter, ProtocolError, is_supported_version};

use super::RPC_TARGET;
use super::streams::{EventStream, LogStream};
use crate::agent::{EventBus, LogSink};

pub(crate) struct Session<W> {
    id: u64,
    writer: FrameWriter<W>,
    version: Option<i32>,
    log_stream: Option<LogStream>,
    event_streams: HashMap<u64, EventStream>,
}

impl<W: Write + Send + 'static> Session<W> {
    pub(crate) fn new(id: u64, writer: FrameWriter<W>) -> Self {
        Self {
            id,
            writer,
            version: None,
            log_stream: None,
            event_streams: HashMap::new(),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) const fn writer(&self) -> &FrameWriter<W> {
        &self.writer
    }

    pub(crate) const fn version(&self) -> Option<i32> {
        self.version
    }

    /// True once a handshake has succeeded.
    pub(crate) const fn is_ready(&self) -> bool {
        self.version.is_some()
    }

    /// Records the negotiated version. Never renegotiates.
    pub(crate) fn negotiate(&mut self, version: i32) -> Result<(), ProtocolError> {
        if self.version.is_some() {
            return Err(ProtocolError::DuplicateHandshake);
        }
        if !is_supported_version(version) {
            return Err(ProtocolError::UnsupportedVersion);
        }
        self.version = Some(version);
        Ok(())
    }

    pub(crate) const fn has_log_stream(&self) -> bool {
        self.log_stream.is_some()
    }

    pub(crate) fn has_event_stream(&self, seq: u64) -> bool {
        self.event_streams.contains_key(&seq)
    }

    pub(crate) fn attach_log_stream(&mut self, stream: LogStream) -> &mut LogStream {
        self.log_stream.insert(stream)
    }

    pub(crate) fn attach_event_stream(&mut self, seq: u64, stream: EventStream) -> &mut EventStream {
        self.event_streams.entry(seq).insert_entry(stream).into_mut()
    }

    /// Cancels whichever subscriptions carry `seq`. Unknown sequences are
    /// ignored.
    pub(crate) fn stop(&mut self, seq: u64, sink: &LogSink, bus: &EventBus) {
        if self.log_stream.as_ref().is_some_and(|stream| stream.seq() == seq)
            && let Some(stream) = self.log_stream.take()
        {
            stream.stop(sink);
            debug!(target: RPC_TARGET, session = self.id, seq, "log stream stopped");
        }
        if let Some(stream) = self.event_streams.remove(&seq) {
            stream.stop(bus);
            debug!(target: RPC_TARGET, session = self.id, seq, "event stream stopped");
        }
    }

    /// Stops every subscription the session owns.
    pub(crate) fn teardown(mut self, sink: &LogSink, bus: &EventBus) {
        if let Some(stream) = self.log_stream.take() {
            stream.stop(sink);
        }
        for (_, stream) in self.event_streams.drain() {
            stream.stop(bus);
        }
    }
}
