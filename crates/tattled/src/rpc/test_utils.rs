//! Test helpers for the rpc module.

use std::io::{self, Write};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use tattle_proto::{FrameReader, FrameWriter, RequestBody};

use super::connection::{ConnectionHandler, ConnectionStream};
use crate::agent::AgentControl;

/// In-memory connection write half.
#[derive(Clone, Default)]
pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub(crate) fn reader(&self) -> FrameReader<io::Cursor<Vec<u8>>> {
        let bytes = self.0.lock().expect("capture lock").clone();
        FrameReader::new(io::Cursor::new(bytes))
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("capture lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encodes `requests` the way a client would send them.
pub(crate) fn encode_requests(requests: &[(u64, RequestBody)]) -> Vec<u8> {
    let capture = Capture::default();
    let writer = FrameWriter::new(capture.clone());
    for (seq, body) in requests {
        writer.write_request(*seq, body).expect("encode request");
    }
    let bytes = capture.0.lock().expect("capture lock").clone();
    bytes
}

pub(crate) struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
        });
        (count, handler)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, _stream: ConnectionStream) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records shutdown requests.
#[derive(Default)]
pub(crate) struct CountingControl(AtomicUsize);

impl CountingControl {
    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl AgentControl for CountingControl {
    fn shutdown(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
