//! Minimal blocking client that speaks the wire protocol directly.
//!
//! Unlike the CLI's multiplexer it reads frames strictly in order, which lets
//! scenarios assert exactly what the agent wrote and when.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use serde::de::DeserializeOwned;

use tattle_proto::{
    FrameReader, FrameWriter, HandshakeRequest, MAX_IPC_VERSION, RequestBody,
    RequestHeader, ResponseHeader,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A raw protocol connection to the agent.
pub struct TestClient {
    writer: FrameWriter<TcpStream>,
    reader: FrameReader<TcpStream>,
    closer: TcpStream,
}

impl TestClient {
    /// Connects to `addr`; reads time out instead of hanging a failing test.
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to agent");
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let read_half = stream.try_clone().expect("clone client stream");
        let closer = stream.try_clone().expect("clone client stream");
        Self {
            writer: FrameWriter::new(stream),
            reader: FrameReader::new(read_half),
            closer,
        }
    }

    /// Writes a request without waiting for the reply.
    pub fn send(&self, seq: u64, body: &RequestBody) {
        self.writer.write_request(seq, body).expect("send request");
    }

    /// Writes a bodyless request under an arbitrary command name.
    pub fn send_command(&self, command: &str, seq: u64) {
        self.writer
            .write_frame::<_, ()>(&RequestHeader::new(command, seq), None)
            .expect("send raw command");
    }

    /// Writes a well-formed header for `command` followed by a body of the
    /// wrong shape.
    pub fn send_malformed(&self, command: &str, seq: u64) {
        self.writer
            .write_frame(&RequestHeader::new(command, seq), Some(&"not a request body"))
            .expect("send malformed request");
    }

    /// Closes the connection from the client side.
    pub fn disconnect(&self) {
        self.closer
            .shutdown(Shutdown::Both)
            .expect("shut client connection down");
    }

    /// Sends `body` and reads the reply header, which must echo `seq`.
    pub fn call(&mut self, seq: u64, body: &RequestBody) -> ResponseHeader {
        self.send(seq, body);
        let header = self.read_header();
        assert_eq!(header.seq, seq, "reply arrived out of order: {header:?}");
        header
    }

    /// Negotiates the current protocol version.
    pub fn handshake(&mut self, seq: u64) -> ResponseHeader {
        self.call(
            seq,
            &RequestBody::Handshake(HandshakeRequest {
                version: MAX_IPC_VERSION,
            }),
        )
    }

    /// Reads the next header, whether a reply or a pushed record.
    pub fn read_header(&mut self) -> ResponseHeader {
        self.reader
            .read_response_header()
            .expect("read response header")
    }

    /// Reads the body that follows a header.
    pub fn read_body<T: DeserializeOwned>(&mut self) -> T {
        self.reader.read_item().expect("read body")
    }

    /// Reads a pushed record under `seq`.
    pub fn read_record<T: DeserializeOwned>(&mut self, seq: u64) -> T {
        let header = self.read_header();
        assert_eq!(header.seq, seq, "record arrived under the wrong sequence");
        assert!(header.is_ok(), "record header carried an error: {header:?}");
        self.read_body()
    }

    /// Returns true once the agent has closed its end.
    pub fn is_closed_by_agent(&mut self) -> bool {
        match self.reader.read_response_header() {
            Err(error) => error.is_closed(),
            Ok(header) => panic!("expected the agent to close the connection, got {header:?}"),
        }
    }
}
