//! CBOR framing shared by the agent and its clients.
//!
//! Headers and bodies are consecutive self-delimiting CBOR items. The writer
//! encodes a whole frame into one buffer before taking its lock so that
//! concurrent pushers never interleave a header with another frame's body.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::command::{Command, RequestBody};
use crate::header::{RequestHeader, ResponseHeader};

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The peer closed the stream on a frame boundary.
    #[error("connection closed")]
    Closed,
    /// Reading or writing the underlying stream failed.
    #[error("stream IO failed: {0}")]
    Io(#[from] io::Error),
    /// A value could not be encoded.
    #[error("failed to encode frame: {message}")]
    Encode {
        /// Encoder diagnostic.
        message: String,
    },
    /// Bytes on the stream did not decode into the expected item.
    #[error("failed to decode frame: {message}")]
    Decode {
        /// Decoder diagnostic.
        message: String,
    },
}

impl CodecError {
    fn encode(error: &ciborium::ser::Error<io::Error>) -> Self {
        Self::Encode {
            message: error.to_string(),
        }
    }

    fn decode(error: ciborium::de::Error<io::Error>) -> Self {
        match error {
            ciborium::de::Error::Io(source) if is_disconnect(&source) => Self::Closed,
            ciborium::de::Error::Io(source) => Self::Io(source),
            other => Self::Decode {
                message: other.to_string(),
            },
        }
    }

    /// Returns true when the error means the peer went away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(source) => is_disconnect(source),
            Self::Encode { .. } | Self::Decode { .. } => false,
        }
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Serialised write side of a connection.
///
/// Cloning yields another handle to the same stream and lock.
pub struct FrameWriter<W> {
    inner: Arc<Mutex<WriteHalf<W>>>,
}

#[derive(Debug)]
struct WriteHalf<W> {
    stream: W,
    // Set after a failed write; the stream may hold a partial frame.
    broken: bool,
}

impl<W> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> FrameWriter<W> {
    /// Wraps the write half of a connection.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WriteHalf {
                stream: writer,
                broken: false,
            })),
        }
    }

    /// Writes a header and optional body as one atomic frame.
    ///
    /// After the stream rejects a write every later frame fails with a broken
    /// pipe without touching the stream.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when either value fails to serialise and
    /// [`CodecError::Io`] when the stream rejects the write.
    pub fn write_frame<H, B>(&self, header: &H, body: Option<&B>) -> Result<(), CodecError>
    where
        H: Serialize,
        B: Serialize,
    {
        let mut frame = Vec::with_capacity(64);
        ciborium::ser::into_writer(header, &mut frame).map_err(|e| CodecError::encode(&e))?;
        if let Some(body) = body {
            ciborium::ser::into_writer(body, &mut frame).map_err(|e| CodecError::encode(&e))?;
        }
        let mut half = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if half.broken {
            return Err(CodecError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        let written = half.stream.write_all(&frame).and_then(|()| half.stream.flush());
        if written.is_err() {
            half.broken = true;
        }
        written.map_err(CodecError::from)
    }

    /// Writes a bodyless response header.
    ///
    /// # Errors
    ///
    /// See [`Self::write_frame`].
    pub fn write_response(&self, header: &ResponseHeader) -> Result<(), CodecError> {
        self.write_frame::<_, ()>(header, None)
    }

    /// Writes a response header followed by `body`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_frame`].
    pub fn write_response_with<B: Serialize>(
        &self,
        header: &ResponseHeader,
        body: &B,
    ) -> Result<(), CodecError> {
        self.write_frame(header, Some(body))
    }

    /// Pushes a record under `seq`.
    ///
    /// # Errors
    ///
    /// See [`Self::write_frame`].
    pub fn push<B: Serialize>(&self, seq: u64, record: &B) -> Result<(), CodecError> {
        self.write_frame(&ResponseHeader::ok(seq), Some(record))
    }

    /// Writes a request header followed by the body its command expects.
    ///
    /// # Errors
    ///
    /// See [`Self::write_frame`].
    pub fn write_request(&self, seq: u64, body: &RequestBody) -> Result<(), CodecError> {
        let header = RequestHeader::new(body.command().as_str(), seq);
        match body {
            RequestBody::Handshake(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Event(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::ForceLeave(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Join(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Stream(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Stop(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Monitor(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Query(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Respond(inner) => self.write_frame(&header, Some(inner)),
            RequestBody::Members | RequestBody::Leave => self.write_frame::<_, ()>(&header, None),
        }
    }
}

/// Buffered read side of a connection, decoding one item at a time.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps the read half of a connection.
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Decodes one item of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Closed`] when the stream ends before the first
    /// byte of the item, and [`CodecError::Decode`] when the bytes do not
    /// form a `T`.
    pub fn read_item<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        match self.inner.fill_buf() {
            Ok([]) => return Err(CodecError::Closed),
            Ok(_) => {}
            Err(error) if is_disconnect(&error) => return Err(CodecError::Closed),
            Err(error) => return Err(CodecError::Io(error)),
        }
        ciborium::de::from_reader(&mut self.inner).map_err(CodecError::decode)
    }

    /// Decodes the next request header.
    ///
    /// # Errors
    ///
    /// See [`Self::read_item`].
    pub fn read_request_header(&mut self) -> Result<RequestHeader, CodecError> {
        self.read_item()
    }

    /// Decodes the next response header.
    ///
    /// # Errors
    ///
    /// See [`Self::read_item`].
    pub fn read_response_header(&mut self) -> Result<ResponseHeader, CodecError> {
        self.read_item()
    }

    /// Decodes the body `command` expects, yielding the matching variant.
    ///
    /// Bodyless commands consume nothing from the stream.
    ///
    /// # Errors
    ///
    /// See [`Self::read_item`].
    pub fn read_request_body(&mut self, command: Command) -> Result<RequestBody, CodecError> {
        let body = match command {
            Command::Handshake => RequestBody::Handshake(self.read_item()?),
            Command::Event => RequestBody::Event(self.read_item()?),
            Command::ForceLeave => RequestBody::ForceLeave(self.read_item()?),
            Command::Join => RequestBody::Join(self.read_item()?),
            Command::Members => RequestBody::Members,
            Command::Stream => RequestBody::Stream(self.read_item()?),
            Command::Stop => RequestBody::Stop(self.read_item()?),
            Command::Monitor => RequestBody::Monitor(self.read_item()?),
            Command::Leave => RequestBody::Leave,
            Command::Query => RequestBody::Query(self.read_item()?),
            Command::Respond => RequestBody::Respond(self.read_item()?),
        };
        Ok(body)
    }
}
