//! Socket transport helpers for the tattle CLI.
//!
//! The functions here establish connections to the agent's RPC endpoint and
//! wrap the resulting streams in a uniform [`Connection`] type so that the
//! multiplexer can stay transport agnostic.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tattle_config::SocketEndpoint;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use crate::client::ClientError;

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// An open connection to the agent.
#[derive(Debug)]
pub enum Connection {
    /// TCP transport.
    Tcp(TcpStream),
    /// Unix domain socket transport.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    /// Closes both directions; a peer that already went away is not an error.
    pub(crate) fn shutdown(&self) -> io::Result<()> {
        let outcome = match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match outcome {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Connects to `endpoint`.
///
/// # Errors
///
/// Returns [`ClientError::Unreachable`] when the endpoint cannot be resolved
/// or nothing accepts the connection.
pub fn connect(endpoint: &SocketEndpoint) -> Result<Connection, ClientError> {
    let unreachable = |source: io::Error| ClientError::Unreachable {
        endpoint: endpoint.to_string(),
        source,
    };
    match endpoint {
        SocketEndpoint::Tcp { host, port } => {
            let address = resolve_tcp_address(host, *port).map_err(unreachable)?;
            let stream =
                TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT).map_err(unreachable)?;
            stream.set_nodelay(true).map_err(unreachable)?;
            Ok(Connection::Tcp(stream))
        }
        SocketEndpoint::Unix { path } => {
            #[cfg(unix)]
            {
                connect_unix(path.as_str()).map_err(unreachable)
            }

            #[cfg(not(unix))]
            {
                let _ = path;
                Err(unreachable(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "platform does not support Unix sockets",
                )))
            }
        }
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .find(|addr| matches!(addr, SocketAddr::V4(_) | SocketAddr::V6(_)))
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, CONNECTION_TIMEOUT)?;
    let stream: UnixStream = socket.into();
    Ok(Connection::Unix(stream))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn refused_tcp_connection_is_unreachable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let error = connect(&SocketEndpoint::tcp("127.0.0.1", port)).expect_err("refused");
        assert!(matches!(error, ClientError::Unreachable { .. }));
        assert!(
            error.to_string().starts_with("could not reach agent at tcp://127.0.0.1:"),
            "{error}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_unix_socket_is_unreachable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.sock");
        let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
        let error = connect(&endpoint).expect_err("missing socket");
        assert!(matches!(error, ClientError::Unreachable { .. }));
    }
}
