//! Accept loop for the RPC endpoint.
//!
//! The accept socket is polled in non-blocking mode so that shutdown is a flag
//! store rather than a wake-up dance; each accepted connection is switched back
//! to blocking mode and handed to its own session thread. Writes to a client
//! that stops reading fail after [`WRITE_TIMEOUT`] instead of blocking forever.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use tattle_config::SocketEndpoint;

use super::RPC_TARGET;
use super::connection::{ConnectionHandler, ConnectionStream};
use super::errors::ListenerError;

#[cfg(unix)]
use std::os::unix::net::UnixListener;

const IDLE_POLL: Duration = Duration::from_millis(25);
const ERROR_POLL: Duration = Duration::from_millis(150);
pub(crate) const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Socket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Socket {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Accepts one pending connection; `None` when nothing is waiting.
    fn poll_accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Listener bound to the configured RPC endpoint, not yet accepting.
#[derive(Debug)]
pub(crate) struct RpcListener {
    endpoint: SocketEndpoint,
    socket: Socket,
}

impl RpcListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let socket = match endpoint {
            SocketEndpoint::Tcp { host, port } => Socket::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => Socket::Unix(unix::bind(path.as_std_path())?),
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            socket,
        })
    }

    /// Bound TCP address; `None` for unix sockets.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.socket {
            Socket::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Socket::Unix(_) => None,
        }
    }

    /// Starts the accept thread.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.socket.set_nonblocking() {
            self.remove_socket_file();
            return Err(ListenerError::NonBlocking { source });
        }
        let stop = Arc::new(AtomicBool::new(false));
        let accept_loop = AcceptLoop {
            listener: self,
            stop: Arc::clone(&stop),
            handler,
            last_error: None,
        };
        let thread = thread::Builder::new()
            .name(String::from("rpc-accept"))
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            stop,
            thread: Some(thread),
        })
    }

    fn remove_socket_file(&self) {
        #[cfg(unix)]
        {
            if let Some(path) = self.endpoint.unix_path() {
                unix::remove(path.as_std_path());
            }
        }
    }
}

struct AcceptLoop {
    listener: RpcListener,
    stop: Arc<AtomicBool>,
    handler: Arc<dyn ConnectionHandler>,
    last_error: Option<io::ErrorKind>,
}

impl AcceptLoop {
    fn run(mut self) {
        info!(target: RPC_TARGET, endpoint = %self.listener.endpoint, "rpc listener active");
        while !self.stop.load(Ordering::SeqCst) {
            match self.listener.socket.poll_accept() {
                Ok(Some(stream)) => {
                    self.last_error = None;
                    self.spawn_session(stream);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    // Repeats of the same failure are logged once.
                    if self.last_error.replace(error.kind()) != Some(error.kind()) {
                        warn!(target: RPC_TARGET, error = %error, "rpc accept failed");
                    }
                    thread::sleep(ERROR_POLL);
                }
            }
        }
        debug!(target: RPC_TARGET, endpoint = %self.listener.endpoint, "rpc listener stopped");
        self.listener.remove_socket_file();
    }

    fn spawn_session(&self, stream: ConnectionStream) {
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(String::from("rpc-session"))
            .spawn(move || handler.handle(stream));
        if let Err(error) = spawned {
            warn!(target: RPC_TARGET, error = %error, "failed to spawn session thread");
        }
    }
}

/// Handle to the background accept thread.
pub(crate) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops accepting; the loop exits within one poll interval.
    pub(crate) fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        self.thread
            .take()
            .map_or(Ok(()), |thread| thread.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::io;
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;

    use tracing::{debug, warn};

    use crate::rpc::RPC_TARGET;
    use crate::rpc::errors::ListenerError;

    /// What currently occupies the socket path.
    enum Occupant {
        Nothing,
        /// A socket file nobody answers on, left behind by a dead agent.
        Stale,
        Live,
        Other,
    }

    fn probe(path: &Path) -> Result<Occupant, ListenerError> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Occupant::Nothing),
            Err(source) => {
                return Err(ListenerError::UnixMetadata {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        if !metadata.file_type().is_socket() {
            return Ok(Occupant::Other);
        }
        match UnixStream::connect(path) {
            Ok(_) => Ok(Occupant::Live),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                Ok(Occupant::Stale)
            }
            Err(source) => Err(ListenerError::UnixConnect {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub(super) fn bind(path: &Path) -> Result<UnixListener, ListenerError> {
        let shown = path.display().to_string();
        match probe(path)? {
            Occupant::Nothing => {}
            Occupant::Stale => {
                debug!(target: RPC_TARGET, path = %shown, "removing stale unix socket");
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: shown.clone(),
                    source,
                })?;
            }
            Occupant::Live => return Err(ListenerError::UnixInUse { path: shown }),
            Occupant::Other => return Err(ListenerError::UnixNotSocket { path: shown }),
        }
        UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
            path: shown,
            source,
        })
    }

    pub(super) fn remove(path: &Path) {
        if let Err(error) = fs::remove_file(path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: RPC_TARGET,
                error = %error,
                path = %path.display(),
                "failed to remove unix socket file"
            );
        }
    }
}
