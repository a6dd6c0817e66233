//! The RPC endpoint address.
//!
//! Operators write the endpoint as `tcp://HOST:PORT`, `unix:///PATH`, or the
//! bare `HOST:PORT` shorthand, which means TCP. The URL form is canonical and
//! is what the endpoint serialises back to.

use std::fmt;
use std::fs::DirBuilder;
use std::io;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Endpoint the agent's RPC listener binds and clients dial.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum SocketEndpoint {
    /// Unix domain socket at `path`.
    Unix {
        /// Socket file location.
        path: Utf8PathBuf,
    },
    /// TCP listener on `host:port`.
    Tcp {
        /// Host name or IP literal, without brackets.
        host: String,
        /// Port; zero asks the listener for an ephemeral one.
        port: u16,
    },
}

impl SocketEndpoint {
    /// Unix socket endpoint at `path`.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// TCP endpoint on `host:port`.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Socket file location for Unix endpoints.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path } => Some(path.as_path()),
            Self::Tcp { .. } => None,
        }
    }

    /// Creates the directory that will hold a Unix socket, owner-only.
    ///
    /// TCP endpoints need nothing and succeed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SocketPreparationError`] when the path has no parent or the
    /// directory cannot be created.
    pub fn ensure_socket_directory(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .ok_or_else(|| SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            })?;

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o700);

        match builder.create(parent) {
            Err(source) if source.kind() != io::ErrorKind::AlreadyExists => {
                Err(SocketPreparationError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })
            }
            _ => Ok(()),
        }
    }

    fn parse_url(input: &str) -> Result<Self, SocketParseError> {
        let url = Url::parse(input).map_err(|source| SocketParseError::Url {
            input: input.to_owned(),
            source,
        })?;
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .map(|host| host.trim_start_matches('[').trim_end_matches(']'))
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                let port = url
                    .port()
                    .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
                Ok(Self::tcp(host, port))
            }
            "unix" if url.path().is_empty() || url.path() == "/" => {
                Err(SocketParseError::MissingUnixPath(input.to_owned()))
            }
            "unix" => Ok(Self::unix(url.path())),
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }

    fn parse_host_port(input: &str) -> Result<Self, SocketParseError> {
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| SocketParseError::MissingPort(input.to_owned()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(SocketParseError::MissingHost(input.to_owned()));
        }
        let port = port
            .parse()
            .map_err(|_| SocketParseError::MissingPort(input.to_owned()))?;
        Ok(Self::tcp(host, port))
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(formatter, "unix://{path}"),
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.contains("://") {
            Self::parse_url(input)
        } else {
            Self::parse_host_port(input)
        }
    }
}

impl TryFrom<String> for SocketEndpoint {
    type Error = SocketParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SocketEndpoint> for String {
    fn from(endpoint: SocketEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Errors encountered while parsing a [`SocketEndpoint`] from text.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Only `tcp` and `unix` endpoints exist.
    #[error("unsupported RPC endpoint scheme '{0}', expected tcp or unix")]
    UnsupportedScheme(String),
    /// TCP endpoint without a host.
    #[error("RPC endpoint '{0}' names no host")]
    MissingHost(String),
    /// TCP endpoint without a usable port.
    #[error("RPC endpoint '{0}' names no valid port")]
    MissingPort(String),
    /// Unix endpoint without a socket path.
    #[error("RPC endpoint '{0}' names no socket path")]
    MissingUnixPath(String),
    /// Text with a scheme that is not a URL.
    #[error("RPC endpoint '{input}' is not a valid URL: {source}")]
    Url {
        /// Rejected text.
        input: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
}

/// Errors raised while creating the directory for a Unix socket.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// The socket path is a bare file name or the filesystem root.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Offending socket path.
        path: Utf8PathBuf,
    },
    /// The directory could not be created.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Filesystem error.
        #[source]
        source: io::Error,
    },
}
