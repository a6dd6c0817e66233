//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;
use tattle_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader for an agent on an ephemeral loopback port.
///
/// The unix socket variant keeps its directory alive for as long as the
/// loader exists.
pub struct TestConfigLoader {
    endpoint: SocketEndpoint,
    _socket_dir: Option<TempDir>,
}

impl TestConfigLoader {
    /// Listens on `127.0.0.1:0`.
    #[must_use]
    pub fn tcp() -> Self {
        Self {
            endpoint: SocketEndpoint::tcp("127.0.0.1", 0),
            _socket_dir: None,
        }
    }

    /// Listens on a socket inside a fresh temporary directory.
    #[must_use]
    pub fn unix() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory for socket");
        let path = dir.path().join("run").join("tattled.sock");
        let path = path
            .to_str()
            .expect("temporary socket path was not valid UTF-8")
            .to_owned();
        Self {
            endpoint: SocketEndpoint::unix(path),
            _socket_dir: Some(dir),
        }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            rpc_addr: self.endpoint.clone(),
            node_name: String::from("alpha"),
            query_timeout_ms: 500,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("tattled"),
            OsString::from("--rpc-addr"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
