//! Agent bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use tattle_config::{Config, SocketPreparationError};

use crate::agent::{
    AgentControl, DEFAULT_BACKLOG, EventBus, LogSink, StandaloneEngine, StandaloneOptions,
};
use crate::health::HealthReporter;
use crate::rpc::{self, AgentServices, ListenerError, RpcServerHandle, StreamLimits};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the agent configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when no valid configuration is found.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare rpc socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
}

/// A bootstrapped agent, ready to serve RPC clients.
pub struct Agent {
    config: Config,
    telemetry: TelemetryHandle,
    log_sink: Arc<LogSink>,
    event_bus: Arc<EventBus>,
    engine: Arc<StandaloneEngine>,
}

impl Agent {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// The sink `monitor` subscriptions read from.
    #[must_use]
    pub const fn log_sink(&self) -> &Arc<LogSink> {
        &self.log_sink
    }

    /// The bus `stream` subscriptions read from.
    #[must_use]
    pub const fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// The membership engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<StandaloneEngine> {
        &self.engine
    }

    /// Starts the RPC endpoint; `control` receives `leave` shutdown requests.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the endpoint cannot be bound.
    pub fn serve(&self, control: Arc<dyn AgentControl>) -> Result<RpcServerHandle, ListenerError> {
        let services = AgentServices {
            engine: self.engine.clone(),
            log_sink: Arc::clone(&self.log_sink),
            event_bus: Arc::clone(&self.event_bus),
            control,
        };
        rpc::serve(
            self.config.rpc_addr(),
            services,
            StreamLimits::from_config(&self.config),
        )
    }
}

/// Bootstraps the agent using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry, or socket
/// preparation fails. The reporter is told about the failure first.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: &Arc<dyn HealthReporter>,
) -> Result<Agent, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let log_sink = Arc::new(LogSink::with_backlog(DEFAULT_BACKLOG));
    let telemetry = match telemetry::initialise(&config, &log_sink) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = config.rpc_addr().ensure_socket_directory() {
        let error = BootstrapError::Socket { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let event_bus = Arc::new(EventBus::new());
    let mut options = StandaloneOptions::named(config.node_name());
    options.query_timeout = config.query_timeout();
    let engine = Arc::new(StandaloneEngine::new(options, Arc::clone(&event_bus)));
    reporter.bootstrap_succeeded(&config);

    Ok(Agent {
        config,
        telemetry,
        log_sink,
        event_bus,
        engine,
    })
}
