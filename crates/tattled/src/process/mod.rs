//! Agent process lifecycle: bootstrap, serve, wait for shutdown, close.

mod shutdown;

use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

use crate::agent::AgentControl;
use crate::bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::rpc::ListenerError;

pub use shutdown::{
    ShutdownError, ShutdownLatch, ShutdownReason, ShutdownSignal, SystemShutdownSignal,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors surfaced while running the agent.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The RPC endpoint failed.
    #[error("rpc endpoint failed: {0}")]
    Listener(#[from] ListenerError),
    /// Signal handling could not be set up.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Runs the agent with the production collaborators until it is asked to stop.
///
/// # Errors
///
/// Returns [`LaunchError`] when the agent cannot start or its listener fails.
pub fn run_agent() -> Result<(), LaunchError> {
    let signal = Arc::new(SystemShutdownSignal::install()?);
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    run_agent_with(&SystemConfigLoader, &reporter, signal)
}

/// Runs the agent with injected collaborators.
///
/// Returns after a signal or a `leave` request once every session is closed.
///
/// # Errors
///
/// Returns [`LaunchError`] when the agent cannot start or its listener fails.
pub fn run_agent_with<S: ShutdownSignal + 'static>(
    loader: &dyn ConfigLoader,
    reporter: &Arc<dyn HealthReporter>,
    signal: Arc<S>,
) -> Result<(), LaunchError> {
    let agent = bootstrap_with(loader, reporter)?;
    let latch = Arc::new(ShutdownLatch::new());
    let server = agent.serve(Arc::clone(&latch) as Arc<dyn AgentControl>)?;
    reporter.listener_ready(agent.config().rpc_addr(), server.local_addr());

    let watcher = {
        let latch = Arc::clone(&latch);
        let signal = Arc::clone(&signal);
        thread::Builder::new()
            .name(String::from("signal-watch"))
            .spawn(move || match signal.wait() {
                Ok(Some(number)) => latch.trigger(ShutdownReason::Signal(number)),
                Ok(None) => {}
                Err(error) => warn!(target: PROCESS_TARGET, error = %error, "signal watch failed"),
            })
            .ok()
    };

    let reason = latch.wait();
    reporter.shutdown_requested(reason);
    signal.close();
    if let Some(watcher) = watcher
        && watcher.join().is_err()
    {
        warn!(target: PROCESS_TARGET, "signal watcher panicked");
    }
    server.shutdown()?;
    reporter.shutdown_complete();
    info!(target: PROCESS_TARGET, %reason, "shutdown sequence completed");
    Ok(())
}
