//! Shutdown coordination: termination signals and `leave` requests both end
//! up on one latch the main thread waits on.

use std::fmt;
use std::io;
use std::sync::{Mutex, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;
use crate::agent::AgentControl;

/// Why the agent is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The process received a termination signal.
    Signal(i32),
    /// A client issued `leave`.
    Leave,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(formatter, "signal {signal}"),
            Self::Leave => formatter.write_str("leave"),
        }
    }
}

/// One-shot shutdown trigger. The first reason wins.
#[derive(Debug)]
pub struct ShutdownLatch {
    sender: Sender<ShutdownReason>,
    receiver: Receiver<ShutdownReason>,
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        let (sender, receiver) = channel::bounded(1);
        Self { sender, receiver }
    }
}

impl ShutdownLatch {
    /// Creates an untriggered latch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` unless a reason was already recorded.
    pub fn trigger(&self, reason: ShutdownReason) {
        let _ = self.sender.try_send(reason);
    }

    /// Blocks until the latch is triggered.
    #[must_use]
    pub fn wait(&self) -> ShutdownReason {
        self.receiver
            .recv()
            .unwrap_or(ShutdownReason::Leave)
    }
}

impl AgentControl for ShutdownLatch {
    fn shutdown(&self) {
        self.trigger(ShutdownReason::Leave);
    }
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until a signal arrives or [`Self::close`] is called.
    ///
    /// # Errors
    ///
    /// Implementations may fail when signal delivery breaks down.
    fn wait(&self) -> Result<Option<i32>, ShutdownError>;

    /// Releases a pending [`Self::wait`] with `Ok(None)`.
    fn close(&self);
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
pub struct SystemShutdownSignal {
    signals: Mutex<Signals>,
    handle: Handle,
}

impl SystemShutdownSignal {
    /// Installs handlers for SIGTERM, SIGINT, SIGQUIT, and SIGHUP.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::Install`] when registration fails.
    pub fn install() -> Result<Self, ShutdownError> {
        let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        Ok(Self {
            signals: Mutex::new(signals),
            handle,
        })
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<Option<i32>, ShutdownError> {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        let received = signals.forever().next();
        if let Some(signal) = received {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(received)
    }

    fn close(&self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn first_reason_wins() {
        let latch = ShutdownLatch::new();
        latch.trigger(ShutdownReason::Signal(15));
        latch.shutdown();
        assert_eq!(latch.wait(), ShutdownReason::Signal(15));
    }

    #[test]
    fn leave_control_wakes_waiter() {
        let latch = Arc::new(ShutdownLatch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait())
        };
        let control: Arc<dyn AgentControl> = latch;
        control.shutdown();
        assert_eq!(waiter.join().expect("waiter"), ShutdownReason::Leave);
    }
}
