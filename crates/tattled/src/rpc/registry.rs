//! Registry of live sessions so agent shutdown can close every connection.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::RPC_TARGET;
use super::connection::ConnectionStream;

#[derive(Debug, Default)]
struct Sessions {
    next_id: u64,
    closed: bool,
    open: HashMap<u64, ConnectionStream>,
}

/// Tracks a closing handle for every open session.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<Sessions>,
    drained: Condvar,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records a session; `closer` is a clone of its connection.
    ///
    /// Once [`Self::close_all`] has run, the connection is shut down instead
    /// and `None` is returned.
    pub(crate) fn add(&self, closer: ConnectionStream) -> Option<u64> {
        let mut sessions = self.lock();
        if sessions.closed {
            drop(sessions);
            if let Err(error) = closer.shutdown() {
                debug!(target: RPC_TARGET, error = %error, "late session already closed");
            }
            return None;
        }
        sessions.next_id += 1;
        let id = sessions.next_id;
        sessions.open.insert(id, closer);
        Some(id)
    }

    /// Forgets a session that has finished tearing down.
    pub(crate) fn remove(&self, id: u64) {
        let mut sessions = self.lock();
        sessions.open.remove(&id);
        if sessions.open.is_empty() {
            self.drained.notify_all();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().open.len()
    }

    /// Refuses further sessions and shuts down every registered connection.
    ///
    /// Session threads observe end-of-stream and run their own teardown.
    /// Returns how many sessions were open.
    pub(crate) fn close_all(&self) -> usize {
        let mut sessions = self.lock();
        sessions.closed = true;
        for (id, stream) in &sessions.open {
            if let Err(error) = stream.shutdown() {
                debug!(target: RPC_TARGET, session = id, error = %error, "session already closed");
            }
        }
        sessions.open.len()
    }

    /// Blocks until every session has removed itself or `timeout` passes.
    ///
    /// Returns how many sessions were still open.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> usize {
        let (sessions, _) = self
            .drained
            .wait_timeout_while(self.lock(), timeout, |sessions| !sessions.open.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        let remaining = sessions.open.len();
        if remaining > 0 {
            warn!(target: RPC_TARGET, sessions = remaining, "sessions still tearing down");
        }
        remaining
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
