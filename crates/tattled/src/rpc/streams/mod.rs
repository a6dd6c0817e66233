//! Push subscriptions owned by a session.
//!
//! Log and event streams share one shape: a handler registered with a
//! producer enqueues into a bounded queue without blocking, and a forwarder
//! thread drains the queue onto the connection. Stopping a stream closes the
//! queue and joins the forwarder, so no record follows the stop reply.

mod event;
mod log;
mod query;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, warn};

use tattle_proto::FrameWriter;

use super::RPC_TARGET;

pub(crate) use event::EventStream;
pub(crate) use log::LogStream;
pub(crate) use query::spawn_query_stream;

/// Producer side of a stream queue. Never blocks.
struct StreamQueue<T> {
    seq: u64,
    kind: &'static str,
    sender: Mutex<Option<Sender<T>>>,
    dropping: AtomicBool,
}

impl<T: Send + 'static> StreamQueue<T> {
    fn bounded(seq: u64, kind: &'static str, capacity: usize) -> (Self, Receiver<T>) {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        let queue = Self {
            seq,
            kind,
            sender: Mutex::new(Some(sender)),
            dropping: AtomicBool::new(false),
        };
        (queue, receiver)
    }

    /// Enqueues `item`, dropping it when the queue is full or closed.
    fn offer(&self, item: T) {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return;
        };
        match sender.try_send(item) {
            Ok(()) => self.dropping.store(false, Ordering::Relaxed),
            Err(TrySendError::Full(_)) => {
                if !self.dropping.swap(true, Ordering::Relaxed) {
                    report_dropped(self.seq, self.kind);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Closes the queue; the forwarder drains what remains and exits.
    fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

// The producer may hold a lock the logging path needs, so the diagnostic is
// emitted from its own thread.
fn report_dropped(seq: u64, kind: &'static str) {
    let spawned = thread::Builder::new()
        .name(String::from("rpc-drop-report"))
        .spawn(move || {
            warn!(
                target: RPC_TARGET,
                seq,
                stream = kind,
                "stream queue full, dropping records"
            );
        });
    drop(spawned);
}

/// Spawns the thread that pushes every queued record under `seq`.
fn spawn_forwarder<T, W>(
    seq: u64,
    kind: &'static str,
    receiver: Receiver<T>,
    writer: FrameWriter<W>,
) -> Option<JoinHandle<()>>
where
    T: Serialize + Send + 'static,
    W: Write + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("rpc-{kind}-{seq}"))
        .spawn(move || {
            for record in &receiver {
                if let Err(error) = writer.push(seq, &record) {
                    debug!(target: RPC_TARGET, seq, stream = kind, error = %error, "stream push failed");
                    return;
                }
            }
            debug!(target: RPC_TARGET, seq, stream = kind, "stream closed");
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(error) => {
            warn!(target: RPC_TARGET, seq, stream = kind, error = %error, "failed to spawn stream forwarder");
            None
        }
    }
}

fn join_forwarder(seq: u64, kind: &'static str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle
        && handle.join().is_err()
    {
        warn!(target: RPC_TARGET, seq, stream = kind, "stream forwarder panicked");
    }
}
