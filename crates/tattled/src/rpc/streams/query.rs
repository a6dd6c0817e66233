//! Query stream: relays acks and responses until the query deadline.

use std::io::Write;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use crossbeam::select;
use tracing::{debug, warn};

use tattle_proto::{CodecError, FrameWriter, QueryRecord};

use crate::agent::{NodeResponse, QueryHandle};
use crate::rpc::RPC_TARGET;

/// Spawns the relay for `handle`; it ends after pushing `done` or on the
/// first failed write.
pub(crate) fn spawn_query_stream<W>(
    seq: u64,
    handle: QueryHandle,
    writer: FrameWriter<W>,
) -> Option<JoinHandle<()>>
where
    W: Write + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("rpc-query-{seq}"))
        .spawn(move || match relay(seq, &handle, &writer) {
            Ok(()) => debug!(target: RPC_TARGET, seq, "query stream done"),
            Err(error) => debug!(target: RPC_TARGET, seq, error = %error, "query stream aborted"),
        });
    match spawned {
        Ok(join) => Some(join),
        Err(error) => {
            warn!(target: RPC_TARGET, seq, error = %error, "failed to spawn query stream");
            None
        }
    }
}

fn relay<W: Write>(
    seq: u64,
    handle: &QueryHandle,
    writer: &FrameWriter<W>,
) -> Result<(), CodecError> {
    let deadline = channel::at(handle.deadline());
    let idle_acks: Receiver<String> = channel::never();
    let idle_responses: Receiver<NodeResponse> = channel::never();
    let mut acks_open = true;
    let mut responses_open = true;
    loop {
        let acks = if acks_open { handle.ack_rx() } else { &idle_acks };
        let responses = if responses_open {
            handle.response_rx()
        } else {
            &idle_responses
        };
        select! {
            recv(acks) -> ack => match ack {
                Ok(from) => writer.push(seq, &QueryRecord::ack(from))?,
                Err(_) => acks_open = false,
            },
            recv(responses) -> response => match response {
                Ok(NodeResponse { from, payload }) => {
                    writer.push(seq, &QueryRecord::response(from, payload))?;
                }
                Err(_) => responses_open = false,
            },
            recv(deadline) -> _ => {
                return writer.push(seq, &QueryRecord::done());
            },
        }
    }
}
