//! Event stream: forwards bus events that pass a filter.

use std::io::Write;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;

use tattle_proto::{EventRecord, FrameWriter};

use super::{StreamQueue, join_forwarder, spawn_forwarder};
use crate::agent::{Event, EventBus, EventHandler, MemberEventKind};
use crate::rpc::filter::EventFilter;
use crate::rpc::wire;

const KIND: &str = "event";

struct FilteredQueue {
    filter: EventFilter,
    queue: StreamQueue<EventRecord>,
}

impl EventHandler for FilteredQueue {
    fn handle_event(&self, event: &Event) {
        if self.filter.matches(event) {
            self.queue.offer(to_record(event));
        }
    }
}

fn to_record(event: &Event) -> EventRecord {
    match event {
        Event::Member(member) => {
            let members = member.members.iter().map(wire::member).collect();
            match member.kind {
                MemberEventKind::Join => EventRecord::MemberJoin { members },
                MemberEventKind::Leave => EventRecord::MemberLeave { members },
                MemberEventKind::Failed => EventRecord::MemberFailed { members },
                MemberEventKind::Update => EventRecord::MemberUpdate { members },
                MemberEventKind::Reap => EventRecord::MemberReap { members },
            }
        }
        Event::User(user) => EventRecord::User {
            ltime: user.ltime,
            name: user.name.clone(),
            payload: user.payload.clone(),
            coalesce: user.coalesce,
        },
        Event::Query(query) => EventRecord::Query {
            id: query.id,
            ltime: query.ltime,
            name: query.name.clone(),
            payload: query.payload.clone(),
        },
    }
}

/// A session's event subscription.
pub(crate) struct EventStream {
    seq: u64,
    handler: Arc<FilteredQueue>,
    pending: Option<Receiver<EventRecord>>,
    forwarder: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Registers with `bus`; events queue up until [`Self::start`].
    pub(crate) fn register(seq: u64, filter: EventFilter, bus: &EventBus, capacity: usize) -> Self {
        let (queue, receiver) = StreamQueue::bounded(seq, KIND, capacity);
        let handler = Arc::new(FilteredQueue { filter, queue });
        bus.register_event_handler(Arc::clone(&handler) as Arc<dyn EventHandler>);
        Self {
            seq,
            handler,
            pending: Some(receiver),
            forwarder: None,
        }
    }

    /// Starts pushing queued events onto the connection.
    pub(crate) fn start<W: Write + Send + 'static>(&mut self, writer: FrameWriter<W>) {
        if let Some(receiver) = self.pending.take() {
            self.forwarder = spawn_forwarder(self.seq, KIND, receiver, writer);
        }
    }

    /// Deregisters from `bus`, closes the queue, and waits for the forwarder.
    pub(crate) fn stop(mut self, bus: &EventBus) {
        let handler: Arc<dyn EventHandler> = self.handler.clone();
        bus.deregister_event_handler(&handler);
        self.handler.queue.close();
        join_forwarder(self.seq, KIND, self.forwarder.take());
    }
}
