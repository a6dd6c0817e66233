//! Fan-out of membership, user, and query events to registered handlers.

use std::sync::{Arc, PoisonError, RwLock};

use super::engine::Member;

/// Membership change category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberEventKind {
    /// Members joined.
    Join,
    /// Members left gracefully.
    Leave,
    /// Members stopped responding.
    Failed,
    /// Member metadata changed.
    Update,
    /// Failed members were removed from the list.
    Reap,
}

impl MemberEventKind {
    /// Event type name used by stream filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "member-join",
            Self::Leave => "member-leave",
            Self::Failed => "member-failed",
            Self::Update => "member-update",
            Self::Reap => "member-reap",
        }
    }
}

/// A batch of members that changed in the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEvent {
    /// Kind of change.
    pub kind: MemberEventKind,
    /// Affected members.
    pub members: Vec<Member>,
}

/// A user event broadcast through the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    /// Lamport time at which the event was issued.
    pub ltime: u64,
    /// Event name.
    pub name: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Whether older events with the same name may be coalesced.
    pub coalesce: bool,
}

/// A query delivered to the local member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    /// Identifier used to respond.
    pub id: u64,
    /// Lamport time at which the query was issued.
    pub ltime: u64,
    /// Query name.
    pub name: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// Anything published on the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Membership change.
    Member(MemberEvent),
    /// User event.
    User(UserEvent),
    /// Incoming query.
    Query(QueryEvent),
}

/// Receives published events.
///
/// Handlers run on the publishing thread and must not block.
pub trait EventHandler: Send + Sync {
    /// Called once per published event.
    fn handle_event(&self, event: &Event);
}

/// Registry of event handlers.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Creates a bus with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler; it sees every event published afterwards.
    pub fn register_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Removes a handler previously registered with the same `Arc`.
    pub fn deregister_event_handler(&self, handler: &Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|existing| !same_handler(existing, handler));
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every registered handler.
    pub fn publish(&self, event: &Event) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler.handle_event(event);
        }
    }
}

fn same_handler(left: &Arc<dyn EventHandler>, right: &Arc<dyn EventHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(left).cast::<()>(),
        Arc::as_ptr(right).cast::<()>(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.0.lock().expect("recorder lock").push(event.clone());
        }
    }

    fn user(name: &str) -> Event {
        Event::User(UserEvent {
            ltime: 1,
            name: name.to_owned(),
            payload: Vec::new(),
            coalesce: false,
        })
    }

    #[test]
    fn deregistered_handlers_stop_receiving() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn EventHandler> = recorder.clone();
        bus.register_event_handler(Arc::clone(&handler));
        bus.publish(&user("first"));
        bus.deregister_event_handler(&handler);
        bus.publish(&user("second"));

        assert_eq!(recorder.0.lock().expect("lock").as_slice(), &[user("first")]);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn deregister_only_removes_matching_handler() {
        let bus = EventBus::new();
        let first: Arc<dyn EventHandler> = Arc::new(Recorder::default());
        let second: Arc<dyn EventHandler> = Arc::new(Recorder::default());
        bus.register_event_handler(Arc::clone(&first));
        bus.register_event_handler(Arc::clone(&second));
        bus.deregister_event_handler(&first);
        assert_eq!(bus.handler_count(), 1);
    }
}
