//! The agent's log sink: keeps a backlog of recent lines and fans new lines
//! out to registered handlers.
//!
//! Handlers are invoked while the sink lock is held so that every handler
//! observes lines in the same order. A handler that blocks, or that logs
//! synchronously back into the sink, stalls or deadlocks the agent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Number of recent lines replayed to newly registered handlers.
pub const DEFAULT_BACKLOG: usize = 512;

/// Receives formatted log lines.
pub trait LogHandler: Send + Sync {
    /// Called once per line; must not block.
    fn handle_log(&self, line: &str);
}

struct SinkState {
    backlog: VecDeque<String>,
    handlers: Vec<Arc<dyn LogHandler>>,
}

/// Central log line distributor.
pub struct LogSink {
    capacity: usize,
    state: Mutex<SinkState>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::with_backlog(DEFAULT_BACKLOG)
    }
}

impl LogSink {
    /// Creates a sink replaying up to `capacity` recent lines on registration.
    #[must_use]
    pub fn with_backlog(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(SinkState {
                backlog: VecDeque::with_capacity(capacity),
                handlers: Vec::new(),
            }),
        }
    }

    /// Registers a handler, first replaying the backlog to it.
    pub fn register_handler(&self, handler: Arc<dyn LogHandler>) {
        let mut state = self.lock();
        for line in &state.backlog {
            handler.handle_log(line);
        }
        state.handlers.push(handler);
    }

    /// Removes a handler previously registered with the same `Arc`.
    pub fn deregister_handler(&self, handler: &Arc<dyn LogHandler>) {
        self.lock().handlers.retain(|existing| {
            !std::ptr::eq(
                Arc::as_ptr(existing).cast::<()>(),
                Arc::as_ptr(handler).cast::<()>(),
            )
        });
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Records a line and hands it to every handler.
    pub fn write_line(&self, line: &str) {
        let mut state = self.lock();
        if self.capacity > 0 {
            if state.backlog.len() == self.capacity {
                state.backlog.pop_front();
            }
            state.backlog.push_back(line.to_owned());
        }
        for handler in &state.handlers {
            handler.handle_log(line);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl LogHandler for Collect {
        fn handle_log(&self, line: &str) {
            self.0.lock().expect("collect lock").push(line.to_owned());
        }
    }

    impl Collect {
        fn lines(&self) -> Vec<String> {
            self.0.lock().expect("collect lock").clone()
        }
    }

    #[rstest]
    #[case::disabled(0, &[])]
    #[case::bounded(2, &["[INFO] b", "[INFO] c"])]
    #[case::roomy(8, &["[INFO] a", "[INFO] b", "[INFO] c"])]
    fn backlog_replays_recent_lines(#[case] capacity: usize, #[case] expected: &[&str]) {
        let sink = LogSink::with_backlog(capacity);
        for line in ["[INFO] a", "[INFO] b", "[INFO] c"] {
            sink.write_line(line);
        }
        let collect = Arc::new(Collect::default());
        sink.register_handler(collect.clone());
        assert_eq!(collect.lines(), expected);
    }

    #[rstest]
    fn deregistered_handler_sees_no_more_lines() {
        let sink = LogSink::with_backlog(0);
        let collect = Arc::new(Collect::default());
        let handler: Arc<dyn LogHandler> = collect.clone();
        sink.register_handler(Arc::clone(&handler));
        sink.write_line("[INFO] kept");
        sink.deregister_handler(&handler);
        sink.write_line("[INFO] missed");

        assert_eq!(collect.lines(), vec!["[INFO] kept".to_owned()]);
        assert_eq!(sink.handler_count(), 0);
    }
}
