//! Log stream: forwards agent log lines at or above a minimum level.

use std::io::Write;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;

use tattle_config::LogLevel;
use tattle_proto::{FrameWriter, LogRecord};

use super::{StreamQueue, join_forwarder, spawn_forwarder};
use crate::agent::{LogHandler, LogSink};

const KIND: &str = "log";

struct LevelFilteredQueue {
    min_level: LogLevel,
    queue: StreamQueue<LogRecord>,
}

impl LogHandler for LevelFilteredQueue {
    fn handle_log(&self, line: &str) {
        // Lines without a recognisable level tag are always forwarded.
        if LogLevel::from_line(line).is_some_and(|level| level < self.min_level) {
            return;
        }
        self.queue.offer(LogRecord {
            log: line.to_owned(),
        });
    }
}

/// A session's log subscription.
pub(crate) struct LogStream {
    seq: u64,
    handler: Arc<LevelFilteredQueue>,
    pending: Option<Receiver<LogRecord>>,
    forwarder: Option<JoinHandle<()>>,
}

impl LogStream {
    /// Registers with `sink`; lines queue up until [`Self::start`].
    pub(crate) fn register(seq: u64, min_level: LogLevel, sink: &LogSink, capacity: usize) -> Self {
        let (queue, receiver) = StreamQueue::bounded(seq, KIND, capacity);
        let handler = Arc::new(LevelFilteredQueue { min_level, queue });
        sink.register_handler(Arc::clone(&handler) as Arc<dyn LogHandler>);
        Self {
            seq,
            handler,
            pending: Some(receiver),
            forwarder: None,
        }
    }

    pub(crate) const fn seq(&self) -> u64 {
        self.seq
    }

    /// Starts pushing queued lines onto the connection.
    pub(crate) fn start<W: Write + Send + 'static>(&mut self, writer: FrameWriter<W>) {
        if let Some(receiver) = self.pending.take() {
            self.forwarder = spawn_forwarder(self.seq, KIND, receiver, writer);
        }
    }

    /// Deregisters from `sink`, closes the queue, and waits for the forwarder.
    pub(crate) fn stop(mut self, sink: &LogSink) {
        let handler: Arc<dyn LogHandler> = self.handler.clone();
        sink.deregister_handler(&handler);
        self.handler.queue.close();
        join_forwarder(self.seq, KIND, self.forwarder.take());
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::info(LogLevel::Info, &["[INFO] b", "[ERR] c", "untagged"])]
    #[case::trace(LogLevel::Trace, &["[DEBUG] a", "[INFO] b", "[ERR] c", "untagged"])]
    #[case::err(LogLevel::Err, &["[ERR] c", "untagged"])]
    fn level_filter_applies_minimum(#[case] level: LogLevel, #[case] expected: &[&str]) {
        let sink = LogSink::with_backlog(0);
        let stream = LogStream::register(5, level, &sink, 16);
        for line in ["[DEBUG] a", "[INFO] b", "[ERR] c", "untagged"] {
            sink.write_line(line);
        }
        let receiver = stream.pending.as_ref().expect("not started");
        let lines: Vec<String> = receiver.try_iter().map(|record| record.log).collect();
        assert_eq!(lines, expected);
        stream.stop(&sink);
        assert_eq!(sink.handler_count(), 0);
    }
}
