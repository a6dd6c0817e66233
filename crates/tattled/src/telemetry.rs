//! Structured telemetry initialisation for the agent.
//!
//! Diagnostics go to stderr in the configured format and, rendered as
//! `[LEVEL] target: message key=value`, into the agent's [`LogSink`] so that
//! `monitor` subscribers see them. The configured filter gates stderr only;
//! the sink receives every level and each monitor applies its own.

use std::fmt::{self, Write as _};
use std::io::{self, IsTerminal};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::field::{Field, Visit};
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::fmt as fmt_layer;
use tracing_subscriber::{EnvFilter, Layer};

use tattle_config::{Config, LogFormat, LogLevel};

use crate::agent::LogSink;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the global
/// state, even when they pass a different sink.
///
/// # Errors
///
/// Fails when the filter does not parse or another subscriber is installed.
pub fn initialise(config: &Config, sink: &Arc<LogSink>) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config, Arc::clone(sink)))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config, sink: Arc<LogSink>) -> Result<(), TelemetryError> {
    let subscriber = build_subscriber(config, sink)?;
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn build_subscriber(
    config: &Config,
    sink: Arc<LogSink>,
) -> Result<impl Subscriber + Send + Sync + 'static, TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let output = match config.log_format() {
        LogFormat::Json => fmt_layer::layer()
            .json()
            .flatten_event(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt_layer::layer()
            .compact()
            // Keep colour on terminals only.
            .with_ansi(io::stderr().is_terminal())
            .with_timer(UtcTime::rfc_3339())
            .with_writer(io::stderr)
            .boxed(),
    };

    Ok(tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .with(LogSinkLayer::new(sink)))
}

/// Maps a tracing level onto the monitor level vocabulary.
#[must_use]
pub fn monitor_level(level: Level) -> LogLevel {
    match level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warn,
        _ => LogLevel::Err,
    }
}

/// Layer that renders each event as one line and hands it to a [`LogSink`].
pub struct LogSinkLayer {
    sink: Arc<LogSink>,
}

impl LogSinkLayer {
    /// Forwards events into `sink`.
    #[must_use]
    pub const fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut line = LineVisitor::default();
        event.record(&mut line);
        let rendered = format!(
            "[{}] {}: {}{}",
            monitor_level(*metadata.level()).tag(),
            metadata.target(),
            line.message,
            line.fields
        );
        self.sink.write_line(&rendered);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
