//! Observability sink.
//!
//! Every component reports through a single [`Sink`] built once per process
//! run. The sink fans each [`Event`] out to zero or more [`Backend`]s; a
//! backend that fails is skipped for that event and the caller never sees the
//! error, so orchestration behaves identically with or without backends.
//!
//! ```text
//! Executor ─┐
//! Applier  ─┼──▶ Sink::emit ──▶ [TracingBackend, StatsdBackend, PrometheusBackend, ...]
//! Sequencer ┘
//! ```

pub mod event;
#[cfg(test)]
pub(crate) mod memory;
pub mod prometheus_backend;
pub mod statsd;
pub mod tracing_backend;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use event::{Event, Level, LogEvent, MetricEvent, MetricKind, SpanEvent};
#[cfg(test)]
pub(crate) use memory::MemoryBackend;
pub use prometheus_backend::PrometheusBackend;
pub use statsd::StatsdBackend;
pub use tracing_backend::TracingBackend;

use crate::outcome::Outcome;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics registry error: {0}")]
    Registry(String),
}

/// A destination for observability events.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &Event) -> Result<(), SinkError>;

    /// Called once when the run finishes.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Sink {
    backends: Vec<Box<dyn Backend>>,
    /// Backends that already reported a failure; later failures stay quiet.
    degraded: RefCell<BTreeSet<&'static str>>,
}

impl Sink {
    /// A sink with no backends. Every emit is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn push_backend(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn emit(&self, event: Event) {
        for backend in &self.backends {
            if let Err(e) = backend.handle(&event) {
                self.note_failure(backend.name(), &e);
            }
        }
    }

    pub fn flush(&self) {
        for backend in &self.backends {
            if let Err(e) = backend.flush() {
                self.note_failure(backend.name(), &e);
            }
        }
    }

    fn note_failure(&self, backend: &'static str, err: &SinkError) {
        let first = self.degraded.borrow_mut().insert(backend);
        if first {
            tracing::trace!(backend, error = %err, "observability backend unavailable, dropping events");
        }
    }

    // -----------------------------------------------------------------------
    // Convenience emitters
    // -----------------------------------------------------------------------

    pub fn log(&self, event: LogEvent) {
        self.emit(Event::Log(event));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Warn, message));
    }

    pub fn metric(&self, metric: MetricEvent) {
        self.emit(Event::Metric(metric));
    }

    /// Open a scoped span. It closes, and is emitted, when the guard drops.
    pub fn span(&self, name: impl Into<String>) -> SpanGuard<'_> {
        SpanGuard::open(self, name.into())
    }
}

// ---------------------------------------------------------------------------
// SpanGuard
// ---------------------------------------------------------------------------

/// Scoped span around a unit of work.
///
/// Enters a `tracing` span for its lifetime so nested log lines carry the
/// span name, and emits a [`SpanEvent`] on drop regardless of how the scope
/// exits. A guard dropped without [`SpanGuard::record_outcome`] reports
/// `outcome=aborted`.
pub struct SpanGuard<'a> {
    sink: &'a Sink,
    name: String,
    started_at: DateTime<Utc>,
    start: Instant,
    attributes: Vec<(String, String)>,
    outcome: Option<&'static str>,
    _entered: tracing::span::EnteredSpan,
}

impl<'a> SpanGuard<'a> {
    fn open(sink: &'a Sink, name: String) -> Self {
        let entered = tracing::info_span!("span", span_name = %name).entered();
        Self {
            sink,
            name,
            started_at: Utc::now(),
            start: Instant::now(),
            attributes: Vec::new(),
            outcome: None,
            _entered: entered,
        }
    }

    pub fn attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((key.into(), value.into()));
    }

    pub fn record_outcome(&mut self, outcome: &Outcome) {
        self.outcome = Some(outcome.label());
        if let Some(failure) = outcome.as_failure() {
            self.attr("reason", failure.reason());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        let mut attributes = std::mem::take(&mut self.attributes);
        attributes.push((
            "outcome".to_string(),
            self.outcome.unwrap_or("aborted").to_string(),
        ));
        self.sink.emit(Event::Span(SpanEvent {
            name: std::mem::take(&mut self.name),
            started_at: self.started_at,
            duration: self.start.elapsed(),
            attributes,
        }));
    }
}
