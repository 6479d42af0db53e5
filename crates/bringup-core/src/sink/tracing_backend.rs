use super::{Backend, Event, Level, LogEvent, SinkError, SpanEvent};

/// Forwards log and span events into `tracing`.
///
/// Rendering (human text or single-line JSON) is decided by the subscriber
/// the binary installs; this backend only fixes the field set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBackend;

macro_rules! log_at {
    ($level:expr, $ev:expr) => {{
        let ev: &LogEvent = $ev;
        let duration_ms = ev.duration.map(|d| d.as_millis() as u64);
        match $level {
            Level::Trace => tracing::trace!(command = ev.command.as_deref(), duration_ms, exit_code = ev.exit_code, "{}", ev.message),
            Level::Debug => tracing::debug!(command = ev.command.as_deref(), duration_ms, exit_code = ev.exit_code, "{}", ev.message),
            Level::Info => tracing::info!(command = ev.command.as_deref(), duration_ms, exit_code = ev.exit_code, "{}", ev.message),
            Level::Warn => tracing::warn!(command = ev.command.as_deref(), duration_ms, exit_code = ev.exit_code, "{}", ev.message),
            Level::Error => tracing::error!(command = ev.command.as_deref(), duration_ms, exit_code = ev.exit_code, "{}", ev.message),
        }
    }};
}

fn render_attributes(span: &SpanEvent) -> String {
    span.attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Backend for TracingBackend {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn handle(&self, event: &Event) -> Result<(), SinkError> {
        match event {
            Event::Log(ev) => log_at!(ev.level, ev),
            Event::Span(span) => tracing::debug!(
                span = %span.name,
                duration_ms = span.duration.as_millis() as u64,
                attributes = %render_attributes(span),
                "span closed"
            ),
            Event::Metric(_) => {}
        }
        Ok(())
    }
}
