//! Logging setup and observability backend resolution.

use bringup_core::sink::{PrometheusBackend, Sink, StatsdBackend, TracingBackend};
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Install the global subscriber. Logs go to stderr so `--json` output on
/// stdout stays machine-readable.
pub fn init_logging(verbose: bool, format: LogFormat) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().flatten_event(true).init(),
    }
}

/// Build the run's sink from the environment. Backends that cannot be set
/// up are left out; the run proceeds without them.
pub fn build_sink() -> Sink {
    let mut sink = Sink::new().with_backend(TracingBackend);

    match StatsdBackend::from_env() {
        Some(Ok(statsd)) => {
            tracing::debug!(addr = statsd.target(), "dogstatsd metrics enabled");
            sink.push_backend(Box::new(statsd));
        }
        Some(Err(e)) => tracing::warn!("dogstatsd metrics disabled: {e}"),
        None => {}
    }

    if let Some(prometheus) = PrometheusBackend::from_env() {
        tracing::debug!("prometheus textfile metrics enabled");
        sink.push_backend(Box::new(prometheus));
    }

    sink
}
