//! DogStatsD metrics over UDP.
//!
//! Enabled when `DD_AGENT_HOST` is set; the port comes from
//! `DD_DOGSTATSD_PORT` (default 8125). UDP is fire-and-forget, so an agent
//! that is not listening costs nothing beyond a dropped datagram.

use std::net::UdpSocket;

use super::{Backend, Event, MetricEvent, MetricKind, SinkError};

pub const DEFAULT_PORT: u16 = 8125;
const PREFIX: &str = "bringup";

pub struct StatsdBackend {
    socket: UdpSocket,
    target: String,
}

impl StatsdBackend {
    /// Bind a local socket and connect it to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let target = format!("{host}:{port}");
        socket.connect(&target)?;
        Ok(Self { socket, target })
    }

    /// Build from `DD_AGENT_HOST` / `DD_DOGSTATSD_PORT`. `None` when no host
    /// is configured.
    pub fn from_env() -> Option<Result<Self, SinkError>> {
        let host = std::env::var("DD_AGENT_HOST").ok().filter(|h| !h.is_empty())?;
        let port = std::env::var("DD_DOGSTATSD_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Some(Self::connect(&host, port))
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Render one metric as a DogStatsD datagram, e.g.
/// `bringup.command.count:1|c|#program:helm,status:success`.
pub fn format_datagram(metric: &MetricEvent) -> String {
    let kind = match metric.kind {
        MetricKind::Counter => "c",
        MetricKind::Histogram => "h",
        MetricKind::Gauge => "g",
    };
    let mut line = format!("{PREFIX}.{}:{}|{kind}", metric.name, metric.value);
    if !metric.tags.is_empty() {
        let tags: Vec<String> = metric
            .tags
            .iter()
            .map(|(k, v)| format!("{k}:{}", sanitize_tag(v)))
            .collect();
        line.push_str("|#");
        line.push_str(&tags.join(","));
    }
    line
}

fn sanitize_tag(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == ',' || c == '|' || c == '#' { '_' } else { c })
        .collect()
}

impl Backend for StatsdBackend {
    fn name(&self) -> &'static str {
        "statsd"
    }

    fn handle(&self, event: &Event) -> Result<(), SinkError> {
        if let Event::Metric(metric) = event {
            self.socket.send(format_datagram(metric).as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counter_datagram_with_tags() {
        let m = MetricEvent::counter("command.count", 1.0)
            .tag("program", "helm")
            .tag("status", "success");
        assert_eq!(
            format_datagram(&m),
            "bringup.command.count:1|c|#program:helm,status:success"
        );
    }

    #[test]
    fn histogram_datagram_without_tags() {
        let m = MetricEvent::histogram_ms("sequence.duration", Duration::from_millis(12));
        assert_eq!(format_datagram(&m), "bringup.sequence.duration:12|h");
    }

    #[test]
    fn tag_values_are_sanitized() {
        let m = MetricEvent::counter("x", 2.0).tag("step", "a,b|c");
        assert_eq!(format_datagram(&m), "bringup.x:2|c|#step:a_b_c");
    }

    #[test]
    fn sends_to_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let backend = StatsdBackend::connect("127.0.0.1", port).unwrap();
        backend
            .handle(&Event::Metric(MetricEvent::counter("step.count", 1.0)))
            .unwrap();

        let mut buf = [0u8; 256];
        let n = listener.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"bringup.step.count:1|c");
    }
}
