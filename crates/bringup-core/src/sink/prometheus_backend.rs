//! Prometheus metrics for a single run.
//!
//! Metrics are collected in an in-process registry and, when a path is
//! configured (`BRINGUP_METRICS_FILE`), written in text exposition format at
//! the end of the run so a node-exporter textfile collector can scrape them.
//!
//! Metric names are prefixed with `bringup_` and dots become underscores:
//! `command.duration` is exported as `bringup_command_duration_ms`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

use super::{Backend, Event, MetricEvent, MetricKind, SinkError};

enum Family {
    Counter(CounterVec),
    Histogram(HistogramVec),
    Gauge(GaugeVec),
}

pub struct PrometheusBackend {
    registry: Registry,
    families: RefCell<HashMap<String, (Family, Vec<String>)>>,
    output: Option<PathBuf>,
}

fn metric_name(metric: &MetricEvent) -> String {
    let base = metric.name.replace(['.', '-'], "_");
    match metric.kind {
        MetricKind::Histogram => format!("bringup_{base}_ms"),
        MetricKind::Counter => format!("bringup_{base}_total"),
        MetricKind::Gauge => format!("bringup_{base}"),
    }
}

fn registry_err(e: prometheus::Error) -> SinkError {
    SinkError::Registry(e.to_string())
}

impl PrometheusBackend {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            registry: Registry::new(),
            families: RefCell::new(HashMap::new()),
            output,
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var_os("BRINGUP_METRICS_FILE")
            .filter(|v| !v.is_empty())
            .map(|p| Self::new(Some(PathBuf::from(p))))
    }

    fn register(&self, name: &str, metric: &MetricEvent, labels: &[&str]) -> Result<Family, SinkError> {
        let help = format!("{} ({})", metric.name, name);
        let family = match metric.kind {
            MetricKind::Counter => {
                let vec = CounterVec::new(Opts::new(name, help), labels).map_err(registry_err)?;
                self.registry.register(Box::new(vec.clone())).map_err(registry_err)?;
                Family::Counter(vec)
            }
            MetricKind::Histogram => {
                let buckets = prometheus::exponential_buckets(10.0, 4.0, 8).map_err(registry_err)?;
                let vec = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
                    .map_err(registry_err)?;
                self.registry.register(Box::new(vec.clone())).map_err(registry_err)?;
                Family::Histogram(vec)
            }
            MetricKind::Gauge => {
                let vec = GaugeVec::new(Opts::new(name, help), labels).map_err(registry_err)?;
                self.registry.register(Box::new(vec.clone())).map_err(registry_err)?;
                Family::Gauge(vec)
            }
        };
        Ok(family)
    }

    fn record(&self, metric: &MetricEvent) -> Result<(), SinkError> {
        let name = metric_name(metric);
        let mut tags: Vec<(&str, &str)> = metric
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        tags.sort_by(|a, b| a.0.cmp(b.0));
        let keys: Vec<&str> = tags.iter().map(|(k, _)| *k).collect();
        let values: Vec<&str> = tags.iter().map(|(_, v)| *v).collect();

        let mut families = self.families.borrow_mut();
        if !families.contains_key(&name) {
            let family = self.register(&name, metric, &keys)?;
            families.insert(
                name.clone(),
                (family, keys.iter().map(|k| k.to_string()).collect()),
            );
        }
        let Some((family, label_names)) = families.get(&name) else {
            return Ok(());
        };
        if label_names.iter().map(String::as_str).ne(keys.iter().copied()) {
            return Err(SinkError::Registry(format!(
                "metric '{name}' registered with labels {label_names:?}, got {keys:?}"
            )));
        }

        match family {
            Family::Counter(v) => v
                .get_metric_with_label_values(&values)
                .map_err(registry_err)?
                .inc_by(metric.value),
            Family::Histogram(v) => v
                .get_metric_with_label_values(&values)
                .map_err(registry_err)?
                .observe(metric.value),
            Family::Gauge(v) => v
                .get_metric_with_label_values(&values)
                .map_err(registry_err)?
                .set(metric.value),
        }
        Ok(())
    }

    /// Encode every collected metric in Prometheus text format.
    pub fn encode_text(&self) -> Result<String, SinkError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(registry_err)?;
        String::from_utf8(buf).map_err(|e| SinkError::Registry(e.to_string()))
    }
}

impl Backend for PrometheusBackend {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    fn handle(&self, event: &Event) -> Result<(), SinkError> {
        match event {
            Event::Metric(metric) => self.record(metric),
            _ => Ok(()),
        }
    }

    fn flush(&self) -> Result<(), SinkError> {
        let Some(path) = &self.output else {
            return Ok(());
        };
        let text = self.encode_text()?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn command_count(status: &str) -> Event {
        Event::Metric(
            MetricEvent::counter("command.count", 1.0)
                .tag("status", status)
                .tag("program", "kubectl"),
        )
    }

    #[test]
    fn counters_accumulate_per_label_set() {
        let backend = PrometheusBackend::new(None);
        backend.handle(&command_count("success")).unwrap();
        backend.handle(&command_count("success")).unwrap();
        backend.handle(&command_count("failure")).unwrap();

        let text = backend.encode_text().unwrap();
        assert!(text.contains(
            r#"bringup_command_count_total{program="kubectl",status="success"} 2"#
        ));
        assert!(text.contains(
            r#"bringup_command_count_total{program="kubectl",status="failure"} 1"#
        ));
    }

    #[test]
    fn histogram_is_exported_in_ms() {
        let backend = PrometheusBackend::new(None);
        backend
            .handle(&Event::Metric(MetricEvent::histogram_ms(
                "step.duration",
                Duration::from_millis(30),
            )))
            .unwrap();
        let text = backend.encode_text().unwrap();
        assert!(text.contains("bringup_step_duration_ms_count 1"));
    }

    #[test]
    fn mismatched_labels_are_rejected() {
        let backend = PrometheusBackend::new(None);
        backend.handle(&command_count("success")).unwrap();
        let odd = Event::Metric(MetricEvent::counter("command.count", 1.0).tag("only", "one"));
        assert!(backend.handle(&odd).is_err());
    }

    #[test]
    fn flush_writes_textfile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bringup.prom");
        let backend = PrometheusBackend::new(Some(path.clone()));
        backend.handle(&command_count("success")).unwrap();
        backend.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("bringup_command_count_total"));
    }
}
