use std::sync::{Arc, Mutex};

use super::{Backend, Event, LogEvent, MetricEvent, SinkError, SpanEvent};

/// Keeps every event in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    pub fn metrics(&self) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Metric(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn metrics_named(&self, name: &str) -> Vec<MetricEvent> {
        self.metrics().into_iter().filter(|m| m.name == name).collect()
    }

    pub fn spans(&self) -> Vec<SpanEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Span(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn handle(&self, event: &Event) -> Result<(), SinkError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
