//! Metrics behind a trait, so stage code never touches an exporter.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Counter and histogram sink.
///
/// `label` is the single dimension this engine needs (node name, breaker
/// name, agent name); exporters that want more can split on it.
pub trait Meter: Send + Sync {
    fn incr_counter(&self, name: &str, label: &str, value: u64);
    fn record_duration(&self, name: &str, label: &str, duration: Duration);
}

/// In-process meter with a snapshot API, used in tests and as the default.
#[derive(Default)]
pub struct MemoryMeter {
    counters: Mutex<HashMap<(String, String), u64>>,
    durations: Mutex<HashMap<(String, String), Vec<Duration>>>,
}

impl MemoryMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str, label: &str) -> u64 {
        *self
            .counters
            .lock()
            .get(&(name.to_string(), label.to_string()))
            .unwrap_or(&0)
    }

    pub fn duration_count(&self, name: &str, label: &str) -> usize {
        self.durations
            .lock()
            .get(&(name.to_string(), label.to_string()))
            .map_or(0, Vec::len)
    }
}

impl Meter for MemoryMeter {
    fn incr_counter(&self, name: &str, label: &str, value: u64) {
        *self
            .counters
            .lock()
            .entry((name.to_string(), label.to_string()))
            .or_insert(0) += value;
    }

    fn record_duration(&self, name: &str, label: &str, duration: Duration) {
        self.durations
            .lock()
            .entry((name.to_string(), label.to_string()))
            .or_default()
            .push(duration);
    }
}

/// Meter that emits structured tracing events; pair with a subscriber that
/// exports to the console or OTLP.
#[derive(Default, Clone, Copy)]
pub struct TracingMeter;

impl Meter for TracingMeter {
    fn incr_counter(&self, name: &str, label: &str, value: u64) {
        tracing::debug!(target: "parleql::metrics", metric = name, label, value, kind = "counter");
    }

    fn record_duration(&self, name: &str, label: &str, duration: Duration) {
        tracing::debug!(
            target: "parleql::metrics",
            metric = name,
            label,
            duration_ms = duration.as_millis() as u64,
            kind = "histogram",
        );
    }
}
