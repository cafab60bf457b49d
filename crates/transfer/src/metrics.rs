//! End-of-transfer metrics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Bytes(u64),
    Seconds(f64),
}

impl From<Duration> for MetricValue {
    fn from(d: Duration) -> Self {
        Self::Seconds(d.as_secs_f64())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{b}"),
            Self::Seconds(s) => write!(f, "{s:.3}s"),
        }
    }
}

/// Destination for the key/value pairs reported after a successful copy.
pub trait MetricsSink: Send + Sync {
    fn set(&self, key: &str, value: MetricValue);
}

/// Emits every metric as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn set(&self, key: &str, value: MetricValue) {
        debug!(key, %value, "transfer metric");
    }
}

/// Keeps the last value of every key in memory.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    values: Mutex<BTreeMap<String, MetricValue>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<MetricValue> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, MetricValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl MetricsSink for RecordingMetrics {
    fn set(&self, key: &str, value: MetricValue) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_keeps_last_value() {
        let m = RecordingMetrics::new();
        assert!(m.is_empty());
        m.set("size", MetricValue::Bytes(10));
        m.set("size", MetricValue::Bytes(20));
        m.set("time", Duration::from_millis(1500).into());
        assert_eq!(m.get("size"), Some(MetricValue::Bytes(20)));
        assert_eq!(m.get("time"), Some(MetricValue::Seconds(1.5)));
        assert_eq!(m.snapshot().len(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(MetricValue::Bytes(42).to_string(), "42");
        assert_eq!(MetricValue::Seconds(0.25).to_string(), "0.250s");
    }
}
