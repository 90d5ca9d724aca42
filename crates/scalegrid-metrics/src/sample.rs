use serde::{Deserialize, Serialize};

/// A single recorded measurement. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub value: f64,
}

impl MetricSample {
    pub fn new(metric: &str, timestamp: u64, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            timestamp,
            value,
        }
    }
}
