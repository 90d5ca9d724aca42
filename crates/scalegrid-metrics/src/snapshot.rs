//! Snapshot builder — aggregates raw samples over the decision window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use scalegrid_expr::Bindings;

use crate::sample::MetricSample;
use crate::source::{FetchError, MetricSource};

/// How samples of one metric collapse into a single snapshot value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    #[serde(alias = "average")]
    Avg,
    #[serde(alias = "minimum")]
    Min,
    #[serde(alias = "maximum")]
    Max,
    Sum,
}

impl Aggregation {
    /// Aggregate `values`; `None` if there are none.
    pub fn apply(self, values: impl IntoIterator<Item = f64>) -> Option<f64> {
        let mut count = 0usize;
        let mut acc: Option<f64> = None;
        for value in values {
            count += 1;
            acc = Some(match (self, acc) {
                (_, None) => value,
                (Aggregation::Avg | Aggregation::Sum, Some(a)) => a + value,
                (Aggregation::Min, Some(a)) => a.min(value),
                (Aggregation::Max, Some(a)) => a.max(value),
            });
        }
        match self {
            Aggregation::Avg => acc.map(|sum| sum / count as f64),
            _ => acc,
        }
    }
}

/// Aggregated metric values for one resource at one evaluation instant.
///
/// Rebuilt every loop iteration and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub resource_id: String,
    /// Unix timestamp (seconds) the window ends at.
    pub evaluated_at: u64,
    pub window_secs: u64,
    pub values: BTreeMap<String, f64>,
}

impl MetricSnapshot {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Bindings for MetricSnapshot {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name)
    }
}

/// Builds [`MetricSnapshot`]s for a fixed set of metrics and window length.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBuilder {
    window_secs: u64,
    metrics: Vec<(String, Aggregation)>,
}

impl SnapshotBuilder {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            metrics: Vec::new(),
        }
    }

    /// Track `metric`, aggregated with `aggregation`. Re-adding a metric
    /// replaces its aggregation.
    pub fn with_metric(mut self, metric: &str, aggregation: Aggregation) -> Self {
        match self.metrics.iter_mut().find(|(name, _)| name == metric) {
            Some(entry) => entry.1 = aggregation,
            None => self.metrics.push((metric.to_string(), aggregation)),
        }
        self
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, Aggregation)> {
        self.metrics.iter().map(|(name, agg)| (name.as_str(), *agg))
    }

    /// Inclusive `[start, end]` bounds of the window ending at `now`.
    pub fn window(&self, now: u64) -> (u64, u64) {
        (now.saturating_sub(self.window_secs), now)
    }

    /// Aggregate `samples` into a snapshot.
    ///
    /// Samples outside the window and non-finite values (monitoring gaps)
    /// are ignored. Metrics left with no samples are omitted.
    pub fn build(&self, resource_id: &str, samples: &[MetricSample], now: u64) -> MetricSnapshot {
        let (start, end) = self.window(now);
        let mut values = BTreeMap::new();

        for (metric, aggregation) in &self.metrics {
            let in_window = samples
                .iter()
                .filter(|s| &s.metric == metric)
                .filter(|s| s.timestamp >= start && s.timestamp <= end)
                .map(|s| s.value)
                .filter(|v| v.is_finite());

            match aggregation.apply(in_window) {
                Some(value) => {
                    values.insert(metric.clone(), value);
                }
                None => {
                    debug!(resource = %resource_id, %metric, start, end, "no samples in window");
                }
            }
        }

        MetricSnapshot {
            resource_id: resource_id.to_string(),
            evaluated_at: now,
            window_secs: self.window_secs,
            values,
        }
    }

    /// Fetch every tracked metric from `source` and build the snapshot.
    ///
    /// The first fetch failure aborts the whole snapshot; there is no retry
    /// within a pass.
    pub async fn collect(
        &self,
        source: &dyn MetricSource,
        resource_id: &str,
        now: u64,
    ) -> Result<MetricSnapshot, FetchError> {
        let (start, end) = self.window(now);
        let mut samples = Vec::new();
        for (metric, _) in &self.metrics {
            samples.extend(source.fetch(resource_id, metric, start, end).await?);
        }
        Ok(self.build(resource_id, &samples, now))
    }
}
