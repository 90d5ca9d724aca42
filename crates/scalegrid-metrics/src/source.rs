//! Metric sources — where raw samples come from.
//!
//! The real transport (cloud monitoring APIs, Ganglia, ...) lives outside
//! this workspace; it only has to implement [`MetricSource`]. Two sources
//! ship here: an in-memory store for tests and embedding, and a JSON-lines
//! file reader used by the daemon.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::sample::MetricSample;

/// Errors returned by a [`MetricSource`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// The source is temporarily unavailable. The resource is skipped for
    /// this iteration and retried on the next one.
    #[error("metric source unavailable for {resource}/{metric}: {reason}")]
    Transient {
        resource: String,
        metric: String,
        reason: String,
    },
}

/// Boxed future returned by [`MetricSource::fetch`].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<MetricSample>, FetchError>> + Send + 'a>>;

/// Boundary to the metric collection transport.
pub trait MetricSource: Send + Sync {
    /// Samples of `metric` for `resource_id` with timestamps in
    /// `[start, end]` (Unix seconds).
    fn fetch<'a>(
        &'a self,
        resource_id: &'a str,
        metric: &'a str,
        start: u64,
        end: u64,
    ) -> FetchFuture<'a>;
}

// ── In-memory ────────────────────────────────────────────────────

/// Metric source backed by memory: resource_id → samples.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricSource {
    series: Arc<RwLock<HashMap<String, Vec<MetricSample>>>>,
    unavailable: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample for a resource.
    pub async fn record(&self, resource_id: &str, sample: MetricSample) {
        let mut series = self.series.write().await;
        series
            .entry(resource_id.to_string())
            .or_default()
            .push(sample);
    }

    /// Record several samples at once.
    pub async fn record_all(&self, resource_id: &str, samples: impl IntoIterator<Item = MetricSample>) {
        let mut series = self.series.write().await;
        series
            .entry(resource_id.to_string())
            .or_default()
            .extend(samples);
    }

    /// Drop every sample recorded for a resource.
    pub async fn clear(&self, resource_id: &str) {
        self.series.write().await.remove(resource_id);
    }

    /// Simulate an outage: fetches for an unavailable resource fail with
    /// [`FetchError::Transient`].
    pub async fn set_available(&self, resource_id: &str, available: bool) {
        let mut unavailable = self.unavailable.write().await;
        if available {
            unavailable.remove(resource_id);
        } else {
            unavailable.insert(resource_id.to_string());
        }
    }
}

impl MetricSource for InMemoryMetricSource {
    fn fetch<'a>(
        &'a self,
        resource_id: &'a str,
        metric: &'a str,
        start: u64,
        end: u64,
    ) -> FetchFuture<'a> {
        Box::pin(async move {
            if self.unavailable.read().await.contains(resource_id) {
                return Err(FetchError::Transient {
                    resource: resource_id.to_string(),
                    metric: metric.to_string(),
                    reason: "source marked unavailable".to_string(),
                });
            }

            let series = self.series.read().await;
            let samples = series
                .get(resource_id)
                .map(|samples| {
                    samples
                        .iter()
                        .filter(|s| s.metric == metric && s.timestamp >= start && s.timestamp <= end)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            Ok(samples)
        })
    }
}

// ── JSON lines ───────────────────────────────────────────────────

/// One line of a samples file.
#[derive(Debug, Deserialize)]
struct JsonlRecord {
    resource: String,
    metric: String,
    timestamp: u64,
    /// `null` marks a gap in the series.
    value: Option<f64>,
}

/// Metric source that re-reads a JSON-lines file on every fetch.
///
/// Each non-empty line is an object such as
/// `{"resource": "emr-main", "metric": "cpu_avg", "timestamp": 1704099600, "value": 42.5}`.
/// Lines starting with `#` and malformed lines are skipped. An unreadable
/// file is a transient failure.
#[derive(Debug, Clone)]
pub struct JsonlMetricSource {
    path: PathBuf,
}

impl JsonlMetricSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricSource for JsonlMetricSource {
    fn fetch<'a>(
        &'a self,
        resource_id: &'a str,
        metric: &'a str,
        start: u64,
        end: u64,
    ) -> FetchFuture<'a> {
        Box::pin(async move {
            let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                FetchError::Transient {
                    resource: resource_id.to_string(),
                    metric: metric.to_string(),
                    reason: format!("read {}: {e}", self.path.display()),
                }
            })?;

            let mut samples = Vec::new();
            for (idx, line) in content.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let record: JsonlRecord = match serde_json::from_str(line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(path = ?self.path, line = idx + 1, error = %e, "skipping malformed sample");
                        continue;
                    }
                };
                if record.resource != resource_id
                    || record.metric != metric
                    || record.timestamp < start
                    || record.timestamp > end
                {
                    continue;
                }
                if let Some(value) = record.value {
                    samples.push(MetricSample {
                        metric: record.metric,
                        timestamp: record.timestamp,
                        value,
                    });
                }
            }

            debug!(resource = %resource_id, %metric, count = samples.len(), "samples loaded");
            Ok(samples)
        })
    }
}
