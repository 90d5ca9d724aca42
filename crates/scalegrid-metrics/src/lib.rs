//! scalegrid-metrics — decision-ready metric snapshots.
//!
//! Raw samples come from a [`MetricSource`] (cloud monitoring, Ganglia,
//! a JSON-lines file, or memory in tests). For each resource the
//! [`SnapshotBuilder`] fetches every configured metric over the decision
//! window and aggregates it into one value.
//!
//! # Architecture
//!
//! ```text
//! MetricSource::fetch(resource, metric, start, end)
//!   └── Vec<MetricSample>
//!         └── SnapshotBuilder::build()   (window filter, NaN gaps dropped)
//!               └── MetricSnapshot { metric → avg | min | max | sum }
//!                     └── Bindings for rule expressions
//! ```
//!
//! A metric with no samples inside the window is left out of the snapshot
//! entirely. Expressions that reference it fail to evaluate, so stale or
//! absent data never drives a scaling decision.

pub mod sample;
pub mod snapshot;
pub mod source;

pub use sample::MetricSample;
pub use snapshot::{Aggregation, MetricSnapshot, SnapshotBuilder};
pub use source::{FetchError, InMemoryMetricSource, JsonlMetricSource, MetricSource};
