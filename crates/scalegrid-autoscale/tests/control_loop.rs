//! Control loop integration tests.
//!
//! Drive full passes (snapshot → engine → selector → actuator → state)
//! with an in-memory metric source and a recording actuator. Time is
//! passed explicitly, so no test sleeps for an interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scalegrid_autoscale::*;
use scalegrid_core::{Inventory, Removal, ScalerConfig, ScalingAction};
use scalegrid_expr::EvaluationError;
use scalegrid_metrics::{InMemoryMetricSource, MetricSample};

// 2024-01-01 09:00:00 UTC, a Monday.
const MON_0900: u64 = 1_704_099_600;
// 2024-01-03 15:00:00 UTC, a Wednesday.
const WED_1500: u64 = 1_704_294_000;

const CONFIG: &str = r#"
[autoscaler]
monitoring_interval_secs = 600
cooldown_secs = 300
workers = 2

[resources.emr]
kind = "compute"
baseline_nodes = 2
max_nodes = 20
upscale_expr = "(cpu_avg > 80) * 2"
downscale_expr = "(cpu_avg < 20) * 3"
group_or_preferred_market = ["spot", "ig-core"]
time_based_scaling = { "Mon 09:.*" = 5, "Mon 0[89]:.*" = 4 }
metrics = { cpu_avg = "avg" }

[[resources.emr.groups]]
id = "ig-core"
market = "on_demand"
min_size = 1
max_size = 20
nodes = ["c-1", "c-2", "c-3", "c-4"]

[[resources.emr.groups]]
id = "ig-spot"
market = "spot"
max_size = 20
nodes = ["s-1", "s-2", "s-3", "s-4", "s-5", "s-6"]

[resources.clicks]
kind = "stream"
baseline_nodes = 1
max_nodes = 8
stream_upscale_expr = "(incoming_records > 1000) * 2"
stream_downscale_expr = "(incoming_records < 100) * 2"
metrics = { incoming_records = "sum" }

[[resources.clicks.shards]]
id = "shard-0"
start = "0"
end = "99"

[[resources.clicks.shards]]
id = "shard-1"
start = "100"
end = "199"

[[resources.clicks.shards]]
id = "shard-2"
start = "200"
end = "299"

[[resources.clicks.shards]]
id = "shard-3"
start = "300"
end = "399"
"#;

/// Actuator that records every call and can be told to fail.
#[derive(Default)]
struct RecordingActuator {
    calls: Mutex<Vec<ScalingAction>>,
    failing: AtomicBool,
}

impl RecordingActuator {
    fn calls(&self) -> Vec<ScalingAction> {
        self.calls.lock().unwrap().clone()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Actuator for RecordingActuator {
    fn apply_scaling<'a>(&'a self, action: &'a ScalingAction) -> ActuationFuture<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(action.clone());
            if self.failing.load(Ordering::SeqCst) {
                return Err(ActuationError::Rejected {
                    resource: action.resource_id.clone(),
                    reason: "quota exceeded".to_string(),
                });
            }
            Ok(())
        })
    }
}

struct Harness {
    control: ControlLoop,
    source: InMemoryMetricSource,
    actuator: Arc<RecordingActuator>,
}

fn harness(toml: &str) -> Harness {
    let config = ScalerConfig::from_toml_str(toml).unwrap();
    let source = InMemoryMetricSource::new();
    let actuator = Arc::new(RecordingActuator::default());
    let control = ControlLoop::new(
        Arc::new(StaticConfigProvider::new(config)),
        Arc::new(source.clone()),
        actuator.clone(),
    );
    Harness {
        control,
        source,
        actuator,
    }
}

impl Harness {
    async fn load(&self, cpu: f64, records: f64, at: u64) {
        self.source.clear("emr").await;
        self.source.clear("clicks").await;
        self.source
            .record("emr", MetricSample::new("cpu_avg", at, cpu))
            .await;
        self.source
            .record("clicks", MetricSample::new("incoming_records", at, records))
            .await;
    }

    async fn capacity(&self, id: &str) -> u32 {
        self.control.state(id).await.unwrap().lock().await.capacity()
    }

    async fn inventory(&self, id: &str) -> Inventory {
        self.control.state(id).await.unwrap().lock().await.inventory.clone()
    }
}

fn outcome<'a>(reports: &'a [PassReport], id: &str) -> &'a PassOutcome {
    &reports
        .iter()
        .find(|r| r.resource_id == id)
        .unwrap_or_else(|| panic!("no report for {id}"))
        .outcome
}

#[tokio::test]
async fn downscale_respects_schedule_floor_and_cooldown() {
    let h = harness(CONFIG);
    h.load(10.0, 500.0, MON_0900).await;

    // capacity 10, effective minimum max(2, 5) = 5, rule asks for 3.
    let reports = h.control.run_once(MON_0900).await;
    let action = outcome(&reports, "emr").action().unwrap();
    assert_eq!(action.delta, -3);
    assert_eq!(h.capacity("emr").await, 7);

    // Spot nodes go first, newest first.
    let removed: Vec<&str> = action
        .removals
        .iter()
        .map(|r| match r {
            Removal::Node { node_id, .. } => node_id.as_str(),
            Removal::Merge(_) => unreachable!(),
        })
        .collect();
    assert_eq!(removed, vec!["s-6", "s-5", "s-4"]);

    // Still cooling down one minute later.
    h.load(10.0, 500.0, MON_0900 + 60).await;
    let reports = h.control.run_once(MON_0900 + 60).await;
    assert!(matches!(
        outcome(&reports, "emr"),
        PassOutcome::CoolingDown { until } if *until == MON_0900 + 300
    ));

    // After cooldown the same rule is clamped at the floor: 7 → 5.
    h.load(10.0, 500.0, MON_0900 + 300).await;
    let reports = h.control.run_once(MON_0900 + 300).await;
    let action = outcome(&reports, "emr").action().unwrap();
    assert_eq!(action.delta, -2);
    assert_eq!(action.requested_delta, -3);
    assert_eq!(h.capacity("emr").await, 5);

    // At the floor nothing more happens.
    h.load(10.0, 500.0, MON_0900 + 600).await;
    let reports = h.control.run_once(MON_0900 + 600).await;
    assert!(matches!(
        outcome(&reports, "emr"),
        PassOutcome::NoChange(NoChangeReason::AtFloor)
    ));
    assert_eq!(h.actuator.calls().iter().filter(|a| a.resource_id == "emr").count(), 2);
}

#[tokio::test]
async fn stream_merges_adjacent_shards() {
    let h = harness(CONFIG);
    h.load(50.0, 10.0, WED_1500).await;

    let reports = h.control.run_once(WED_1500).await;
    let action = outcome(&reports, "clicks").action().unwrap();
    assert_eq!(action.delta, -2);

    for removal in &action.removals {
        match removal {
            Removal::Merge(pair) => assert!(pair.left().range.is_adjacent_to(&pair.right().range)),
            Removal::Node { .. } => panic!("stream resource removed a node"),
        }
    }

    let inventory = h.inventory("clicks").await;
    let ranges: Vec<(u128, u128)> = inventory
        .shards_by_key()
        .iter()
        .map(|s| (s.range.start, s.range.end))
        .collect();
    assert_eq!(ranges, vec![(0, 199), (200, 399)]);
}

#[tokio::test]
async fn stream_splits_on_upscale() {
    let h = harness(CONFIG);
    h.load(50.0, 5_000.0, WED_1500).await;

    let reports = h.control.run_once(WED_1500).await;
    assert_eq!(outcome(&reports, "clicks").action().unwrap().delta, 2);
    assert_eq!(h.capacity("clicks").await, 6);

    let inventory = h.inventory("clicks").await;
    let shards = inventory.shards_by_key();
    for pair in shards.windows(2) {
        assert!(pair[0].range.is_adjacent_to(&pair[1].range));
    }
    assert_eq!(shards.first().unwrap().range.start, 0);
    assert_eq!(shards.last().unwrap().range.end, 399);
}

#[tokio::test]
async fn fetch_failure_is_isolated() {
    let h = harness(CONFIG);
    h.load(10.0, 10.0, WED_1500).await;
    h.source.set_available("emr", false).await;

    let reports = h.control.run_once(WED_1500).await;
    assert!(matches!(
        outcome(&reports, "emr"),
        PassOutcome::Failed(AutoscaleError::Fetch(_))
    ));
    assert!(outcome(&reports, "clicks").action().is_some());
    assert_eq!(h.capacity("emr").await, 10);

    // Retried naturally on the next iteration.
    h.source.set_available("emr", true).await;
    let reports = h.control.run_once(WED_1500 + 60).await;
    assert_eq!(outcome(&reports, "emr").action().unwrap().delta, -3);
}

#[tokio::test]
async fn missing_metric_takes_no_action() {
    let h = harness(CONFIG);
    h.source
        .record("clicks", MetricSample::new("incoming_records", WED_1500, 500.0))
        .await;

    let reports = h.control.run_once(WED_1500).await;
    match outcome(&reports, "emr") {
        PassOutcome::Failed(AutoscaleError::Evaluation { source, .. }) => {
            assert_eq!(source, &EvaluationError::UnknownIdentifier("cpu_avg".to_string()));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.actuator.calls().is_empty());
}

#[tokio::test]
async fn actuation_failure_keeps_model_and_cooldown() {
    let h = harness(CONFIG);
    h.load(95.0, 500.0, WED_1500).await;
    h.actuator.set_failing(true);

    let reports = h.control.run_once(WED_1500).await;
    assert!(matches!(
        outcome(&reports, "emr"),
        PassOutcome::Failed(AutoscaleError::Actuation(ActuationError::Rejected { .. }))
    ));
    assert_eq!(h.capacity("emr").await, 10);
    let state = h.control.state("emr").await.unwrap();
    assert_eq!(state.lock().await.cooldown_until, 0);
    assert_eq!(state.lock().await.last_action_at, None);

    // Next iteration retries without waiting for a cooldown.
    h.actuator.set_failing(false);
    h.load(95.0, 500.0, WED_1500 + 60).await;
    let reports = h.control.run_once(WED_1500 + 60).await;
    assert_eq!(outcome(&reports, "emr").action().unwrap().delta, 2);
    assert_eq!(h.capacity("emr").await, 12);
    // One call per computed action: the failed one and the retry.
    assert_eq!(h.actuator.calls().iter().filter(|a| a.resource_id == "emr").count(), 2);
}

#[tokio::test]
async fn concurrent_pass_for_same_resource_is_busy() {
    let h = harness(CONFIG);
    h.load(10.0, 500.0, WED_1500).await;
    // Seed the state table.
    h.control.run_once(WED_1500).await;

    let state = h.control.state("emr").await.unwrap();
    let _held = state.lock().await;
    let reports = h.control.run_once(WED_1500 + 1_000).await;
    assert!(matches!(outcome(&reports, "emr"), PassOutcome::Busy));
    assert!(!matches!(outcome(&reports, "clicks"), PassOutcome::Busy));
}

#[tokio::test]
async fn capacity_stays_in_bounds_and_actions_respect_cooldown() {
    let h = harness(CONFIG);
    let loads = [95.0, 95.0, 10.0, 10.0, 10.0, 95.0, 50.0, 10.0, 95.0, 95.0, 95.0, 95.0, 10.0, 10.0];

    let mut applied_at: Vec<u64> = Vec::new();
    for (i, cpu) in loads.iter().enumerate() {
        let now = WED_1500 + (i as u64) * 120;
        h.load(*cpu, 500.0, now).await;
        let reports = h.control.run_once(now).await;
        if outcome(&reports, "emr").action().is_some() {
            applied_at.push(now);
        }
        let capacity = h.capacity("emr").await;
        assert!((2..=20).contains(&capacity), "capacity {capacity} out of bounds");
    }

    assert!(!applied_at.is_empty());
    for pair in applied_at.windows(2) {
        assert!(pair[1] - pair[0] >= 300, "actions at {} and {} inside cooldown", pair[0], pair[1]);
    }
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let toml = CONFIG.replace("workers = 2", "workers = 2\nloop_interval_secs = 3600");
    let h = harness(&toml);
    let control = Arc::new(h.control);
    let (tx, rx) = tokio::sync::watch::channel(false);

    let handle = {
        let control = control.clone();
        tokio::spawn(async move { control.run(rx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn reload_adds_and_drops_resources() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scalegrid.toml");
    let only_emr = CONFIG.split("[resources.clicks]").next().unwrap().to_string();
    std::fs::write(&path, &only_emr).unwrap();
    set_mtime(&path, 1_000);

    let source = InMemoryMetricSource::new();
    let control = ControlLoop::new(
        Arc::new(FileConfigProvider::load(&path).unwrap()),
        Arc::new(source.clone()),
        Arc::new(DryRunActuator),
    );
    source
        .record("emr", MetricSample::new("cpu_avg", WED_1500, 50.0))
        .await;

    let reports = control.run_once(WED_1500).await;
    assert_eq!(reports.len(), 1);
    assert!(control.state("clicks").await.is_none());

    std::fs::write(&path, CONFIG.replace("[autoscaler]", "[autoscaler]\nautoscaling_clusters = \"clicks\"")).unwrap();
    set_mtime(&path, 2_000);
    let reports = control.run_once(WED_1500 + 60).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].resource_id, "clicks");
    assert!(control.state("emr").await.is_none());
    assert_eq!(control.state("clicks").await.unwrap().lock().await.capacity(), 4);
}

fn set_mtime(path: &std::path::Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(std::time::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}
