//! Control loop driver.
//!
//! Every interval the driver takes a configuration snapshot, syncs the
//! state table, and runs one pass per resource on a bounded worker pool:
//!
//! ```text
//!          ┌────────────── pass(now) ───────────────┐
//!          │  provider.current() → ScalerConfig       │
//!          │  states.sync()                           │
//!          │  for each resource (≤ workers at once):  │
//!          │    try_lock state ── held ──► Busy       │
//!          │    cooldown?  ─────────────► CoolingDown │
//!          │    snapshot   ── error ────► Failed      │
//!          │    engine     ── error ────► Failed      │
//!          │    actuator   ── error ────► Failed      │
//!          │    state.apply(action)  ───► Applied     │
//!          └──────────────────────────────────────────┘
//! ```
//!
//! Failures stay inside their resource's pass. Once shutdown is signalled,
//! passes already running finish but no new pass starts.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use scalegrid_core::{ResourceConfig, ScalingAction};
use scalegrid_metrics::MetricSource;

use crate::actuator::Actuator;
use crate::engine::{self, NoChangeReason, ScaleDecision};
use crate::error::AutoscaleError;
use crate::provider::ConfigProvider;
use crate::state::{StateHandle, StateTable};

/// What happened to one resource in one pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// Another pass for this resource still holds its state.
    Busy,
    /// Shutdown was requested before this pass started.
    Cancelled,
    CoolingDown { until: u64 },
    NoChange(NoChangeReason),
    /// The actuator confirmed the action and the model was advanced.
    Applied(ScalingAction),
    Failed(AutoscaleError),
}

impl PassOutcome {
    pub fn action(&self) -> Option<&ScalingAction> {
        match self {
            PassOutcome::Applied(action) => Some(action),
            _ => None,
        }
    }
}

/// Result of one resource's pass.
#[derive(Debug)]
pub struct PassReport {
    pub resource_id: String,
    pub outcome: PassOutcome,
}

/// Drives the decision pipeline for every configured resource.
pub struct ControlLoop {
    provider: Arc<dyn ConfigProvider>,
    source: Arc<dyn MetricSource>,
    actuator: Arc<dyn Actuator>,
    states: Mutex<StateTable>,
}

impl ControlLoop {
    pub fn new(
        provider: Arc<dyn ConfigProvider>,
        source: Arc<dyn MetricSource>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self {
            provider,
            source,
            actuator,
            states: Mutex::new(StateTable::new()),
        }
    }

    /// Current state handle for a resource, if it has been seen.
    pub async fn state(&self, resource_id: &str) -> Option<StateHandle> {
        self.states.lock().await.get(resource_id)
    }

    /// Run one evaluation pass for every resource at `now` (Unix seconds).
    pub async fn run_once(&self, now: u64) -> Vec<PassReport> {
        self.pass(now, None).await
    }

    async fn pass(&self, now: u64, shutdown: Option<&watch::Receiver<bool>>) -> Vec<PassReport> {
        let config = self.provider.current().await;
        let work = self.states.lock().await.sync(&config);

        let workers = Arc::new(Semaphore::new(config.workers));
        let mut tasks = JoinSet::new();
        for (resource, state) in work {
            let ctx = PassContext {
                resource,
                state,
                source: self.source.clone(),
                actuator: self.actuator.clone(),
                shutdown: shutdown.cloned(),
                now,
            };
            let workers = workers.clone();
            tasks.spawn(async move {
                let resource_id = ctx.resource.id.clone();
                let outcome = match workers.acquire_owned().await {
                    Ok(_permit) => ctx.run().await,
                    Err(_) => PassOutcome::Cancelled,
                };
                PassReport { resource_id, outcome }
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "resource pass aborted"),
            }
        }
        reports.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        reports
    }

    /// Run passes at the configured interval until `shutdown` flips.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut shutdown = shutdown;
        let pass_shutdown = shutdown.clone();
        let mut interval = self.provider.current().await.loop_interval;
        info!(interval_secs = interval.as_secs(), "control loop started");

        let mut next = Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {
                    let started = Instant::now();
                    let reports = self.pass(epoch_secs(), Some(&pass_shutdown)).await;
                    let applied = reports.iter().filter(|r| r.outcome.action().is_some()).count();
                    debug!(resources = reports.len(), applied, elapsed_ms = started.elapsed().as_millis() as u64, "pass complete");

                    interval = self.provider.current().await.loop_interval;
                    next = started + interval;
                }
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
            if *pass_shutdown.borrow() {
                info!("control loop shutting down");
                break;
            }
        }
    }
}

/// Everything one resource's pass needs, owned so it can run on its own task.
struct PassContext {
    resource: Arc<ResourceConfig>,
    state: StateHandle,
    source: Arc<dyn MetricSource>,
    actuator: Arc<dyn Actuator>,
    shutdown: Option<watch::Receiver<bool>>,
    now: u64,
}

impl PassContext {
    async fn run(self) -> PassOutcome {
        let id = &self.resource.id;
        if self.shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
            debug!(resource = %id, "shutdown requested, pass not started");
            return PassOutcome::Cancelled;
        }

        let Ok(mut state) = self.state.try_lock() else {
            debug!(resource = %id, "previous pass still running, skipping");
            return PassOutcome::Busy;
        };

        if state.cooling_down(self.now) {
            debug!(resource = %id, until = state.cooldown_until, "cooling down, skipping");
            return PassOutcome::CoolingDown {
                until: state.cooldown_until,
            };
        }

        let snapshot = match self
            .resource
            .snapshot
            .collect(self.source.as_ref(), id, self.now)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(resource = %id, error = %e, "metric fetch failed, skipping until next pass");
                return PassOutcome::Failed(e.into());
            }
        };

        let action = match engine::evaluate(&self.resource, &state, &snapshot, self.now) {
            Ok(ScaleDecision::Scale { action }) => action,
            Ok(ScaleDecision::NoChange { reason }) => return PassOutcome::NoChange(reason),
            Ok(ScaleDecision::CoolingDown { until }) => return PassOutcome::CoolingDown { until },
            Err(e) => {
                warn!(resource = %id, error = %e, "evaluation failed, no action");
                return PassOutcome::Failed(e);
            }
        };

        // Exactly one actuator call per computed action.
        match self.actuator.apply_scaling(&action).await {
            Ok(()) => {
                state.apply(&action, self.now, self.resource.cooldown_secs);
                info!(
                    resource = %id,
                    delta = action.delta,
                    capacity = state.capacity(),
                    cooldown_until = state.cooldown_until,
                    "action applied"
                );
                PassOutcome::Applied(action)
            }
            Err(e) => {
                warn!(resource = %id, delta = action.delta, error = %e, "actuation failed, model and cooldown unchanged");
                PassOutcome::Failed(e.into())
            }
        }
    }
}

/// Current time as Unix seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
