//! Decision engine — one resource, one iteration, at most one action.
//!
//! ```text
//! cooling down? ──yes──► CoolingDown
//!      │ no
//! effective_min = max(baseline, schedule floor)
//!      │
//! downscale_expr > 0 ? ──yes──► remove min(n, capacity − effective_min)
//!      │ no                       └─ selector picks concrete units
//! upscale_expr > 0 ? ────yes──► add min(n, max − capacity)
//!      │ no                       └─ selector places concrete units
//! NoChange
//! ```
//!
//! The schedule floor only constrains downscaling; it never triggers an
//! upscale on its own. When both expressions fire, downscale wins.

use serde::Serialize;
use tracing::{debug, info, warn};

use scalegrid_core::{ResourceConfig, ScalingAction};
use scalegrid_expr::{Bindings, EvaluationError, Expression};
use scalegrid_metrics::MetricSnapshot;

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::selector::{select_additions, select_removals};
use crate::state::ResourceState;

/// Outcome of evaluating one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ScaleDecision {
    /// A previous action is still settling.
    CoolingDown { until: u64 },
    NoChange { reason: NoChangeReason },
    Scale { action: ScalingAction },
}

/// Why no action was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoChangeReason {
    /// Neither expression fired.
    NotTriggered,
    /// Downscale fired but capacity is already at the effective minimum.
    AtFloor,
    /// Upscale fired but capacity is already at the maximum.
    AtCeiling,
    /// A rule fired but no unit could be selected.
    NoEligibleUnits,
}

/// Builtin resource-state identifiers layered over the snapshot.
struct Scope<'a> {
    capacity: u32,
    min_capacity: u32,
    max_capacity: u32,
    effective_min: u32,
    snapshot: &'a MetricSnapshot,
}

impl Bindings for Scope<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        match name {
            "capacity" => Some(f64::from(self.capacity)),
            "min_capacity" => Some(f64::from(self.min_capacity)),
            "max_capacity" => Some(f64::from(self.max_capacity)),
            "effective_min" => Some(f64::from(self.effective_min)),
            _ => self.snapshot.get(name),
        }
    }
}

/// Effective minimum capacity at `now`: the configured minimum raised to
/// the schedule floor, if a schedule rule matches.
pub fn effective_min(resource: &ResourceConfig, now: u64) -> u32 {
    match resource.schedule.floor_at(now) {
        Some(floor) => resource.bounds.min.max(floor),
        None => resource.bounds.min,
    }
}

/// Decide what, if anything, to do with `resource`.
///
/// An expression that cannot be evaluated (missing metric, division by
/// zero) fails the whole decision; the caller takes no action.
pub fn evaluate(
    resource: &ResourceConfig,
    state: &ResourceState,
    snapshot: &MetricSnapshot,
    now: u64,
) -> AutoscaleResult<ScaleDecision> {
    if state.cooling_down(now) {
        return Ok(ScaleDecision::CoolingDown {
            until: state.cooldown_until,
        });
    }

    let capacity = state.capacity();
    let floor = effective_min(resource, now);
    let scope = Scope {
        capacity,
        min_capacity: resource.bounds.min,
        max_capacity: resource.bounds.max,
        effective_min: floor,
        snapshot,
    };

    let down = trigger(&resource.rule.downscale, &scope).map_err(|source| AutoscaleError::Evaluation {
        resource: resource.id.clone(),
        rule: "downscale",
        source,
    })?;
    if down > 0 {
        return Ok(plan_downscale(resource, state, down, floor));
    }

    let up = trigger(&resource.rule.upscale, &scope).map_err(|source| AutoscaleError::Evaluation {
        resource: resource.id.clone(),
        rule: "upscale",
        source,
    })?;
    if up > 0 {
        return Ok(plan_upscale(resource, state, up));
    }

    debug!(resource = %resource.id, capacity, effective_min = floor, "no rule triggered");
    Ok(ScaleDecision::NoChange {
        reason: NoChangeReason::NotTriggered,
    })
}

/// Units requested by an expression; zero when it did not fire. Negative
/// results count as not fired.
fn trigger(expr: &Expression, scope: &Scope<'_>) -> Result<u32, EvaluationError> {
    let delta = expr.evaluate_delta(scope)?;
    Ok(u32::try_from(delta.max(0)).unwrap_or(u32::MAX))
}

fn plan_downscale(resource: &ResourceConfig, state: &ResourceState, requested: u32, floor: u32) -> ScaleDecision {
    let capacity = state.capacity();
    let room = capacity.saturating_sub(floor);
    if room == 0 {
        debug!(resource = %resource.id, capacity, effective_min = floor, requested, "downscale suppressed at floor");
        return ScaleDecision::NoChange {
            reason: NoChangeReason::AtFloor,
        };
    }

    let bounded = requested.min(room);
    let selection = select_removals(&resource.id, &resource.preference, &state.inventory, bounded);
    if let Some(shortfall) = &selection.shortfall {
        warn!(resource = %resource.id, error = %shortfall, "removal candidates exhausted");
    }

    let achieved = selection.achieved();
    if achieved == 0 {
        return ScaleDecision::NoChange {
            reason: NoChangeReason::NoEligibleUnits,
        };
    }
    if achieved < requested {
        warn!(
            resource = %resource.id,
            requested,
            achievable = achieved,
            capacity,
            effective_min = floor,
            "downscale only partially honored"
        );
    }

    let action = ScalingAction {
        resource_id: resource.id.clone(),
        kind: resource.kind,
        delta: -i64::from(achieved),
        requested_delta: -i64::from(requested),
        capacity_before: capacity,
        removals: selection.units,
        additions: Vec::new(),
    };
    info!(
        resource = %resource.id,
        from = capacity,
        to = action.target_capacity(),
        rule = %resource.rule.downscale,
        "scaling down"
    );
    ScaleDecision::Scale { action }
}

fn plan_upscale(resource: &ResourceConfig, state: &ResourceState, requested: u32) -> ScaleDecision {
    let capacity = state.capacity();
    let room = resource.bounds.max.saturating_sub(capacity);
    if room == 0 {
        debug!(resource = %resource.id, capacity, max = resource.bounds.max, requested, "upscale suppressed at maximum");
        return ScaleDecision::NoChange {
            reason: NoChangeReason::AtCeiling,
        };
    }

    let bounded = requested.min(room);
    let selection = select_additions(&resource.id, &resource.preference, &state.inventory, bounded);
    if let Some(shortfall) = &selection.shortfall {
        warn!(resource = %resource.id, error = %shortfall, "no room to place all additions");
    }

    let achieved = selection.achieved();
    if achieved == 0 {
        return ScaleDecision::NoChange {
            reason: NoChangeReason::NoEligibleUnits,
        };
    }
    if achieved < requested {
        warn!(
            resource = %resource.id,
            requested,
            achievable = achieved,
            capacity,
            max = resource.bounds.max,
            "upscale only partially honored"
        );
    }

    let action = ScalingAction {
        resource_id: resource.id.clone(),
        kind: resource.kind,
        delta: i64::from(achieved),
        requested_delta: i64::from(requested),
        capacity_before: capacity,
        removals: Vec::new(),
        additions: selection.units,
    };
    info!(
        resource = %resource.id,
        from = capacity,
        to = action.target_capacity(),
        rule = %resource.rule.upscale,
        "scaling up"
    );
    ScaleDecision::Scale { action }
}
