//! Rendering pass results and configuration summaries for the CLI.

use serde_json::{Value, json};

use scalegrid_autoscale::{PassOutcome, PassReport};
use scalegrid_core::{Inventory, ScalerConfig};

/// One JSON object per resource pass.
pub fn pass_to_json(report: &PassReport) -> Value {
    let (outcome, detail) = match &report.outcome {
        PassOutcome::Busy => ("busy", Value::Null),
        PassOutcome::Cancelled => ("cancelled", Value::Null),
        PassOutcome::CoolingDown { until } => ("cooling_down", json!({ "until": until })),
        PassOutcome::NoChange(reason) => ("no_change", json!({ "reason": reason })),
        PassOutcome::Applied(action) => ("applied", json!({ "action": action })),
        PassOutcome::Failed(e) => ("failed", json!({ "error": e.to_string() })),
    };
    json!({
        "resource": report.resource_id,
        "outcome": outcome,
        "detail": detail,
    })
}

/// Human-readable summary printed by `scalegridd check`.
pub fn config_summary(config: &ScalerConfig) -> String {
    let mut out = format!(
        "loop every {}s, window {}s, {} worker(s), {} resource(s)\n",
        config.loop_interval.as_secs(),
        config.monitoring_window_secs,
        config.workers,
        config.resources.len()
    );
    for r in &config.resources {
        let units = match &r.inventory {
            Inventory::Compute { groups } => format!("{} group(s)", groups.len()),
            Inventory::Stream { shards } => format!("{} shard(s)", shards.len()),
        };
        let preference: Vec<String> = r.preference.iter().map(ToString::to_string).collect();
        out.push_str(&format!(
            "  {} [{}] capacity {} in [{}, {}], {}, cooldown {}s\n",
            r.id,
            r.kind,
            r.inventory.capacity(),
            r.bounds.min,
            r.bounds.max,
            units,
            r.cooldown_secs
        ));
        out.push_str(&format!("    upscale:   {}\n", r.rule.upscale));
        out.push_str(&format!("    downscale: {}\n", r.rule.downscale));
        if !r.schedule.is_empty() {
            for rule in r.schedule.rules() {
                out.push_str(&format!("    schedule:  '{}' → min {}\n", rule.pattern(), rule.min_capacity()));
            }
        }
        if !preference.is_empty() {
            out.push_str(&format!("    preference: {}\n", preference.join(", ")));
        }
    }
    out
}
