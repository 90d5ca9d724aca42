//! scalegrid.toml configuration parser.
//!
//! The file is deserialized into [`ConfigFile`] and then compiled into a
//! [`ScalerConfig`]: expressions are parsed, schedule patterns compiled,
//! inventories checked. Anything wrong is a [`ConfigError`] here, before the
//! control loop ever sees the configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use scalegrid_expr::Expression;
use scalegrid_metrics::{Aggregation, SnapshotBuilder};
use scalegrid_schedule::{DEFAULT_TIME_FORMAT, Schedule, ScheduleRule};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{HashKeyRange, InstanceGroup, Inventory, Market, ResourceKind, Shard};

/// Identifiers the decision engine binds for every expression, in
/// addition to snapshot metrics.
pub const BUILTIN_IDENTIFIERS: [&str; 4] = ["capacity", "min_capacity", "max_capacity", "effective_min"];

// ── File form ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub autoscaler: AutoscalerSection,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoscalerSection {
    /// Comma-separated resource ids to manage. All declared resources
    /// when absent.
    pub autoscaling_clusters: Option<String>,
    #[serde(default = "default_loop_interval_secs")]
    pub loop_interval_secs: u64,
    /// Length of the decision window.
    #[serde(default = "default_monitoring_interval_secs")]
    pub monitoring_interval_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for AutoscalerSection {
    fn default() -> Self {
        Self {
            autoscaling_clusters: None,
            loop_interval_secs: default_loop_interval_secs(),
            monitoring_interval_secs: default_monitoring_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
            workers: default_workers(),
            time_format: default_time_format(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_loop_interval_secs() -> u64 {
    60
}

fn default_monitoring_interval_secs() -> u64 {
    600
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_workers() -> usize {
    4
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSection {
    pub kind: ResourceKind,
    /// Configured minimum capacity.
    pub baseline_nodes: u32,
    /// Configured maximum capacity.
    pub max_nodes: u32,
    pub cooldown_secs: Option<u64>,
    pub upscale_expr: Option<String>,
    pub downscale_expr: Option<String>,
    pub stream_upscale_expr: Option<String>,
    pub stream_downscale_expr: Option<String>,
    #[serde(default)]
    pub group_or_preferred_market: Vec<String>,
    /// Schedule pattern → minimum capacity.
    #[serde(default)]
    pub time_based_scaling: BTreeMap<String, u32>,
    /// Metric name → aggregation over the decision window.
    #[serde(default)]
    pub metrics: BTreeMap<String, Aggregation>,
    #[serde(default)]
    pub groups: Vec<GroupSection>,
    #[serde(default)]
    pub shards: Vec<ShardSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSection {
    pub id: String,
    pub market: String,
    #[serde(default)]
    pub min_size: u32,
    pub max_size: Option<u32>,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardSection {
    pub id: String,
    /// Decimal hash key; strings because keys exceed TOML's integer range.
    pub start: String,
    pub end: String,
}

// ── Compiled form ─────────────────────────────────────────────────

/// Validated configuration, ready for the control loop.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub loop_interval: Duration,
    pub monitoring_window_secs: u64,
    pub workers: usize,
    /// Managed resources, in `autoscaling_clusters` order when given.
    pub resources: Vec<Arc<ResourceConfig>>,
}

/// Inclusive capacity bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
}

impl Bounds {
    pub fn contains(&self, capacity: u32) -> bool {
        (self.min..=self.max).contains(&capacity)
    }
}

/// A resource's reactive rule pair. Each expression yields a non-negative
/// unit count when triggered.
#[derive(Debug, Clone)]
pub struct ScalingRule {
    pub upscale: Expression,
    pub downscale: Expression,
}

/// One entry of `group_or_preferred_market`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceEntry {
    Group(String),
    Market(Market),
}

impl PreferenceEntry {
    pub fn matches(&self, group: &InstanceGroup) -> bool {
        match self {
            PreferenceEntry::Group(id) => &group.id == id,
            PreferenceEntry::Market(market) => group.market == *market,
        }
    }
}

impl fmt::Display for PreferenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceEntry::Group(id) => write!(f, "group:{id}"),
            PreferenceEntry::Market(market) => write!(f, "market:{market}"),
        }
    }
}

/// Everything the engine needs to decide for one resource.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub id: String,
    pub kind: ResourceKind,
    pub bounds: Bounds,
    pub cooldown_secs: u64,
    pub rule: ScalingRule,
    pub schedule: Schedule,
    /// Order in which instance groups give up or receive nodes.
    pub preference: Vec<PreferenceEntry>,
    pub snapshot: SnapshotBuilder,
    /// Inventory declared in the file; the starting point of the capacity model.
    pub inventory: Inventory,
}

impl ScalerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.compile()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("load config {}", path.display()))?;
        Ok(config)
    }

    pub fn resource(&self, id: &str) -> Option<&Arc<ResourceConfig>> {
        self.resources.iter().find(|r| r.id == id)
    }
}

impl ConfigFile {
    /// Validate and compile into a [`ScalerConfig`].
    pub fn compile(&self) -> ConfigResult<ScalerConfig> {
        let section = &self.autoscaler;
        if section.loop_interval_secs == 0 {
            return Err(invalid("loop_interval_secs", "must be positive"));
        }
        if section.monitoring_interval_secs == 0 {
            return Err(invalid("monitoring_interval_secs", "must be positive"));
        }
        if section.workers == 0 {
            return Err(invalid("workers", "must be positive"));
        }

        let ids: Vec<&str> = match &section.autoscaling_clusters {
            Some(list) => {
                let mut seen = HashSet::new();
                let mut ids = Vec::new();
                for id in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    if !self.resources.contains_key(id) {
                        return Err(ConfigError::UnknownCluster(id.to_string()));
                    }
                    if seen.insert(id) {
                        ids.push(id);
                    }
                }
                ids
            }
            None => self.resources.keys().map(String::as_str).collect(),
        };

        let mut resources = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = &self.resources[id];
            resources.push(Arc::new(compile_resource(id, raw, section)?));
        }

        Ok(ScalerConfig {
            loop_interval: Duration::from_secs(section.loop_interval_secs),
            monitoring_window_secs: section.monitoring_interval_secs,
            workers: section.workers,
            resources,
        })
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        key,
        reason: reason.to_string(),
    }
}

fn compile_resource(
    id: &str,
    raw: &ResourceSection,
    section: &AutoscalerSection,
) -> ConfigResult<ResourceConfig> {
    if raw.baseline_nodes > raw.max_nodes {
        return Err(ConfigError::Bounds {
            resource: id.to_string(),
            min: raw.baseline_nodes,
            max: raw.max_nodes,
        });
    }
    let bounds = Bounds {
        min: raw.baseline_nodes,
        max: raw.max_nodes,
    };

    // Metrics first: expressions are checked against them.
    let mut snapshot = SnapshotBuilder::new(section.monitoring_interval_secs);
    for (metric, aggregation) in &raw.metrics {
        if BUILTIN_IDENTIFIERS.contains(&metric.as_str()) {
            return Err(ConfigError::BuiltinShadowed {
                resource: id.to_string(),
                metric: metric.clone(),
            });
        }
        snapshot = snapshot.with_metric(metric, *aggregation);
    }

    let rule = compile_rule(id, raw)?;
    for (field, expr) in rule_fields(raw.kind, &rule) {
        if let Some(identifier) = expr
            .identifiers()
            .find(|name| !BUILTIN_IDENTIFIERS.contains(name) && !raw.metrics.contains_key(*name))
        {
            return Err(ConfigError::UnknownIdentifier {
                resource: id.to_string(),
                field,
                identifier: identifier.to_string(),
            });
        }
    }

    let schedule = compile_schedule(id, raw, section)?;

    let (inventory, preference) = match raw.kind {
        ResourceKind::Compute => compile_compute_inventory(id, raw)?,
        ResourceKind::Stream => (compile_stream_inventory(id, raw)?, Vec::new()),
    };
    let capacity = inventory.capacity();
    if !bounds.contains(capacity) {
        return Err(ConfigError::CapacityOutOfBounds {
            resource: id.to_string(),
            capacity,
            min: bounds.min,
            max: bounds.max,
        });
    }

    Ok(ResourceConfig {
        id: id.to_string(),
        kind: raw.kind,
        bounds,
        cooldown_secs: raw.cooldown_secs.unwrap_or(section.cooldown_secs),
        rule,
        schedule,
        preference,
        snapshot,
        inventory,
    })
}

fn rule_fields(kind: ResourceKind, rule: &ScalingRule) -> [(&'static str, &Expression); 2] {
    match kind {
        ResourceKind::Compute => [("upscale_expr", &rule.upscale), ("downscale_expr", &rule.downscale)],
        ResourceKind::Stream => [
            ("stream_upscale_expr", &rule.upscale),
            ("stream_downscale_expr", &rule.downscale),
        ],
    }
}

fn compile_rule(id: &str, raw: &ResourceSection) -> ConfigResult<ScalingRule> {
    let (up_field, up, down_field, down, foreign) = match raw.kind {
        ResourceKind::Compute => (
            "upscale_expr",
            &raw.upscale_expr,
            "downscale_expr",
            &raw.downscale_expr,
            [
                ("stream_upscale_expr", &raw.stream_upscale_expr),
                ("stream_downscale_expr", &raw.stream_downscale_expr),
            ],
        ),
        ResourceKind::Stream => (
            "stream_upscale_expr",
            &raw.stream_upscale_expr,
            "stream_downscale_expr",
            &raw.stream_downscale_expr,
            [
                ("upscale_expr", &raw.upscale_expr),
                ("downscale_expr", &raw.downscale_expr),
            ],
        ),
    };

    if let Some((field, _)) = foreign.iter().find(|(_, value)| value.is_some()) {
        return Err(ConfigError::KindMismatch {
            resource: id.to_string(),
            field: *field,
            kind: raw.kind.as_str(),
        });
    }

    let parse = |field: &'static str, source: &Option<String>| -> ConfigResult<Expression> {
        let source = source.as_deref().ok_or_else(|| ConfigError::MissingExpression {
            resource: id.to_string(),
            field,
        })?;
        Expression::parse(source).map_err(|source| ConfigError::Expression {
            resource: id.to_string(),
            field,
            source,
        })
    };

    Ok(ScalingRule {
        upscale: parse(up_field, up)?,
        downscale: parse(down_field, down)?,
    })
}

fn compile_schedule(
    id: &str,
    raw: &ResourceSection,
    section: &AutoscalerSection,
) -> ConfigResult<Schedule> {
    let schedule_err = |source| ConfigError::Schedule {
        resource: id.to_string(),
        source,
    };

    let mut rules = Vec::with_capacity(raw.time_based_scaling.len());
    for (pattern, floor) in &raw.time_based_scaling {
        if *floor > raw.max_nodes {
            return Err(ConfigError::ScheduleAboveMax {
                resource: id.to_string(),
                pattern: pattern.clone(),
                floor: *floor,
                max: raw.max_nodes,
            });
        }
        rules.push(ScheduleRule::new(pattern, *floor).map_err(schedule_err)?);
    }

    Schedule::new(rules, &section.time_format, section.utc_offset_minutes).map_err(schedule_err)
}

fn compile_compute_inventory(
    id: &str,
    raw: &ResourceSection,
) -> ConfigResult<(Inventory, Vec<PreferenceEntry>)> {
    if !raw.shards.is_empty() {
        return Err(ConfigError::KindMismatch {
            resource: id.to_string(),
            field: "shards",
            kind: "compute",
        });
    }
    if raw.groups.is_empty() {
        return Err(ConfigError::EmptyInventory {
            resource: id.to_string(),
            what: "instance groups",
        });
    }

    let mut groups: Vec<InstanceGroup> = Vec::with_capacity(raw.groups.len());
    // node id → owning group id
    let mut owners: HashMap<&str, &str> = HashMap::new();

    for g in &raw.groups {
        if groups.iter().any(|existing| existing.id == g.id) {
            return Err(ConfigError::DuplicateGroup {
                resource: id.to_string(),
                group: g.id.clone(),
            });
        }
        let market = Market::parse(&g.market).ok_or_else(|| ConfigError::InvalidMarket {
            resource: id.to_string(),
            group: g.id.clone(),
            market: g.market.clone(),
        })?;
        let max_size = g.max_size.unwrap_or(raw.max_nodes);
        if g.min_size > max_size {
            return Err(ConfigError::InvalidGroupSize {
                resource: id.to_string(),
                group: g.id.clone(),
                min: g.min_size,
                max: max_size,
            });
        }
        let declared = u32::try_from(g.nodes.len()).unwrap_or(u32::MAX);
        if declared < g.min_size || declared > max_size {
            return Err(ConfigError::GroupSizeOutOfBounds {
                resource: id.to_string(),
                group: g.id.clone(),
                nodes: declared,
                min: g.min_size,
                max: max_size,
            });
        }
        for node in &g.nodes {
            if let Some(first) = owners.insert(node.as_str(), g.id.as_str()) {
                return Err(ConfigError::OverlappingGroups {
                    resource: id.to_string(),
                    node: node.clone(),
                    first: first.to_string(),
                    second: g.id.clone(),
                });
            }
        }
        groups.push(InstanceGroup {
            id: g.id.clone(),
            market,
            min_size: g.min_size,
            max_size,
            nodes: g.nodes.clone(),
        });
    }

    let preference = if raw.group_or_preferred_market.is_empty() {
        groups
            .iter()
            .map(|g| PreferenceEntry::Group(g.id.clone()))
            .collect()
    } else {
        let mut preference = Vec::with_capacity(raw.group_or_preferred_market.len());
        for entry in &raw.group_or_preferred_market {
            let entry = entry.trim();
            if groups.iter().any(|g| g.id == entry) {
                preference.push(PreferenceEntry::Group(entry.to_string()));
            } else if let Some(market) = Market::parse(entry) {
                preference.push(PreferenceEntry::Market(market));
            } else {
                return Err(ConfigError::UnknownPreference {
                    resource: id.to_string(),
                    entry: entry.to_string(),
                });
            }
        }
        preference
    };

    Ok((Inventory::Compute { groups }, preference))
}

fn compile_stream_inventory(id: &str, raw: &ResourceSection) -> ConfigResult<Inventory> {
    if !raw.groups.is_empty() {
        return Err(ConfigError::KindMismatch {
            resource: id.to_string(),
            field: "groups",
            kind: "stream",
        });
    }
    if !raw.group_or_preferred_market.is_empty() {
        return Err(ConfigError::KindMismatch {
            resource: id.to_string(),
            field: "group_or_preferred_market",
            kind: "stream",
        });
    }
    if raw.shards.is_empty() {
        return Err(ConfigError::EmptyInventory {
            resource: id.to_string(),
            what: "shards",
        });
    }

    let range_err = |shard: &str, reason: String| ConfigError::InvalidShardRange {
        resource: id.to_string(),
        shard: shard.to_string(),
        reason,
    };

    let mut shards: Vec<Shard> = Vec::with_capacity(raw.shards.len());
    for s in &raw.shards {
        if shards.iter().any(|existing| existing.id == s.id) {
            return Err(ConfigError::DuplicateShard {
                resource: id.to_string(),
                shard: s.id.clone(),
            });
        }
        let start: u128 = s
            .start
            .trim()
            .parse()
            .map_err(|e| range_err(&s.id, format!("start '{}': {e}", s.start)))?;
        let end: u128 = s
            .end
            .trim()
            .parse()
            .map_err(|e| range_err(&s.id, format!("end '{}': {e}", s.end)))?;
        let range = HashKeyRange::new(start, end)
            .ok_or_else(|| range_err(&s.id, format!("start {start} is after end {end}")))?;
        shards.push(Shard {
            id: s.id.clone(),
            range,
        });
    }

    shards.sort_by_key(|s| s.range.start);
    for pair in shards.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if left.range.overlaps(&right.range) {
            return Err(ConfigError::ShardOverlap {
                resource: id.to_string(),
                left: left.id.clone(),
                right: right.id.clone(),
            });
        }
        if !left.range.is_adjacent_to(&right.range) {
            return Err(ConfigError::ShardGap {
                resource: id.to_string(),
                left: left.id.clone(),
                right: right.id.clone(),
            });
        }
    }

    Ok(Inventory::Stream { shards })
}
