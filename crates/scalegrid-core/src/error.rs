//! Configuration error types.
//!
//! Every variant is raised while loading configuration; none of them can
//! reach the control loop.

use thiserror::Error;

use scalegrid_expr::ParseError;
use scalegrid_schedule::ScheduleError;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("autoscaling_clusters names undeclared resource: {0}")]
    UnknownCluster(String),

    #[error("{resource}: baseline_nodes ({min}) exceeds max_nodes ({max})")]
    Bounds { resource: String, min: u32, max: u32 },

    #[error("{resource}: missing {field}")]
    MissingExpression { resource: String, field: &'static str },

    #[error("{resource}: {field} is not valid for a {kind} resource")]
    KindMismatch {
        resource: String,
        field: &'static str,
        kind: &'static str,
    },

    #[error("{resource}: malformed {field}: {source}")]
    Expression {
        resource: String,
        field: &'static str,
        #[source]
        source: ParseError,
    },

    #[error("{resource}: {field} references unknown metric '{identifier}'")]
    UnknownIdentifier {
        resource: String,
        field: &'static str,
        identifier: String,
    },

    #[error("{resource}: metric '{metric}' shadows a builtin identifier")]
    BuiltinShadowed { resource: String, metric: String },

    #[error("{resource}: time_based_scaling: {source}")]
    Schedule {
        resource: String,
        #[source]
        source: ScheduleError,
    },

    #[error("{resource}: schedule pattern '{pattern}' sets a floor of {floor}, above max_nodes ({max})")]
    ScheduleAboveMax {
        resource: String,
        pattern: String,
        floor: u32,
        max: u32,
    },

    #[error("{resource}: no {what} declared")]
    EmptyInventory { resource: String, what: &'static str },

    #[error("{resource}: instance group '{group}' declared more than once")]
    DuplicateGroup { resource: String, group: String },

    #[error("{resource}: node '{node}' belongs to both '{first}' and '{second}'")]
    OverlappingGroups {
        resource: String,
        node: String,
        first: String,
        second: String,
    },

    #[error("{resource}: instance group '{group}' has unknown market '{market}'")]
    InvalidMarket {
        resource: String,
        group: String,
        market: String,
    },

    #[error("{resource}: instance group '{group}' has min_size {min} above max_size {max}")]
    InvalidGroupSize {
        resource: String,
        group: String,
        min: u32,
        max: u32,
    },

    #[error("{resource}: instance group '{group}' declares {nodes} node(s), outside [{min}, {max}]")]
    GroupSizeOutOfBounds {
        resource: String,
        group: String,
        nodes: u32,
        min: u32,
        max: u32,
    },

    #[error("{resource}: declared capacity {capacity} is outside [{min}, {max}]")]
    CapacityOutOfBounds {
        resource: String,
        capacity: u32,
        min: u32,
        max: u32,
    },

    #[error("{resource}: group_or_preferred_market entry '{entry}' is neither a group id nor a market")]
    UnknownPreference { resource: String, entry: String },

    #[error("{resource}: shard '{shard}' declared more than once")]
    DuplicateShard { resource: String, shard: String },

    #[error("{resource}: shard '{shard}' has an invalid hash key range: {reason}")]
    InvalidShardRange {
        resource: String,
        shard: String,
        reason: String,
    },

    #[error("{resource}: shards '{left}' and '{right}' overlap")]
    ShardOverlap {
        resource: String,
        left: String,
        right: String,
    },

    #[error("{resource}: gap between shards '{left}' and '{right}'; only adjacent shards can merge")]
    ShardGap {
        resource: String,
        left: String,
        right: String,
    },
}
