//! scalegrid-core — shared types and configuration for the autoscaler.
//!
//! Everything that can be wrong about a resource's configuration is caught
//! here, at load time:
//!
//! ```text
//! scalegrid.toml ──► ConfigFile ──compile()──► ScalerConfig
//!                                                └─ ResourceConfig (per resource)
//!                                                     ├─ bounds, cooldown
//!                                                     ├─ ScalingRule (parsed expressions)
//!                                                     ├─ Schedule (compiled patterns)
//!                                                     ├─ preference order
//!                                                     └─ Inventory (groups | shards)
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BUILTIN_IDENTIFIERS, Bounds, ConfigFile, PreferenceEntry, ResourceConfig, ScalerConfig,
    ScalingRule,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
