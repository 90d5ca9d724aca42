//! scalegrid-autoscale — decides and applies capacity changes.
//!
//! Combines two policies per resource: reactive rules evaluated against a
//! metric snapshot, and a proactive schedule floor. Produces at most one
//! `ScalingAction` per resource per iteration and hands it to an actuator.
//!
//! # Decision Algorithm
//!
//! ```text
//! effective_min = max(baseline_nodes, schedule floor at now)
//!
//! if downscale_expr > 0 and capacity > effective_min:
//!     remove min(n, capacity - effective_min) units   // selector picks which
//! elif upscale_expr > 0 and capacity < max:
//!     add min(n, max - capacity) units
//! ```
//!
//! Downscale is evaluated first and wins ties. An expression that cannot
//! be evaluated means no action. Cooldown restarts only when the actuator
//! confirms an action.

pub mod actuator;
pub mod driver;
pub mod engine;
pub mod error;
pub mod provider;
pub mod selector;
pub mod state;

pub use actuator::{ActuationFuture, Actuator, DryRunActuator};
pub use driver::{ControlLoop, PassOutcome, PassReport, epoch_secs};
pub use engine::{NoChangeReason, ScaleDecision, effective_min, evaluate};
pub use error::{ActuationError, AutoscaleError, AutoscaleResult, CapacityExhausted};
pub use provider::{ConfigFuture, ConfigProvider, FileConfigProvider, StaticConfigProvider};
pub use selector::{Selection, select_additions, select_removals};
pub use state::{ResourceState, StateHandle, StateTable};
