//! Actuator boundary — the layer that physically adds and removes capacity.
//!
//! The control loop calls [`Actuator::apply_scaling`] at most once per
//! computed action and only advances its capacity model after `Ok(())`.
//! Implementations are not assumed to be idempotent.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use scalegrid_core::ScalingAction;

use crate::error::ActuationError;

/// Boxed future returned by [`Actuator::apply_scaling`].
pub type ActuationFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActuationError>> + Send + 'a>>;

pub trait Actuator: Send + Sync {
    /// Carry out `action`. `Ok(())` means the change is confirmed.
    fn apply_scaling<'a>(&'a self, action: &'a ScalingAction) -> ActuationFuture<'a>;
}

/// Logs every action as JSON and confirms it without touching anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunActuator;

impl Actuator for DryRunActuator {
    fn apply_scaling<'a>(&'a self, action: &'a ScalingAction) -> ActuationFuture<'a> {
        Box::pin(async move {
            let json = serde_json::to_string(action).map_err(|e| ActuationError::Failed {
                resource: action.resource_id.clone(),
                reason: format!("serialize action: {e}"),
            })?;
            info!(resource = %action.resource_id, delta = action.delta, action = %json, "dry run: action confirmed");
            Ok(())
        })
    }
}
