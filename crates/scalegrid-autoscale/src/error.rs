//! Runtime error types for the autoscaler.
//!
//! None of these stop the control loop: each one ends a single resource's
//! pass and is reported in its outcome.

use thiserror::Error;

use scalegrid_expr::EvaluationError;
use scalegrid_metrics::FetchError;

/// Errors that can end one resource's pass.
#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// An expression could not produce a scaling signal. No action is taken.
    #[error("{resource}: {rule} expression failed: {source}")]
    Evaluation {
        resource: String,
        rule: &'static str,
        #[source]
        source: EvaluationError,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Actuation(#[from] ActuationError),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

/// Failure reported by an [`Actuator`](crate::actuator::Actuator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuationError {
    /// The backend refused the action (quota, invalid state, ...).
    #[error("{resource}: actuator rejected action: {reason}")]
    Rejected { resource: String, reason: String },

    /// The backend could not be reached or failed mid-call.
    #[error("{resource}: actuation failed: {reason}")]
    Failed { resource: String, reason: String },
}

/// The selector found fewer units than requested. Not fatal: the partial
/// action is still emitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource}: requested {requested} units, only {achievable} achievable")]
pub struct CapacityExhausted {
    pub resource: String,
    pub requested: u32,
    pub achievable: u32,
}
