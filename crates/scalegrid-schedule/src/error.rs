//! Schedule error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("invalid schedule pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid time format '{0}'")]
    InvalidTimeFormat(String),

    #[error("utc offset of {0} minutes is out of range")]
    InvalidOffset(i32),
}
