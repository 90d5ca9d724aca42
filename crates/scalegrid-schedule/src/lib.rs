//! scalegrid-schedule — proactive, time-based capacity floors.
//!
//! A schedule is a list of `(pattern, minimum)` rules. On every loop
//! iteration the current wall-clock time is formatted with a strftime
//! pattern (default `"%a %H:%M"`, e.g. `"Mon 09:00"`) and tested against
//! each rule's regular expression. The floor is the largest minimum among
//! matching rules; rules state absolute floors, so they are never summed.
//!
//! ```text
//! epoch secs ──format(time_format, utc offset)──► "Mon 09:00"
//!                                                   │
//!        "(Mon|Tue) 0[89]:.*" = 10  ── match ──┐    │
//!        "Mon .*"             = 4   ── match ──┼─ max ──► Some(10)
//!        "Sat .*"             = 1   ── miss    │
//! ```

pub mod error;
pub mod matcher;

pub use error::ScheduleError;
pub use matcher::{DEFAULT_TIME_FORMAT, Schedule, ScheduleRule};
