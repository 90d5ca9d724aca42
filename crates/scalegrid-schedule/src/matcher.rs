//! Schedule matcher — formats the wall clock and matches rule patterns.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::ScheduleError;

/// Default wall-clock format: abbreviated weekday plus 24h time.
pub const DEFAULT_TIME_FORMAT: &str = "%a %H:%M";

/// One `(pattern, minimum capacity)` rule.
///
/// The pattern must match the whole formatted timestamp; it is anchored
/// on both ends when compiled.
#[derive(Debug, Clone)]
pub struct ScheduleRule {
    pattern: String,
    regex: Regex,
    min_capacity: u32,
}

impl ScheduleRule {
    pub fn new(pattern: &str, min_capacity: u32) -> Result<Self, ScheduleError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            ScheduleError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            min_capacity,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn min_capacity(&self) -> u32 {
        self.min_capacity
    }

    pub fn matches(&self, formatted: &str) -> bool {
        self.regex.is_match(formatted)
    }
}

/// A resource's full set of schedule rules plus the clock formatting used
/// to evaluate them.
#[derive(Debug, Clone)]
pub struct Schedule {
    rules: Vec<ScheduleRule>,
    time_format: String,
    offset: FixedOffset,
}

impl Schedule {
    /// Build a schedule. `time_format` is a chrono strftime string and is
    /// validated here so formatting can never fail later.
    pub fn new(
        rules: Vec<ScheduleRule>,
        time_format: &str,
        utc_offset_minutes: i32,
    ) -> Result<Self, ScheduleError> {
        if time_format.is_empty()
            || StrftimeItems::new(time_format).any(|item| matches!(item, Item::Error))
        {
            return Err(ScheduleError::InvalidTimeFormat(time_format.to_string()));
        }
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ScheduleError::InvalidOffset(utc_offset_minutes))?;

        Ok(Self {
            rules,
            time_format: time_format.to_string(),
            offset,
        })
    }

    /// A schedule with no rules; never yields a floor.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            offset: Utc.fix(),
        }
    }

    pub fn rules(&self) -> &[ScheduleRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The largest floor any rule could impose.
    pub fn max_min_capacity(&self) -> Option<u32> {
        self.rules.iter().map(ScheduleRule::min_capacity).max()
    }

    /// Format `epoch_secs` the way rule patterns see it.
    pub fn format(&self, epoch_secs: u64) -> Option<String> {
        let secs = i64::try_from(epoch_secs).ok()?;
        let utc = DateTime::<Utc>::from_timestamp(secs, 0)?;
        Some(
            utc.with_timezone(&self.offset)
                .format(&self.time_format)
                .to_string(),
        )
    }

    /// Floor for an already formatted timestamp: the maximum minimum
    /// among matching rules, or `None` if nothing matches.
    pub fn floor_for(&self, formatted: &str) -> Option<u32> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(formatted))
            .map(ScheduleRule::min_capacity)
            .max()
    }

    /// Floor in effect at `epoch_secs`.
    pub fn floor_at(&self, epoch_secs: u64) -> Option<u32> {
        if self.rules.is_empty() {
            return None;
        }
        let formatted = self.format(epoch_secs)?;
        let floor = self.floor_for(&formatted);
        if let Some(floor) = floor {
            debug!(time = %formatted, floor, "schedule floor active");
        }
        floor
    }
}
