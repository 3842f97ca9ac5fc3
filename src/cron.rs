//! Cron expression parsing and schedule evaluation.
//!
//! Supports standard 5-field cron expressions:
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (0-6, 0 = Sunday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Fire times have minute resolution. [`compute_schedule`] derives the pair
//! the reconciler needs each cycle: the most recent fire time that passed
//! without producing a run, and the next upcoming fire time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

use crate::config::MissedRunPolicy;

/// Errors that can occur when parsing schedule expressions.
#[derive(Debug, Error)]
pub enum ScheduleParseError {
    #[error("expected 5 fields, got {0}")]
    InvalidFieldCount(usize),
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
    #[error("value {value} is out of range [{min}, {max}] for {field}")]
    OutOfRange {
        field: String,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("invalid range: {0}-{1}")]
    InvalidRange(u32, u32),
    #[error("invalid step value: {0}")]
    InvalidStep(String),
}

/// One field of a cron expression, held as the set of matching values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
    min: u32,
    max: u32,
}

impl CronField {
    fn new(min: u32, max: u32) -> Self {
        Self {
            values: BTreeSet::new(),
            min,
            max,
        }
    }

    fn parse(&mut self, expr: &str) -> Result<(), ScheduleParseError> {
        for part in expr.split(',') {
            self.parse_part(part.trim())?;
        }
        Ok(())
    }

    fn parse_part(&mut self, part: &str) -> Result<(), ScheduleParseError> {
        // Split off a step suffix (e.g. */5, 10-40/15)
        let (range_part, step) = if let Some(idx) = part.find('/') {
            let step_str = &part[idx + 1..];
            let step = step_str
                .parse::<u32>()
                .map_err(|_| ScheduleParseError::InvalidStep(step_str.to_string()))?;
            if step == 0 {
                return Err(ScheduleParseError::InvalidStep("0".to_string()));
            }
            (&part[..idx], Some(step))
        } else {
            (part, None)
        };

        let (start, end) = if range_part == "*" {
            (self.min, self.max)
        } else if let Some(idx) = range_part.find('-') {
            let start = range_part[..idx].parse::<u32>().map_err(|_| {
                ScheduleParseError::InvalidField {
                    field: range_part.to_string(),
                    reason: "invalid start of range".to_string(),
                }
            })?;
            let end = range_part[idx + 1..].parse::<u32>().map_err(|_| {
                ScheduleParseError::InvalidField {
                    field: range_part.to_string(),
                    reason: "invalid end of range".to_string(),
                }
            })?;
            if start > end {
                return Err(ScheduleParseError::InvalidRange(start, end));
            }
            (start, end)
        } else {
            let value = range_part.parse::<u32>().map_err(|_| {
                ScheduleParseError::InvalidField {
                    field: range_part.to_string(),
                    reason: "invalid value".to_string(),
                }
            })?;
            (value, value)
        };

        if start < self.min || end > self.max {
            return Err(ScheduleParseError::OutOfRange {
                field: range_part.to_string(),
                value: if start < self.min { start } else { end },
                min: self.min,
                max: self.max,
            });
        }

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            self.values.insert(value);
            value += step;
        }

        Ok(())
    }

    fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// Parse an expression string.
    pub fn parse(expr: &str) -> Result<Self, ScheduleParseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScheduleParseError::InvalidFieldCount(parts.len()));
        }

        let mut minute = CronField::new(0, 59);
        let mut hour = CronField::new(0, 23);
        let mut day_of_month = CronField::new(1, 31);
        let mut month = CronField::new(1, 12);
        let mut day_of_week = CronField::new(0, 6);

        minute.parse(parts[0])?;
        hour.parse(parts[1])?;
        day_of_month.parse(parts[2])?;
        month.parse(parts[3])?;
        day_of_week.parse(parts[4])?;

        Ok(Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
        })
    }

    /// Check whether a datetime (at minute resolution) matches.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.day_of_month.matches(dt.day())
            && self.month.matches(dt.month())
            && self.day_of_week.matches(dt.weekday().num_days_from_sunday())
    }

    /// The first fire time strictly after `after`.
    ///
    /// Returns `None` if no matching time exists within roughly four years
    /// (unsatisfiable date combinations such as `0 0 30 2 *`).
    pub fn next_fire_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut cursor = (*after + Duration::minutes(1))
            .with_second(0)
            .and_then(|dt| dt.with_nanosecond(0))?;
        let limit = *after + Duration::days(4 * 366);

        while cursor <= limit {
            if !self.month.matches(cursor.month()) {
                cursor = first_of_next_month(&cursor)?;
                continue;
            }
            if !(self.day_of_month.matches(cursor.day())
                && self.day_of_week.matches(cursor.weekday().num_days_from_sunday()))
            {
                cursor = (cursor + Duration::days(1)).with_hour(0)?.with_minute(0)?;
                continue;
            }
            if !self.hour.matches(cursor.hour()) {
                cursor = (cursor + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if self.minute.matches(cursor.minute()) {
                return Some(cursor);
            }
            cursor = cursor + Duration::minutes(1);
        }

        None
    }
}

impl FromStr for CronExpr {
    type Err = ScheduleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronExpr::parse(s)
    }
}

fn first_of_next_month(dt: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    let naive = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// The due/next pair for one reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTimes {
    /// Most recent fire time in `(created_at, now]` that is due, if any.
    pub missed: Option<DateTime<Utc>>,
    /// First fire time strictly after `now`.
    pub next: Option<DateTime<Utc>>,
}

/// Evaluate a schedule against the wall clock.
///
/// The missed-run walk starts just after `created_at` and keeps the last
/// fire time `<= now`. `next` is always computed from `now` alone. A
/// resource created in the future (clock skew, or a watch racing object
/// creation) has no missed run. Under [`MissedRunPolicy::Skip`] the walk is
/// dropped entirely and `missed` is always `None`.
pub fn compute_schedule(
    expr: &CronExpr,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: MissedRunPolicy,
) -> ScheduleTimes {
    let next = expr.next_fire_after(&now);

    if created_at > now || policy == MissedRunPolicy::Skip {
        return ScheduleTimes { missed: None, next };
    }

    let mut missed = None;
    let mut cursor = created_at;
    while let Some(fire) = expr.next_fire_after(&cursor) {
        if fire > now {
            break;
        }
        missed = Some(fire);
        cursor = fire;
    }

    ScheduleTimes { missed, next }
}
