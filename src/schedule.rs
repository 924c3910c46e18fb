//! Schedule predicates deciding whether a recipe runs live.
//!
//! A [`Schedule`] is either a static boolean or a [`Rule`] evaluated against
//! the current time. Calendar rules (weekday, day of month, hour) look at
//! `now` shifted by the descriptor's UTC offset. Interval rules compare the
//! elapsed time since the last live run against the interval minus a drift
//! allowance, so a daily job started a few minutes early still fires.
//!
//! In the registry YAML:
//!
//! ```yaml
//! enable_on: true
//! enable_on: { weekdays: [Fri, Sat] }
//! enable_on: { every_days: { days: 7, drift_minutes: 60 } }
//! enable_on: { all: [ { weekdays: [Mon] }, { hours: [6, 7] } ] }
//! ```

use crate::models::RecipeDescriptor;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// When a recipe should run live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schedule {
    Static(bool),
    Rule(Rule),
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Static(true)
    }
}

/// Time-dependent predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Only on the listed weekdays.
    Weekdays(Vec<Weekday>),
    /// Only on the listed days of the month (1-based).
    DaysOfMonth(Vec<u32>),
    /// Only during the listed hours of the day (0-23).
    Hours(Vec<u32>),
    /// Only on the first `n` days of the month.
    FirstDaysOfMonth(u32),
    /// Only on the last `n` days of the month.
    LastDaysOfMonth(u32),
    /// At most once every `days` days.
    EveryDays {
        days: u32,
        #[serde(default)]
        drift_minutes: i64,
    },
    /// At most once every `hours` hours.
    EveryHours {
        hours: u32,
        #[serde(default)]
        drift_minutes: i64,
    },
    /// Every nested schedule must hold.
    All(Vec<Schedule>),
    /// At least one nested schedule must hold.
    Any(Vec<Schedule>),
}

/// Largest accepted `utc_offset_hours` magnitude.
pub const MAX_OFFSET_HOURS: f64 = 14.0;
const MAX_INTERVAL_DAYS: u32 = 36_500;
const MAX_INTERVAL_HOURS: u32 = MAX_INTERVAL_DAYS * 24;

/// Reject offsets that are not a real time zone.
pub fn validate_offset(offset_hours: f64) -> Result<(), String> {
    if !offset_hours.is_finite() || offset_hours.abs() > MAX_OFFSET_HOURS {
        return Err(format!(
            "utc_offset_hours must be within ±{MAX_OFFSET_HOURS}, got {offset_hours}"
        ));
    }
    Ok(())
}

fn validate_interval(unit: &str, count: u32, max: u32, minutes_per_unit: i64, drift_minutes: i64) -> Result<(), String> {
    if count > max {
        return Err(format!("{unit} must be at most {max}, got {count}"));
    }
    let interval = count as i64 * minutes_per_unit;
    if !(0..=interval).contains(&drift_minutes) {
        return Err(format!(
            "drift_minutes must be between 0 and {interval}, got {drift_minutes}"
        ));
    }
    Ok(())
}

/// Whether `descriptor` should run live at `now`.
pub fn is_due(descriptor: &RecipeDescriptor, now: DateTime<Utc>) -> bool {
    descriptor
        .enable_on
        .evaluate(now, descriptor.utc_offset_hours, descriptor.last_run)
}

fn offset_duration(offset_hours: f64) -> Duration {
    Duration::minutes((offset_hours * 60.0).round() as i64)
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

fn interval_elapsed(
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    interval: Duration,
    drift_minutes: i64,
) -> bool {
    match last_run {
        None => true,
        Some(last) if last.timestamp() <= 0 => true,
        Some(last) => now - last >= interval - Duration::minutes(drift_minutes),
    }
}

impl Schedule {
    pub fn evaluate(
        &self,
        now: DateTime<Utc>,
        offset_hours: f64,
        last_run: Option<DateTime<Utc>>,
    ) -> bool {
        match self {
            Schedule::Static(enabled) => *enabled,
            Schedule::Rule(rule) => {
                let local = now.naive_utc() + offset_duration(offset_hours);
                rule.evaluate(now, local, offset_hours, last_run)
            }
        }
    }
}

impl Schedule {
    /// Check that every interval and drift stays within the supported range.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Schedule::Static(_) => Ok(()),
            Schedule::Rule(rule) => rule.validate(),
        }
    }
}

impl Rule {
    fn validate(&self) -> Result<(), String> {
        match self {
            Rule::EveryDays {
                days,
                drift_minutes,
            } => validate_interval("days", *days, MAX_INTERVAL_DAYS, 24 * 60, *drift_minutes),
            Rule::EveryHours {
                hours,
                drift_minutes,
            } => validate_interval("hours", *hours, MAX_INTERVAL_HOURS, 60, *drift_minutes),
            Rule::All(nested) | Rule::Any(nested) => nested.iter().try_for_each(Schedule::validate),
            _ => Ok(()),
        }
    }

    fn evaluate(
        &self,
        now: DateTime<Utc>,
        local: NaiveDateTime,
        offset_hours: f64,
        last_run: Option<DateTime<Utc>>,
    ) -> bool {
        match self {
            Rule::Weekdays(days) => days.contains(&local.weekday()),
            Rule::DaysOfMonth(days) => days.contains(&local.day()),
            Rule::Hours(hours) => hours.contains(&local.hour()),
            Rule::FirstDaysOfMonth(n) => local.day() <= *n,
            Rule::LastDaysOfMonth(n) => days_in_month(local.date()) - local.day() < *n,
            Rule::EveryDays {
                days,
                drift_minutes,
            } => interval_elapsed(now, last_run, Duration::days(*days as i64), *drift_minutes),
            Rule::EveryHours {
                hours,
                drift_minutes,
            } => interval_elapsed(now, last_run, Duration::hours(*hours as i64), *drift_minutes),
            Rule::All(nested) => nested
                .iter()
                .all(|s| s.evaluate(now, offset_hours, last_run)),
            Rule::Any(nested) => nested
                .iter()
                .any(|s| s.evaluate(now, offset_hours, last_run)),
        }
    }
}
