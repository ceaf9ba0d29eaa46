use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Bound, RangeInclusive};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Stored sentinel meaning "any value in range".
pub const ANY: i32 = -1;

pub const MINUTE_RANGE: RangeInclusive<i32> = 0..=59;
pub const HOUR_RANGE: RangeInclusive<i32> = 0..=23;
/// 0 = Sunday.
pub const DAY_OF_WEEK_RANGE: RangeInclusive<i32> = 0..=6;
pub const DAY_OF_MONTH_RANGE: RangeInclusive<i32> = 1..=31;

/// One constraint set of a [`RecurrenceRule`].
///
/// Serialised as a JSON integer array. An empty array, or one containing
/// `-1`, deserialises to [`Field::Any`], so an unconstrained field can never
/// be mistaken for "never".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<i32>", into = "Vec<i32>")]
pub enum Field {
    Any,
    Values(BTreeSet<i32>),
}

/// How a single unit has to move to satisfy its constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Already allowed.
    Stay,
    /// Move forward by this many units within the enclosing unit.
    Advance(i64),
    /// Move by this (zero or negative) many units, then bump the enclosing unit.
    Rollover(i64),
}

impl Field {
    /// Build a field from raw values, normalising empty / `-1` to `Any`.
    pub fn values(values: impl IntoIterator<Item = i32>) -> Self {
        Self::from(values.into_iter().collect::<Vec<_>>())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Field::Any)
    }

    pub fn contains(&self, value: i32) -> bool {
        match self {
            Field::Any => true,
            Field::Values(set) => set.contains(&value),
        }
    }

    pub(crate) fn step(&self, current: i32) -> Step {
        let set = match self {
            Field::Any => return Step::Stay,
            Field::Values(set) if set.contains(&current) => return Step::Stay,
            Field::Values(set) => set,
        };
        let current_wide = i64::from(current);
        match set.range((Bound::Excluded(current), Bound::Unbounded)).next() {
            Some(next) => Step::Advance(i64::from(*next) - current_wide),
            // `Values` is never empty, so `first` always exists.
            None => match set.first() {
                Some(first) => Step::Rollover(i64::from(*first) - current_wide),
                None => Step::Stay,
            },
        }
    }

    fn validate(&self, unit: &str, range: &RangeInclusive<i32>) -> Result<()> {
        if let Field::Values(set) = self {
            if let Some(bad) = set.iter().find(|v| !range.contains(*v)) {
                return Err(SchedulerError::InvalidRule(format!(
                    "{unit} value {bad} outside {}..={}",
                    range.start(),
                    range.end()
                )));
            }
        }
        Ok(())
    }
}

impl From<Vec<i32>> for Field {
    fn from(values: Vec<i32>) -> Self {
        if values.is_empty() || values.contains(&ANY) {
            Field::Any
        } else {
            Field::Values(values.into_iter().collect())
        }
    }
}

impl From<Field> for Vec<i32> {
    fn from(field: Field) -> Self {
        match field {
            Field::Any => vec![ANY],
            Field::Values(set) => set.into_iter().collect(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Any => write!(f, "*"),
            Field::Values(set) => {
                let parts: Vec<String> = set.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// The day-level constraint. Day-of-week and day-of-month are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum DayConstraint {
    /// 0 = Sunday … 6 = Saturday.
    DayOfWeek(Field),
    /// 1 ..= 31.
    DayOfMonth(Field),
}

impl Default for DayConstraint {
    fn default() -> Self {
        DayConstraint::DayOfMonth(Field::Any)
    }
}

/// Declarative description of the minutes, hours and days a job may run on.
///
/// Unknown keys are rejected so a misspelled field never decodes as "any".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecurrenceRule {
    #[serde(default = "any_field")]
    pub minutes: Field,
    #[serde(default = "any_field")]
    pub hours: Field,
    #[serde(default)]
    pub days: DayConstraint,
}

fn any_field() -> Field {
    Field::Any
}

impl Default for RecurrenceRule {
    fn default() -> Self {
        Self::every_minute()
    }
}

impl RecurrenceRule {
    /// A rule with every constraint set to "any".
    pub fn every_minute() -> Self {
        Self {
            minutes: Field::Any,
            hours: Field::Any,
            days: DayConstraint::default(),
        }
    }

    pub fn with_minutes(mut self, minutes: impl IntoIterator<Item = i32>) -> Self {
        self.minutes = Field::values(minutes);
        self
    }

    pub fn with_hours(mut self, hours: impl IntoIterator<Item = i32>) -> Self {
        self.hours = Field::values(hours);
        self
    }

    pub fn on_days_of_week(mut self, days: impl IntoIterator<Item = i32>) -> Self {
        self.days = DayConstraint::DayOfWeek(Field::values(days));
        self
    }

    pub fn on_days_of_month(mut self, days: impl IntoIterator<Item = i32>) -> Self {
        self.days = DayConstraint::DayOfMonth(Field::values(days));
        self
    }

    /// Check every explicit value lies within its unit's range.
    ///
    /// Stores run this on every write and on every decoded row, so the
    /// calculator only ever sees in-range rules.
    pub fn validate(&self) -> Result<()> {
        self.minutes.validate("minute", &MINUTE_RANGE)?;
        self.hours.validate("hour", &HOUR_RANGE)?;
        match &self.days {
            DayConstraint::DayOfWeek(f) => f.validate("day-of-week", &DAY_OF_WEEK_RANGE),
            DayConstraint::DayOfMonth(f) => f.validate("day-of-month", &DAY_OF_MONTH_RANGE),
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.minutes, self.hours)?;
        match &self.days {
            DayConstraint::DayOfMonth(Field::Any) => write!(f, "*"),
            DayConstraint::DayOfMonth(days) => write!(f, "dom:{days}"),
            DayConstraint::DayOfWeek(days) => write!(f, "dow:{days}"),
        }
    }
}

/// Parses `"<minutes> <hours> <days>"`, e.g. `"0,30 9-17 dow:1-5"`.
///
/// Minutes and hours are `*` or a comma list of values and inclusive ranges.
/// Days are `*`, `dom:<list>` or `dow:<list>`.
impl FromStr for RecurrenceRule {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [minutes, hours, days] = parts.as_slice() else {
            return Err(SchedulerError::InvalidRule(format!(
                "expected 3 fields, got {}: {s:?}",
                parts.len()
            )));
        };

        let days = if *days == "*" {
            DayConstraint::DayOfMonth(Field::Any)
        } else if let Some(list) = days.strip_prefix("dom:") {
            DayConstraint::DayOfMonth(parse_list(list)?)
        } else if let Some(list) = days.strip_prefix("dow:") {
            DayConstraint::DayOfWeek(parse_list(list)?)
        } else {
            return Err(SchedulerError::InvalidRule(format!(
                "day field must be '*', 'dom:…' or 'dow:…', got {days:?}"
            )));
        };

        let rule = RecurrenceRule {
            minutes: parse_list(minutes)?,
            hours: parse_list(hours)?,
            days,
        };
        rule.validate()?;
        Ok(rule)
    }
}

fn parse_list(list: &str) -> Result<Field> {
    if list == "*" {
        return Ok(Field::Any);
    }
    let mut values = BTreeSet::new();
    for part in list.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_value(lo)?, parse_value(hi)?);
                if lo > hi {
                    return Err(SchedulerError::InvalidRule(format!(
                        "descending range {part:?}"
                    )));
                }
                values.extend(lo..=hi);
            }
            None => {
                values.insert(parse_value(part)?);
            }
        }
    }
    Ok(Field::Values(values))
}

fn parse_value(raw: &str) -> Result<i32> {
    raw.trim()
        .parse::<u8>()
        .map(i32::from)
        .map_err(|_| SchedulerError::InvalidRule(format!("not a number: {raw:?}")))
}
