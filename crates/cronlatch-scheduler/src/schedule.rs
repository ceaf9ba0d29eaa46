use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::rule::{DayConstraint, RecurrenceRule, Step};

/// Compute the next UTC run time for `rule`, strictly after `now`.
///
/// The candidate starts one minute after `now` with seconds discarded, then
/// each unit is moved forward in turn (minute, hour, day). A unit already on
/// an allowed value is never moved. When no allowed value remains in the
/// enclosing unit the candidate wraps to the smallest allowed value and the
/// enclosing unit is bumped by one.
///
/// Day-of-month arithmetic is plain calendar addition, so day 30 requested
/// from mid-February lands in early March.
pub fn compute_next_run(rule: &RecurrenceRule, now: DateTime<Utc>) -> DateTime<Utc> {
    let mut t = now
        - Duration::seconds(i64::from(now.second()))
        - Duration::nanoseconds(i64::from(now.nanosecond()))
        + Duration::minutes(1);

    t = match rule.minutes.step(t.minute() as i32) {
        Step::Stay => t,
        Step::Advance(n) => t + Duration::minutes(n),
        Step::Rollover(n) => t + Duration::minutes(n) + Duration::hours(1),
    };

    t = match rule.hours.step(t.hour() as i32) {
        Step::Stay => t,
        Step::Advance(n) => t + Duration::hours(n),
        Step::Rollover(n) => t + Duration::hours(n) + Duration::days(1),
    };

    match &rule.days {
        DayConstraint::DayOfWeek(days) => {
            match days.step(t.weekday().num_days_from_sunday() as i32) {
                Step::Stay => t,
                Step::Advance(n) => t + Duration::days(n),
                Step::Rollover(n) => t + Duration::days(n) + Duration::weeks(1),
            }
        }
        DayConstraint::DayOfMonth(days) => match days.step(t.day() as i32) {
            Step::Stay => t,
            Step::Advance(n) => t + Duration::days(n),
            Step::Rollover(n) => add_one_month(t + Duration::days(n)),
        },
    }
}

/// Same day number one month later, spilling into the month after when the
/// target month is too short (Jan 30 + 1 month = Mar 1 or Mar 2).
fn add_one_month(t: DateTime<Utc>) -> DateTime<Utc> {
    t + Duration::days(days_in_month(t.year(), t.month()))
}

fn days_in_month(year: i32, month: u32) -> i64 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
