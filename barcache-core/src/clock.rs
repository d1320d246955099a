//! Period clock: where the next sample of a series is expected to land.
//!
//! Daily series step to the next weekday only. Exchange holidays are not
//! modeled, so a holiday shows up as a one-day gap that the fetcher answers
//! with no bars.

use crate::domain::Period;
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};

/// Next expected sample date after `last` for `period`, never later than `ceiling`.
pub fn next_expected_date(last: NaiveDate, period: Period, ceiling: NaiveDate) -> NaiveDate {
    let next = match period {
        Period::Daily => last.checked_add_days(Days::new(days_to_next_weekday(last.weekday()))),
        Period::Weekly => last.checked_add_days(Days::new(7)),
        Period::Monthly => last.checked_add_months(Months::new(1)),
    };

    match next {
        Some(day) if day <= ceiling => day,
        _ => ceiling,
    }
}

/// Exclusive end of the span a bar dated `date` accounts for.
///
/// This is normally [`next_expected_date`]. When the ceiling clamps that to a
/// day at or before `date` (a bar dated today or later), the bar covers only
/// its own date.
pub fn coverage_end(date: NaiveDate, period: Period, ceiling: NaiveDate) -> NaiveDate {
    let next = next_expected_date(date, period, ceiling);
    if next > date {
        next
    } else {
        date.succ_opt().unwrap_or(date)
    }
}

fn days_to_next_weekday(day: Weekday) -> u64 {
    match day {
        Weekday::Fri => 3,
        Weekday::Sat => 2,
        _ => 1,
    }
}
