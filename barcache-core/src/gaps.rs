//! Gap detection: which parts of a requested range the cache does not cover.
//!
//! A bar covers its own date up to (not including) the next date the period
//! clock expects a sample. The detector walks the cached sequence oldest
//! first with a cursor marking the first uncovered date, emitting a gap
//! whenever the next bar starts beyond the cursor and a trailing gap when the
//! cursor stops short of the requested end.

use crate::clock::coverage_end;
use crate::domain::{Bar, DateRange, Period};
use chrono::NaiveDate;

/// Uncovered sub-ranges of `requested`, ascending by start date.
///
/// `existing` must be sorted newest first. Bars older than `requested.start`
/// may cover its leading days; bars newer than `requested.end` are ignored.
/// `today` is the clock ceiling: coverage never extends past it.
pub fn find_gaps(
    requested: DateRange,
    existing: &[Bar],
    period: Period,
    today: NaiveDate,
) -> Vec<DateRange> {
    let mut gaps = Vec::new();
    let mut cursor = requested.start();

    for bar in existing.iter().rev() {
        if bar.date > requested.end() {
            break;
        }

        if bar.date > cursor {
            // bar.date > cursor, so the day before is still >= cursor
            if let Some(last_missing) = bar.date.pred_opt() {
                gaps.push(span(cursor, last_missing));
            }
        }

        cursor = cursor.max(coverage_end(bar.date, period, today));
    }

    if cursor <= requested.end() {
        gaps.push(span(cursor, requested.end()));
    }

    gaps
}

fn span(start: NaiveDate, end: NaiveDate) -> DateRange {
    // Callers guarantee start <= end.
    DateRange::new(start, end).unwrap_or_else(|_| DateRange::single(start))
}
