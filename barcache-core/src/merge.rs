//! Merge engine: splices newly fetched bars into a cached sequence.
//!
//! Both inputs are newest first with unique dates. The merge walks the cached
//! sequence with an explicit boundary index: cached bars newer than the next
//! incoming bar are emitted ahead of it, a cached bar with the same date is a
//! collision resolved by [`Precedence`], and whatever is left of the cache
//! after the last incoming bar follows untouched. Merging is by date, so an
//! incoming sequence with holes is merged just as well as a contiguous one.

use crate::domain::{first_order_violation, Bar, Period};
use chrono::NaiveDate;
use thiserror::Error;

/// Contract violations on merge input. These are caller bugs; the engine
/// never re-sorts its input.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{sequence} bars are not strictly descending at index {index} ({newer} then {older})")]
    Unsorted {
        sequence: &'static str,
        index: usize,
        newer: NaiveDate,
        older: NaiveDate,
    },

    #[error("{sequence} bars mix periods: expected {expected}, found {found} on {date}")]
    PeriodMismatch {
        sequence: &'static str,
        expected: Period,
        found: Period,
        date: NaiveDate,
    },
}

/// Which copy survives when both sequences hold a bar for the same date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
    /// The cached bar is authoritative; the incoming duplicate is dropped.
    KeepExisting,
    /// The incoming bar replaces the cached one.
    KeepIncoming,
}

/// Lazily interleaves two newest-first sequences.
///
/// Yields borrowed bars so a store can serialize the merged sequence
/// without materializing it.
#[derive(Debug, Clone)]
pub struct Interleave<'a> {
    existing: &'a [Bar],
    incoming: &'a [Bar],
    boundary: usize,
    cursor: usize,
    precedence: Precedence,
}

impl<'a> Interleave<'a> {
    pub fn new(existing: &'a [Bar], incoming: &'a [Bar], precedence: Precedence) -> Self {
        Self {
            existing,
            incoming,
            boundary: 0,
            cursor: 0,
            precedence,
        }
    }
}

impl<'a> Iterator for Interleave<'a> {
    type Item = &'a Bar;

    fn next(&mut self) -> Option<&'a Bar> {
        loop {
            let old = self.existing.get(self.boundary);
            let new = self.incoming.get(self.cursor);

            match (old, new) {
                (Some(old), Some(new)) if old.date > new.date => {
                    self.boundary += 1;
                    return Some(old);
                }
                (Some(old), Some(new)) if old.date == new.date => match self.precedence {
                    Precedence::KeepExisting => self.cursor += 1,
                    Precedence::KeepIncoming => self.boundary += 1,
                },
                (_, Some(new)) => {
                    self.cursor += 1;
                    return Some(new);
                }
                (Some(old), None) => {
                    self.boundary += 1;
                    return Some(old);
                }
                (None, None) => return None,
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let old = self.existing.len() - self.boundary;
        let new = self.incoming.len() - self.cursor;
        (old.max(new), Some(old + new))
    }
}

/// Checks the sequence invariants: strictly descending dates, one period.
pub fn check_sequence(sequence: &'static str, bars: &[Bar]) -> Result<(), MergeError> {
    if let Some(index) = first_order_violation(bars) {
        return Err(MergeError::Unsorted {
            sequence,
            index,
            newer: bars[index].date,
            older: bars[index + 1].date,
        });
    }
    if let Some(first) = bars.first() {
        if let Some(odd) = bars.iter().find(|b| b.period != first.period) {
            return Err(MergeError::PeriodMismatch {
                sequence,
                expected: first.period,
                found: odd.period,
                date: odd.date,
            });
        }
    }
    Ok(())
}

/// Merges `fresh` into `existing`; on a date collision the cached bar wins.
pub fn merge(existing: &[Bar], fresh: &[Bar]) -> Result<Vec<Bar>, MergeError> {
    check_pair(existing, fresh)?;
    Ok(Interleave::new(existing, fresh, Precedence::KeepExisting)
        .cloned()
        .collect())
}

/// Validates both sides of a merge, including that they share a period.
pub(crate) fn check_pair(existing: &[Bar], incoming: &[Bar]) -> Result<(), MergeError> {
    check_sequence("existing", existing)?;
    check_sequence("incoming", incoming)?;
    if let (Some(old), Some(new)) = (existing.first(), incoming.first()) {
        if old.period != new.period {
            return Err(MergeError::PeriodMismatch {
                sequence: "incoming",
                expected: old.period,
                found: new.period,
                date: new.date,
            });
        }
    }
    Ok(())
}
