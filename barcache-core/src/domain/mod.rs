//! Domain types: bars, periods, date ranges and cache keys.

pub mod bar;
pub mod key;
pub mod period;
pub mod range;

pub use bar::{first_order_violation, is_strictly_descending, Bar};
pub use key::CacheKey;
pub use period::Period;
pub use range::DateRange;

use chrono::NaiveDate;
use thiserror::Error;

/// Errors raised while constructing domain values.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid date range: start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("unknown period '{0}' (expected daily, weekly or monthly)")]
    UnknownPeriod(String),
}
