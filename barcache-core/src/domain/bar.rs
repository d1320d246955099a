//! Bar — one cached OHLCV sample.

use super::period::Period;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single instrument at a single period start.
///
/// Prices are exact decimals so a cached line re-serializes to the same text
/// it was parsed from. Bars are never edited once built; sequences only gain
/// or lose whole bars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub adj_close: Decimal,
    pub period: Period,
}

/// Returns the index of the first pair that breaks strict descending date
/// order, i.e. the first `i` where `bars[i].date <= bars[i + 1].date`.
pub fn first_order_violation(bars: &[Bar]) -> Option<usize> {
    bars.windows(2).position(|w| w[0].date <= w[1].date)
}

/// Newest-first, unique dates.
pub fn is_strictly_descending(bars: &[Bar]) -> bool {
    first_order_violation(bars).is_none()
}
