//! Remote fetcher trait and structured fetch errors.
//!
//! The RemoteFetcher trait abstracts over the source of fresh bars (Yahoo
//! Finance today) so the sync driver can be exercised with in-memory doubles.

use crate::domain::{Bar, DateRange, Period};
use thiserror::Error;

/// Structured error types for remote fetches.
///
/// Displayable in CLI output as-is. The sync driver never retries these;
/// retry policy lives inside each fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("HTTP {status} for {symbol}")]
    Http { status: u16, symbol: String },

    #[error("fetch error: {0}")]
    Other(String),
}

/// Bars returned by one fetch, newest first with unique dates.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Column header describing the bar encoding.
    pub header: String,
    pub bars: Vec<Bar>,
}

/// A source of fresh bars for one instrument and date range.
///
/// Implementations return bars sorted descending, free of duplicate dates,
/// all with the requested period. An empty `bars` is a valid answer (a range
/// of weekends or holidays).
pub trait RemoteFetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    fn fetch(&self, symbol: &str, period: Period, range: DateRange) -> Result<Fetched, FetchError>;

    /// False while the fetcher refuses requests (rate limit or ban).
    fn is_available(&self) -> bool;
}
