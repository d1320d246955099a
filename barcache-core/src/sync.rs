//! Sync driver: read cache, detect gaps, fetch, merge, persist.
//!
//! One instrument at a time, synchronously. A failed fetch abandons the
//! instrument before anything is written, so the cache is left exactly as it
//! was. Batch refreshes continue past individual failures.

use crate::data::{CacheStore, FetchError, RemoteFetcher, StoreError, HEADER};
use crate::domain::{Bar, CacheKey, DateRange, DomainError, Period};
use crate::gaps::find_gaps;
use crate::merge::{self, check_pair, Interleave, MergeError, Precedence};
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch of {range} failed: {source}")]
    Fetch {
        range: DateRange,
        #[source]
        source: FetchError,
    },

    #[error("fetcher '{fetcher}' is refusing requests")]
    FetcherUnavailable { fetcher: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Outcome of syncing one instrument.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub key: CacheKey,
    pub requested: DateRange,
    /// Uncovered sub-ranges found before fetching.
    pub gaps: Vec<DateRange>,
    /// Bars returned by the fetcher across all gaps.
    pub fetched: usize,
    /// Bars new to the cache.
    pub inserted: usize,
    /// Cached bars within `requested` after the sync.
    pub in_range: usize,
    /// Bars in the persisted sequence (whole history).
    pub stored: usize,
    /// Whether the cache entry was rewritten.
    pub written: bool,
}

impl SyncReport {
    pub fn is_up_to_date(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// One failed instrument of a batch.
#[derive(Debug)]
pub struct SyncFailure {
    pub symbol: String,
    pub error: SyncError,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync for instrument {} failed: {}", self.symbol, self.error)
    }
}

/// Summary of a batch refresh.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub inserted: usize,
    pub failures: Vec<SyncFailure>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Progress callback for batch refreshes.
pub trait SyncProgress: Send {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(
        &self,
        symbol: &str,
        index: usize,
        total: usize,
        result: &Result<SyncReport, SyncError>,
    );

    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Prints one line per instrument to stdout.
pub struct StdoutProgress;

impl SyncProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Syncing {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<SyncReport, SyncError>,
    ) {
        match result {
            Ok(report) if report.is_up_to_date() => println!("  OK: {symbol} (up to date)"),
            Ok(report) => println!(
                "  OK: {symbol} (+{} bars, {} stored)",
                report.inserted, report.stored
            ),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        println!(
            "\nRefresh complete: {}/{} succeeded, {} failed, {} new bars",
            summary.succeeded, summary.total, summary.failed, summary.inserted
        );
    }
}

/// Writes `header`, then `incoming` interleaved with `existing`, through
/// `store`. On a date collision the incoming bar replaces the cached one.
///
/// Returns the number of bars persisted. Either sequence violating the
/// ordering contract aborts before the store is touched.
pub fn append_and_persist(
    store: &dyn CacheStore,
    key: &CacheKey,
    header: &str,
    existing: &[Bar],
    incoming: &[Bar],
) -> Result<usize, SyncError> {
    check_pair(existing, incoming)?;
    let mut bars = Interleave::new(existing, incoming, Precedence::KeepIncoming);
    Ok(store.write(key, header, &mut bars)?)
}

/// Drives gap-fetch-merge-persist for one fetcher and one store.
pub struct Synchronizer<'a> {
    fetcher: &'a dyn RemoteFetcher,
    store: &'a dyn CacheStore,
    default_start: NaiveDate,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        fetcher: &'a dyn RemoteFetcher,
        store: &'a dyn CacheStore,
        default_start: NaiveDate,
    ) -> Self {
        Self {
            fetcher,
            store,
            default_start,
        }
    }

    /// Brings the cache for `key` up to date over `requested`.
    ///
    /// `requested.end` is clamped to `today`. Bars already cached are never
    /// replaced; fetched bars only fill gaps.
    pub fn sync(
        &self,
        key: &CacheKey,
        requested: DateRange,
        today: NaiveDate,
    ) -> Result<SyncReport, SyncError> {
        let span = tracing::info_span!("sync", symbol = key.symbol(), period = %key.period());
        let _enter = span.enter();

        let cached = self.store.read(key, DateRange::ALL)?;
        let (requested, gaps) = plan(&cached.bars, key.period(), requested, today);

        let mut header = cached.header;
        let mut working = cached.bars;
        let before = working.len();
        let mut fetched = 0;

        for gap in &gaps {
            tracing::debug!(%gap, "fetching gap");
            let batch = self
                .fetcher
                .fetch(key.symbol(), key.period(), *gap)
                .map_err(|source| SyncError::Fetch {
                    range: *gap,
                    source,
                })?;
            fetched += batch.bars.len();
            if header.is_none() && !batch.header.is_empty() {
                header = Some(batch.header);
            }
            working = merge::merge(&working, &batch.bars)?;
        }

        let inserted = working.len() - before;
        let written = inserted > 0;
        if written {
            let header = header.as_deref().unwrap_or(HEADER);
            self.store.write(key, header, &mut working.iter())?;
        }

        let report = SyncReport {
            key: key.clone(),
            requested,
            in_range: working.iter().filter(|b| requested.contains(b.date)).count(),
            stored: working.len(),
            gaps,
            fetched,
            inserted,
            written,
        };
        tracing::info!(
            gaps = report.gaps.len(),
            fetched,
            inserted,
            stored = report.stored,
            "sync complete"
        );
        Ok(report)
    }

    /// Syncs each symbol from its newest cached bar (or the default start
    /// when nothing is cached) through `today`.
    ///
    /// Failures are collected and the batch moves on, unless the fetcher
    /// stops accepting requests, in which case the remaining symbols fail
    /// without being attempted.
    pub fn refresh_all(
        &self,
        period: Period,
        symbols: &[String],
        today: NaiveDate,
        progress: &dyn SyncProgress,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            total: symbols.len(),
            ..BatchSummary::default()
        };

        for (i, symbol) in symbols.iter().enumerate() {
            progress.on_start(symbol, i, summary.total);

            let result = self.refresh_one(symbol, period, today);
            progress.on_complete(symbol, i, summary.total, &result);

            match result {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.inserted += report.inserted;
                }
                Err(error) => {
                    summary.failed += 1;
                    summary.failures.push(SyncFailure {
                        symbol: symbol.clone(),
                        error,
                    });
                }
            }

            if !self.fetcher.is_available() {
                tracing::warn!(
                    fetcher = self.fetcher.name(),
                    remaining = symbols.len() - i - 1,
                    "fetcher unavailable, abandoning batch"
                );
                for rest in &symbols[i + 1..] {
                    summary.failed += 1;
                    summary.failures.push(SyncFailure {
                        symbol: rest.clone(),
                        error: SyncError::FetcherUnavailable {
                            fetcher: self.fetcher.name().to_string(),
                        },
                    });
                }
                break;
            }
        }

        progress.on_batch_complete(&summary);
        summary
    }

    fn refresh_one(
        &self,
        symbol: &str,
        period: Period,
        today: NaiveDate,
    ) -> Result<SyncReport, SyncError> {
        let key = CacheKey::new(symbol, period)?;
        let newest = self
            .store
            .read(&key, DateRange::ALL)?
            .bars
            .first()
            .map(|b| b.date);
        let start = newest.unwrap_or(self.default_start).min(today);
        self.sync(&key, DateRange::new(start, today)?, today)
    }

    /// Re-downloads `range` regardless of what is cached.
    ///
    /// Fetched bars replace cached bars on the same date; cached bars
    /// outside the fetched dates are kept. Returns the number of bars
    /// persisted.
    pub fn populate(&self, key: &CacheKey, range: DateRange) -> Result<usize, SyncError> {
        let span = tracing::info_span!("populate", symbol = key.symbol(), period = %key.period());
        let _enter = span.enter();

        let fetched = self
            .fetcher
            .fetch(key.symbol(), key.period(), range)
            .map_err(|source| SyncError::Fetch { range, source })?;
        let cached = self.store.read(key, DateRange::ALL)?;

        let header = cached
            .header
            .as_deref()
            .or(Some(fetched.header.as_str()).filter(|h| !h.is_empty()))
            .unwrap_or(HEADER);
        let stored = append_and_persist(self.store, key, header, &cached.bars, &fetched.bars)?;

        tracing::info!(%range, fetched = fetched.bars.len(), stored, "populate complete");
        Ok(stored)
    }
}

/// Ranges of `requested` that `sync` would fetch for `key`, computed from
/// the cache alone. Nothing is fetched or written.
pub fn missing(
    store: &dyn CacheStore,
    key: &CacheKey,
    requested: DateRange,
    today: NaiveDate,
) -> Result<Vec<DateRange>, SyncError> {
    let cached = store.read(key, DateRange::ALL)?;
    Ok(plan(&cached.bars, key.period(), requested, today).1)
}

/// Clamps `requested` to `today` and finds its gaps against the whole
/// cached history. A range lying entirely in the future has no gaps.
fn plan(
    cached: &[Bar],
    period: Period,
    requested: DateRange,
    today: NaiveDate,
) -> (DateRange, Vec<DateRange>) {
    match DateRange::new(requested.start(), requested.end().min(today)) {
        Ok(range) => (range, find_gaps(range, cached, period, today)),
        Err(_) => (DateRange::single(today), Vec::new()),
    }
}
