//! Integration tests for the sync driver against a real file store.

use barcache_core::data::{
    CacheStore, FetchError, Fetched, FileStore, RemoteFetcher, HEADER,
};
use barcache_core::sync::{BatchSummary, SyncError, SyncProgress, SyncReport};
use barcache_core::{Bar, CacheKey, DateRange, Period, Synchronizer};
use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn bar(date: NaiveDate) -> Bar {
    let px = Decimal::new(10_000 + i64::from(date.ordinal()), 2);
    Bar {
        date,
        open: px,
        high: px + Decimal::ONE,
        low: px - Decimal::ONE,
        close: px,
        volume: 1_000 + u64::from(date.ordinal()),
        adj_close: px,
        period: Period::Daily,
    }
}

/// Weekday bars in `[start, end]`, newest first.
fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    let mut bars: Vec<Bar> = start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .map(bar)
        .collect();
    bars.reverse();
    bars
}

fn key(symbol: &str) -> CacheKey {
    CacheKey::new(symbol, Period::Daily).unwrap()
}

fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

/// Serves a fixed history, records every request, and fails on demand.
struct ScriptedFetcher {
    history: Vec<Bar>,
    calls: Mutex<Vec<(String, DateRange)>>,
    /// Symbol whose fetch fails with HTTP 500.
    failing: Option<String>,
    /// Symbol whose fetch gets the fetcher banned.
    banning: Option<String>,
    /// Fail every call after this many have succeeded.
    succeed_calls: Option<usize>,
    available: AtomicBool,
}

impl ScriptedFetcher {
    fn new(history: Vec<Bar>) -> Self {
        Self {
            history,
            calls: Mutex::new(Vec::new()),
            failing: None,
            banning: None,
            succeed_calls: None,
            available: AtomicBool::new(true),
        }
    }

    fn calls(&self) -> Vec<(String, DateRange)> {
        self.calls.lock().unwrap().clone()
    }
}

impl RemoteFetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch(&self, symbol: &str, _period: Period, range: DateRange) -> Result<Fetched, FetchError> {
        let made = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((symbol.to_string(), range));
            calls.len() - 1
        };

        if self.succeed_calls.is_some_and(|n| made >= n) || self.failing.as_deref() == Some(symbol)
        {
            return Err(FetchError::Http {
                status: 500,
                symbol: symbol.to_string(),
            });
        }
        if self.banning.as_deref() == Some(symbol) {
            self.available.store(false, Ordering::SeqCst);
            return Err(FetchError::CircuitBreakerTripped);
        }

        Ok(Fetched {
            header: HEADER.to_string(),
            bars: self
                .history
                .iter()
                .filter(|b| range.contains(b.date))
                .cloned()
                .collect(),
        })
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

struct Quiet;

impl SyncProgress for Quiet {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<SyncReport, SyncError>) {}
    fn on_batch_complete(&self, _: &BatchSummary) {}
}

#[test]
fn empty_cache_then_incremental_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let fetcher = ScriptedFetcher::new(business_days(d(2014, 1, 1), d(2014, 1, 31)));
    let sync = Synchronizer::new(&fetcher, &store, d(2010, 1, 1));

    let first = sync
        .sync(&key("spy"), range(d(2014, 1, 1), d(2014, 1, 10)), d(2014, 1, 10))
        .unwrap();
    assert_eq!(first.gaps, vec![range(d(2014, 1, 1), d(2014, 1, 10))]);
    assert_eq!(first.inserted, 8);
    assert_eq!(first.stored, 8);

    let summary = sync.refresh_all(Period::Daily, &["SPY".to_string()], d(2014, 1, 17), &Quiet);
    assert!(summary.all_succeeded());
    assert_eq!(summary.inserted, 5);

    // Only the days after the newest cached Friday were requested.
    assert_eq!(
        fetcher.calls().last().unwrap(),
        &("SPY".to_string(), range(d(2014, 1, 13), d(2014, 1, 17)))
    );

    let cached = store.read(&key("SPY"), DateRange::ALL).unwrap();
    assert_eq!(cached.bars, business_days(d(2014, 1, 1), d(2014, 1, 17)));
}

#[test]
fn fully_covered_range_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let bars = business_days(d(2014, 1, 1), d(2014, 1, 10));
    store.write(&key("SPY"), HEADER, &mut bars.iter()).unwrap();

    let fetcher = ScriptedFetcher::new(Vec::new());
    let sync = Synchronizer::new(&fetcher, &store, d(2010, 1, 1));
    let report = sync
        .sync(&key("SPY"), range(d(2014, 1, 2), d(2014, 1, 9)), d(2014, 6, 18))
        .unwrap();

    assert!(report.is_up_to_date());
    assert_eq!(report.in_range, 6);
    assert!(fetcher.calls().is_empty());
}

#[test]
fn failed_gap_fetch_leaves_cache_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let cached = vec![bar(d(2014, 1, 13)), bar(d(2014, 1, 3)), bar(d(2014, 1, 2))];
    store.write(&key("SPY"), HEADER, &mut cached.iter()).unwrap();
    let path = store.csv_path(&key("SPY"));
    let before = std::fs::read(&path).unwrap();

    let mut fetcher = ScriptedFetcher::new(business_days(d(2014, 1, 1), d(2014, 1, 31)));
    fetcher.succeed_calls = Some(1);
    let sync = Synchronizer::new(&fetcher, &store, d(2010, 1, 1));

    let err = sync
        .sync(&key("SPY"), range(d(2014, 1, 2), d(2014, 1, 17)), d(2014, 1, 17))
        .unwrap_err();

    match err {
        SyncError::Fetch { range: failed, .. } => {
            assert_eq!(failed, range(d(2014, 1, 14), d(2014, 1, 17)))
        }
        other => panic!("expected fetch error, got {other:?}"),
    }
    assert_eq!(fetcher.calls()[0].1, range(d(2014, 1, 6), d(2014, 1, 12)));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(!path.with_extension("csv.tmp").exists());
}

#[test]
fn duplicate_fetch_leaves_cache_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let history = business_days(d(2014, 1, 1), d(2014, 1, 10));
    store.write(&key("SPY"), HEADER, &mut history.iter()).unwrap();
    let path = store.csv_path(&key("SPY"));
    let before = std::fs::read_to_string(&path).unwrap();

    let fetcher = ScriptedFetcher::new(history);
    let sync = Synchronizer::new(&fetcher, &store, d(2010, 1, 1));
    let stored = sync
        .populate(&key("SPY"), range(d(2014, 1, 1), d(2014, 1, 10)))
        .unwrap();

    assert_eq!(stored, 8);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn hand_edited_iso_file_is_rewritten_in_cache_format() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    std::fs::create_dir_all(dir.path().join("DAILY")).unwrap();
    std::fs::write(
        store.csv_path(&key("SPY")),
        "Date,Open,High,Low,Close,Volume,Adj Close\n\
2014-01-02,1,1,1,1,10,1\n\
not a bar\n\
2014-01-03,2,2,2,2,20,2\n",
    )
    .unwrap();

    let fetcher = ScriptedFetcher::new(business_days(d(2014, 1, 6), d(2014, 1, 7)));
    let sync = Synchronizer::new(&fetcher, &store, d(2010, 1, 1));
    let report = sync
        .sync(&key("SPY"), range(d(2014, 1, 2), d(2014, 1, 7)), d(2014, 1, 7))
        .unwrap();
    assert_eq!(report.gaps, vec![range(d(2014, 1, 6), d(2014, 1, 7))]);
    assert_eq!(report.stored, 4);

    let text = std::fs::read_to_string(store.csv_path(&key("SPY"))).unwrap();
    let dates: Vec<&str> = text
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap())
        .collect();
    assert!(text.starts_with(HEADER));
    assert_eq!(dates, vec!["1/7/2014", "1/6/2014", "1/3/2014", "1/2/2014"]);
}

#[test]
fn refresh_continues_past_failed_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let mut fetcher = ScriptedFetcher::new(business_days(d(2014, 1, 1), d(2014, 1, 10)));
    fetcher.failing = Some("BBB".into());
    let sync = Synchronizer::new(&fetcher, &store, d(2014, 1, 6));

    let symbols = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
    let summary = sync.refresh_all(Period::Daily, &symbols, d(2014, 1, 10), &Quiet);

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].symbol, "BBB");
    assert!(summary.failures[0]
        .to_string()
        .starts_with("sync for instrument BBB failed"));

    assert_eq!(store.symbols(Period::Daily).unwrap(), vec!["AAA", "CCC"]);
    assert_eq!(store.read(&key("CCC"), DateRange::ALL).unwrap().bars.len(), 5);
}

#[test]
fn refresh_stops_fetching_once_fetcher_is_banned() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let mut fetcher = ScriptedFetcher::new(business_days(d(2014, 1, 1), d(2014, 1, 10)));
    fetcher.banning = Some("BBB".into());
    let sync = Synchronizer::new(&fetcher, &store, d(2014, 1, 6));

    let symbols = vec!["AAA".to_string(), "BBB".to_string(), "CCC".to_string()];
    let summary = sync.refresh_all(Period::Daily, &symbols, d(2014, 1, 10), &Quiet);

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 2);
    assert!(matches!(
        summary.failures[1].error,
        SyncError::FetcherUnavailable { .. }
    ));
    assert!(fetcher.calls().iter().all(|(symbol, _)| symbol != "CCC"));
}

#[test]
fn weekly_cache_lives_in_its_own_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let weekly: Vec<Bar> = [d(2014, 1, 13), d(2014, 1, 6)]
        .into_iter()
        .map(|date| Bar {
            period: Period::Weekly,
            ..bar(date)
        })
        .collect();
    let fetcher = ScriptedFetcher::new(weekly);
    let sync = Synchronizer::new(&fetcher, &store, d(2010, 1, 1));

    let key = CacheKey::new("qqq", Period::Weekly).unwrap();
    let report = sync
        .sync(&key, range(d(2014, 1, 6), d(2014, 1, 17)), d(2014, 1, 17))
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert!(dir.path().join("WEEKLY").join("QQQ.csv").exists());
    assert!(store.symbols(Period::Daily).unwrap().is_empty());
}
