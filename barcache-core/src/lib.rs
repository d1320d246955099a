//! Barcache Core: incremental OHLCV bar cache.
//!
//! This crate contains:
//! - Domain types (bars, periods, date ranges, cache keys)
//! - Period clock and gap detection over a cached sequence
//! - Merge engine and append driver
//! - Remote fetcher trait with a Yahoo Finance implementation
//! - Flat-file cache store
//! - Sync driver for single instruments and batch refreshes

pub mod clock;
pub mod config;
pub mod data;
pub mod domain;
pub mod gaps;
pub mod merge;
pub mod sync;

pub use config::SyncConfig;
pub use domain::{Bar, CacheKey, DateRange, Period};
pub use sync::{SyncError, SyncReport, Synchronizer};
