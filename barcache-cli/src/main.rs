//! Barcache CLI: incremental bar sync and cache management commands.
//!
//! Commands:
//! - `sync` - fill the gaps of one symbol's cache over a date range
//! - `gaps` - report what `sync` would fetch, offline
//! - `refresh` - bring every cached symbol of a period up to today
//! - `populate` - re-download a range, replacing cached bars on the same dates
//! - `list` - cached symbols
//! - `status` - per-symbol date span and bar count
//! - `clear` - remove cached symbols, or the whole cache tree

use anyhow::{bail, Context, Result};
use barcache_core::data::{CacheStore, FileStore, YahooFetcher};
use barcache_core::sync::{self, StdoutProgress};
use barcache_core::{CacheKey, DateRange, Period, SyncConfig, Synchronizer};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "barcache", about = "Barcache CLI: incremental OHLCV bar cache")]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory, overriding the config file.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. info, barcache_core=debug).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch whatever is missing from the cache for one symbol.
    Sync {
        symbol: String,

        /// daily, weekly or monthly.
        #[arg(long, default_value = "daily")]
        period: Period,

        /// Start date (YYYY-MM-DD). Defaults to the configured default start.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Report the date ranges missing from one symbol's cache, without fetching.
    Gaps {
        symbol: String,

        #[arg(long, default_value = "daily")]
        period: Period,

        /// Start date (YYYY-MM-DD). Defaults to the configured default start.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Bring cached symbols up to date, from each symbol's newest bar to today.
    Refresh {
        /// Symbols to refresh. Defaults to every symbol cached for the period.
        symbols: Vec<String>,

        #[arg(long, default_value = "daily")]
        period: Period,
    },
    /// Re-download a range for the given symbols.
    Populate {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[arg(long, default_value = "daily")]
        period: Period,

        /// Start date (YYYY-MM-DD). Defaults to the configured default start.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// List cached symbols.
    List {
        /// Restrict to one period. Without it, symbols cached under any period.
        #[arg(long)]
        period: Option<Period>,
    },
    /// Report date span and bar count per cached symbol.
    Status {
        #[arg(long, default_value = "daily")]
        period: Period,
    },
    /// Delete cached files: the given symbols, or everything.
    Clear {
        /// Symbols to remove. Without any, the whole cache tree is removed.
        symbols: Vec<String>,

        /// Restrict symbol removal to one period (default: every period).
        #[arg(long)]
        period: Option<Period>,

        /// Actually delete (without this flag, only reports what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Sync {
            symbol,
            period,
            start,
            end,
        } => run_sync(&config, &symbol, period, start, end, today),
        Commands::Gaps {
            symbol,
            period,
            start,
            end,
        } => run_gaps(&config, &symbol, period, start, end, today),
        Commands::Refresh { symbols, period } => run_refresh(&config, symbols, period, today),
        Commands::Populate {
            symbols,
            period,
            start,
            end,
        } => run_populate(&config, &symbols, period, start, end, today),
        Commands::List { period } => run_list(&config, period),
        Commands::Status { period } => run_status(&config, period),
        Commands::Clear {
            symbols,
            period,
            confirm,
        } => run_clear(&config, &symbols, period, confirm),
    }
}

fn build_fetcher(config: &SyncConfig) -> Result<YahooFetcher> {
    let circuit_breaker = Arc::new(config.circuit_breaker.build());
    Ok(YahooFetcher::new(&config.fetcher, circuit_breaker)?)
}

fn resolve_range(
    config: &SyncConfig,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<DateRange> {
    let start = start.unwrap_or(config.default_start);
    let end = end.unwrap_or(today);
    Ok(DateRange::new(start, end)?)
}

fn run_sync(
    config: &SyncConfig,
    symbol: &str,
    period: Period,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<()> {
    let key = CacheKey::new(symbol, period)?;
    let range = resolve_range(config, start, end, today)?;

    let fetcher = build_fetcher(config)?;
    let store = FileStore::new(&config.cache_dir);
    let synchronizer = Synchronizer::new(&fetcher, &store, config.default_start);

    let report = synchronizer
        .sync(&key, range, today)
        .with_context(|| format!("sync for instrument {} failed", key.symbol()))?;

    if report.is_up_to_date() {
        println!("{key}: up to date ({} bars in {})", report.in_range, report.requested);
    } else {
        println!(
            "{key}: {} gaps, {} fetched, {} new, {} bars in {}, {} stored",
            report.gaps.len(),
            report.fetched,
            report.inserted,
            report.in_range,
            report.requested,
            report.stored
        );
    }
    Ok(())
}

fn run_gaps(
    config: &SyncConfig,
    symbol: &str,
    period: Period,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<()> {
    let key = CacheKey::new(symbol, period)?;
    let range = resolve_range(config, start, end, today)?;
    let store = FileStore::new(&config.cache_dir);

    let gaps = sync::missing(&store, &key, range, today)?;
    if gaps.is_empty() {
        println!("{key}: no gaps in {range}");
        return Ok(());
    }

    println!("{key}: {} gaps in {range}", gaps.len());
    for gap in &gaps {
        println!("  {gap}");
    }
    Ok(())
}

fn run_refresh(
    config: &SyncConfig,
    symbols: Vec<String>,
    period: Period,
    today: NaiveDate,
) -> Result<()> {
    let store = FileStore::new(&config.cache_dir);
    let symbols = if symbols.is_empty() {
        store.symbols(period)?
    } else {
        symbols
    };
    if symbols.is_empty() {
        println!("No {period} symbols cached in {}", config.cache_dir.display());
        return Ok(());
    }

    let fetcher = build_fetcher(config)?;
    let synchronizer = Synchronizer::new(&fetcher, &store, config.default_start);
    let summary = synchronizer.refresh_all(period, &symbols, today, &StdoutProgress);

    if !summary.all_succeeded() {
        for failure in &summary.failures {
            eprintln!("{failure}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run_populate(
    config: &SyncConfig,
    symbols: &[String],
    period: Period,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<()> {
    let range = resolve_range(config, start, end, today)?;
    let fetcher = build_fetcher(config)?;
    let store = FileStore::new(&config.cache_dir);
    let synchronizer = Synchronizer::new(&fetcher, &store, config.default_start);

    let mut failed = 0;
    for symbol in symbols {
        let key = CacheKey::new(symbol, period)?;
        match synchronizer.populate(&key, range) {
            Ok(stored) => println!("  OK: {key} ({stored} bars stored)"),
            Err(e) => {
                eprintln!("sync for instrument {} failed: {e}", key.symbol());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} symbols failed", symbols.len());
    }
    Ok(())
}

fn run_list(config: &SyncConfig, period: Option<Period>) -> Result<()> {
    let store = FileStore::new(&config.cache_dir);
    let symbols = match period {
        Some(period) => store.symbols(period)?,
        None => store.symbols_any()?,
    };
    for symbol in symbols {
        println!("{symbol}");
    }
    Ok(())
}

fn run_status(config: &SyncConfig, period: Period) -> Result<()> {
    let store = FileStore::new(&config.cache_dir);
    let symbols = store.symbols(period)?;
    if symbols.is_empty() {
        println!("No {period} symbols cached in {}", config.cache_dir.display());
        return Ok(());
    }

    println!("Cache: {} ({period})", config.cache_dir.display());
    println!("Symbols: {}", symbols.len());
    println!();
    println!("{:<8} {:<25} {:>8}  {}", "Symbol", "Date Range", "Bars", "Synced");
    println!("{}", "-".repeat(62));

    for symbol in &symbols {
        let key = CacheKey::new(symbol, period)?;
        // Fall back to reading the data file when the sidecar is missing.
        let (range, bars, synced) = match store.meta(&key) {
            Some(meta) => (
                span_label(meta.oldest, meta.newest),
                meta.bar_count,
                meta.synced_at.format("%Y-%m-%d %H:%M").to_string(),
            ),
            None => {
                let cached = store.read(&key, DateRange::ALL)?;
                let newest = cached.bars.first().map(|b| b.date);
                let oldest = cached.bars.last().map(|b| b.date);
                (span_label(oldest, newest), cached.bars.len(), "(no meta)".to_string())
            }
        };
        println!("{:<8} {:<25} {:>8}  {}", symbol, range, bars, synced);
    }
    Ok(())
}

fn span_label(oldest: Option<NaiveDate>, newest: Option<NaiveDate>) -> String {
    match (oldest, newest) {
        (Some(oldest), Some(newest)) => format!("{oldest} to {newest}"),
        _ => "(empty)".to_string(),
    }
}

fn run_clear(
    config: &SyncConfig,
    symbols: &[String],
    period: Option<Period>,
    confirm: bool,
) -> Result<()> {
    let store = FileStore::new(&config.cache_dir);
    if !store.root().exists() {
        println!("Cache directory does not exist: {}", config.cache_dir.display());
        return Ok(());
    }

    if !symbols.is_empty() {
        let periods = match period {
            Some(period) => vec![period],
            None => Period::ALL.to_vec(),
        };
        let keys = symbols
            .iter()
            .flat_map(|symbol| periods.iter().map(move |&p| CacheKey::new(symbol, p)))
            .collect::<Result<Vec<_>, _>>()?;

        for key in &keys {
            if confirm {
                store.remove(key)?;
                println!("Removed {key}");
            } else if store.csv_path(key).exists() {
                println!("Would remove {key}");
            }
        }
        if !confirm {
            println!("Re-run with --confirm to delete.");
        }
        return Ok(());
    }

    let symbols = store.symbols_any()?;
    if !confirm {
        println!(
            "Would remove {} ({} symbols). Re-run with --confirm to delete.",
            config.cache_dir.display(),
            symbols.len()
        );
        return Ok(());
    }

    store.clear()?;
    println!("Removed {} ({} symbols)", config.cache_dir.display(), symbols.len());
    Ok(())
}
