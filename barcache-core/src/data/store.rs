//! Flat-file bar cache.
//!
//! Layout: `{cache_dir}/{DAILY|WEEKLY|MONTHLY}/{SYMBOL}.csv`
//!
//! Features:
//! - Header line passed through verbatim
//! - Atomic writes (stream to `.csv.tmp`, rename into place)
//! - Canonicalization on read (newest first, duplicate dates dropped)
//! - Metadata sidecar per symbol (`{SYMBOL}.meta.json`: date span, count, hash)

use super::codec::{self, BarWriter};
use crate::domain::{is_strictly_descending, Bar, CacheKey, DateRange, Period};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> StoreError {
        let path = path.to_path_buf();
        move |source| StoreError::Io {
            action,
            path,
            source,
        }
    }
}

/// One cached sequence as read from storage.
#[derive(Debug, Clone, Default)]
pub struct Cached {
    /// Raw header line; `None` when nothing is cached yet.
    pub header: Option<String>,
    /// Newest first, unique dates, restricted to the requested range.
    pub bars: Vec<Bar>,
}

/// Persistent storage of one bar sequence per [`CacheKey`].
pub trait CacheStore: Send + Sync {
    /// Bars of `key` within `range`. A missing entry reads as empty.
    fn read(&self, key: &CacheKey, range: DateRange) -> Result<Cached, StoreError>;

    /// Replaces the entry for `key` with `header` followed by `bars`
    /// (newest first). Returns the number of bars written. Readers observe
    /// either the previous entry or the complete new one.
    fn write(
        &self,
        key: &CacheKey,
        header: &str,
        bars: &mut dyn Iterator<Item = &Bar>,
    ) -> Result<usize, StoreError>;

    /// Deletes the entry for `key`; a missing entry is not an error.
    fn remove(&self, key: &CacheKey) -> Result<(), StoreError>;
}

/// Sidecar describing the last successful write of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub period: Period,
    pub newest: Option<NaiveDate>,
    pub oldest: Option<NaiveDate>,
    pub bar_count: usize,
    /// BLAKE3 of the file contents.
    pub data_hash: String,
    pub synced_at: chrono::NaiveDateTime,
}

/// CSV files under one root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn period_dir(&self, period: Period) -> PathBuf {
        self.root.join(period.dir_name())
    }

    /// `{root}/{PERIOD}/{SYMBOL}.csv`
    pub fn csv_path(&self, key: &CacheKey) -> PathBuf {
        self.period_dir(key.period())
            .join(format!("{}.csv", key.symbol()))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.period_dir(key.period())
            .join(format!("{}.meta.json", key.symbol()))
    }

    /// Sidecar metadata, if present and readable.
    pub fn meta(&self, key: &CacheKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Cached symbols for one period, sorted.
    pub fn symbols(&self, period: Period) -> Result<Vec<String>, StoreError> {
        let mut names = BTreeSet::new();
        self.collect_symbols(period, &mut names)?;
        Ok(names.into_iter().collect())
    }

    /// Symbols cached under any period, sorted and unique.
    pub fn symbols_any(&self) -> Result<Vec<String>, StoreError> {
        let mut names = BTreeSet::new();
        for period in Period::ALL {
            self.collect_symbols(period, &mut names)?;
        }
        Ok(names.into_iter().collect())
    }

    fn collect_symbols(&self, period: Period, names: &mut BTreeSet<String>) -> Result<(), StoreError> {
        let dir = self.period_dir(period);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io("list", &dir)(e)),
        };

        for entry in entries {
            let path = entry.map_err(StoreError::io("list", &dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.insert(stem.to_string());
            }
        }
        Ok(())
    }

    /// Removes every cached sequence and sidecar.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove", &self.root)(e)),
        }
    }

    fn write_meta(&self, key: &CacheKey, meta: &CacheMeta) {
        let path = self.meta_path(key);
        let result = serde_json::to_string_pretty(meta)
            .map_err(io::Error::from)
            .and_then(|json| fs::write(&path, json));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to write cache metadata");
        }
    }
}

impl CacheStore for FileStore {
    fn read(&self, key: &CacheKey, range: DateRange) -> Result<Cached, StoreError> {
        let path = self.csv_path(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Cached::default()),
            Err(e) => return Err(StoreError::io("read", &path)(e)),
        };

        let decoded = codec::decode(&text, key.period());
        if decoded.skipped > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped = decoded.skipped,
                "cache file contains malformed lines"
            );
        }

        let mut bars = decoded.bars;
        if !is_strictly_descending(&bars) {
            tracing::warn!(path = %path.display(), "cache file out of order, canonicalizing");
            bars.sort_by(|a, b| b.date.cmp(&a.date));
            bars.dedup_by_key(|b| b.date);
        }
        bars.retain(|b| range.contains(b.date));

        Ok(Cached {
            header: decoded.header,
            bars,
        })
    }

    fn write(
        &self,
        key: &CacheKey,
        header: &str,
        bars: &mut dyn Iterator<Item = &Bar>,
    ) -> Result<usize, StoreError> {
        let dir = self.period_dir(key.period());
        fs::create_dir_all(&dir).map_err(StoreError::io("create", &dir))?;

        let path = self.csv_path(key);
        let tmp_path = path.with_extension("csv.tmp");

        let summary = match write_file(&tmp_path, header, bars) {
            Ok(summary) => summary,
            Err(e) => {
                discard(&tmp_path);
                return Err(StoreError::io("write", &tmp_path)(e));
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &path) {
            discard(&tmp_path);
            return Err(StoreError::io("replace", &path)(e));
        }

        self.write_meta(
            key,
            &CacheMeta {
                symbol: key.symbol().to_string(),
                period: key.period(),
                newest: summary.newest,
                oldest: summary.oldest,
                bar_count: summary.count,
                data_hash: summary.hash,
                synced_at: chrono::Local::now().naive_local(),
            },
        );

        tracing::debug!(path = %path.display(), bars = summary.count, "cache file replaced");
        Ok(summary.count)
    }

    fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        for path in [self.csv_path(key), self.meta_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io("remove", &path)(e)),
            }
        }
        Ok(())
    }
}

struct WriteSummary {
    count: usize,
    newest: Option<NaiveDate>,
    oldest: Option<NaiveDate>,
    hash: String,
}

/// Streams header and bars into `path`, fsyncs, and hashes what was written.
fn write_file(
    path: &Path,
    header: &str,
    bars: &mut dyn Iterator<Item = &Bar>,
) -> io::Result<WriteSummary> {
    let file = fs::File::create(path)?;
    let sink = HashingWriter::new(BufWriter::new(file));
    let mut writer = BarWriter::new(sink, header)?;

    let mut newest = None;
    let mut oldest = None;
    for bar in bars {
        writer.write(bar)?;
        newest.get_or_insert(bar.date);
        oldest = Some(bar.date);
    }

    let count = writer.written();
    let sink = writer.finish()?;
    let (buffered, hash) = sink.into_parts();
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(WriteSummary {
        count,
        newest,
        oldest,
        hash,
    })
}

fn discard(tmp_path: &Path) {
    if let Err(e) = fs::remove_file(tmp_path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp_path.display(), error = %e, "failed to remove temporary cache file");
        }
    }
}

/// Tees written bytes into a BLAKE3 hasher.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
        }
    }

    fn into_parts(self) -> (W, String) {
        (self.inner, self.hasher.finalize().to_hex().to_string())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
