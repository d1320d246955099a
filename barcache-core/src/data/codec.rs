//! Text encoding of cached bars.
//!
//! One header line (kept verbatim, opaque to the engine) followed by one bar
//! per line: `Date,Open,High,Low,Close,Volume,Adj Close`. Dates are written as
//! `month/day/year` without padding; ISO dates are accepted on read because the
//! upstream CSV export used them. Malformed lines are skipped with a warning.

use crate::domain::{Bar, Period};
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::io::{self, Write};
use std::str::FromStr;
use thiserror::Error;

/// Canonical column header.
pub const HEADER: &str = "Date,Open,High,Low,Close,Volume,Adj Close";

/// Number of columns in a bar line.
pub const COLUMNS: usize = 7;

/// Why a single line could not be turned into a bar.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("expected 7 columns, found {0}")]
    ColumnCount(usize),

    #[error("invalid date '{0}'")]
    Date(String),

    #[error("invalid {column} value '{value}'")]
    Number { column: &'static str, value: String },

    #[error("malformed record: {0}")]
    Record(String),
}

/// Result of decoding a whole cache file.
#[derive(Debug, Default)]
pub struct Decoded {
    /// First line, if the text had a non-empty one.
    pub header: Option<String>,
    /// Bars in file order.
    pub bars: Vec<Bar>,
    /// Lines that could not be parsed.
    pub skipped: usize,
}

/// Decodes a header line followed by bar lines.
pub fn decode(text: &str, period: Period) -> Decoded {
    let (first, body) = match text.split_once('\n') {
        Some((first, body)) => (first, body),
        None => (text, ""),
    };
    let first = first.trim_end_matches('\r');
    let header = (!first.trim().is_empty()).then(|| first.to_string());

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut decoded = Decoded {
        header,
        ..Decoded::default()
    };

    for record in reader.records() {
        // +1 for the header line consumed above
        let parsed = match record {
            Ok(record) => {
                let line = record.position().map_or(0, |p| p.line() + 1);
                let fields: Vec<&str> = record.iter().collect();
                parse_fields(&fields, period).map_err(|e| (line, e))
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line() + 1);
                Err((line, ParseError::Record(e.to_string())))
            }
        };

        match parsed {
            Ok(bar) => decoded.bars.push(bar),
            Err((line, e)) => {
                tracing::warn!(line, error = %e, "skipping malformed bar line");
                decoded.skipped += 1;
            }
        }
    }

    decoded
}

/// Parses one split line in `Date,Open,High,Low,Close,Volume,Adj Close` order.
pub fn parse_fields(fields: &[&str], period: Period) -> Result<Bar, ParseError> {
    if fields.len() != COLUMNS {
        return Err(ParseError::ColumnCount(fields.len()));
    }

    Ok(Bar {
        date: parse_date(fields[0])?,
        open: parse_decimal("open", fields[1])?,
        high: parse_decimal("high", fields[2])?,
        low: parse_decimal("low", fields[3])?,
        close: parse_decimal("close", fields[4])?,
        volume: parse_volume(fields[5])?,
        adj_close: parse_decimal("adj close", fields[6])?,
        period,
    })
}

/// Accepts `month/day/year` and `year-month-day`.
pub fn parse_date(s: &str) -> Result<NaiveDate, ParseError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .map_err(|_| ParseError::Date(s.to_string()))
}

/// `month/day/year` without zero padding.
pub fn format_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}

fn parse_decimal(column: &'static str, s: &str) -> Result<Decimal, ParseError> {
    Decimal::from_str(s).map_err(|_| ParseError::Number {
        column,
        value: s.to_string(),
    })
}

fn parse_volume(s: &str) -> Result<u64, ParseError> {
    let invalid = || ParseError::Number {
        column: "volume",
        value: s.to_string(),
    };
    match s.parse::<u64>() {
        Ok(v) => Ok(v),
        Err(_) => Decimal::from_str(s)
            .ok()
            .filter(|d| d.fract().is_zero())
            .and_then(|d| d.to_u64())
            .ok_or_else(invalid),
    }
}

/// Fields of one bar line, in column order.
pub fn encode_fields(bar: &Bar) -> [String; COLUMNS] {
    [
        format_date(bar.date),
        bar.open.to_string(),
        bar.high.to_string(),
        bar.low.to_string(),
        bar.close.to_string(),
        bar.volume.to_string(),
        bar.adj_close.to_string(),
    ]
}

/// Streams a header line and bar lines into a writer.
pub struct BarWriter<W: Write> {
    inner: csv::Writer<W>,
    written: usize,
}

impl<W: Write> BarWriter<W> {
    /// Writes `header` verbatim as the first line.
    pub fn new(mut out: W, header: &str) -> io::Result<Self> {
        out.write_all(header.trim_end_matches(['\r', '\n']).as_bytes())?;
        out.write_all(b"\n")?;
        let inner = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(out);
        Ok(Self { inner, written: 0 })
    }

    pub fn write(&mut self, bar: &Bar) -> io::Result<()> {
        self.inner.write_record(encode_fields(bar))?;
        self.written += 1;
        Ok(())
    }

    /// Number of bars written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))
    }
}
