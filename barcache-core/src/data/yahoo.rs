//! Yahoo Finance fetcher.
//!
//! Fetches daily, weekly or monthly bars from Yahoo's v8 chart API. Handles
//! rate limiting, retries with exponential backoff, response parsing, and the
//! circuit breaker. Yahoo has no official API and changes format without
//! notice; parse failures surface as `ResponseFormatChanged`.

use super::circuit_breaker::CircuitBreaker;
use super::codec::HEADER;
use super::provider::{FetchError, Fetched, RemoteFetcher};
use crate::config::FetcherConfig;
use crate::domain::{Bar, DateRange, Period};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Decimal places kept from Yahoo's float prices.
const PRICE_DP: u32 = 4;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance chart API fetcher.
pub struct YahooFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooFetcher {
    pub fn new(
        config: &FetcherConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            circuit_breaker,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    /// Chart URL for a symbol, period and inclusive date range.
    fn chart_url(
        &self,
        symbol: &str,
        period: Period,
        range: DateRange,
    ) -> Result<reqwest::Url, FetchError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| FetchError::Other(format!("invalid base url '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Other(format!("base url '{}' has no path", self.base_url)))?
            .pop_if_empty()
            .push(symbol);

        let period1 = range.start().and_time(NaiveTime::MIN).and_utc().timestamp();
        // period2 is exclusive: midnight after the last requested day.
        let period2 = range
            .end()
            .succ_opt()
            .unwrap_or(range.end())
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();

        url.query_pairs_mut()
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string())
            .append_pair("interval", period.yahoo_interval())
            .append_pair("includeAdjustedClose", "true");
        Ok(url)
    }

    /// Parse the chart response into bars, newest first, unique by date.
    fn parse_response(
        symbol: &str,
        period: Period,
        resp: ChartResponse,
    ) -> Result<Vec<Bar>, FetchError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => FetchError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                FetchError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => FetchError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormatChanged("result array is empty".into()))?;

        // No timestamps: nothing traded in the range.
        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };

        let offset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut bars = Vec::with_capacity(timestamps.len());

        for (i, &ts) in timestamps.iter().enumerate() {
            let date = exchange_date(ts, offset).ok_or_else(|| {
                FetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
            })?;

            let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten().and_then(price);
            let (Some(open), Some(high), Some(low), Some(close)) = (
                field(&quote.open),
                field(&quote.high),
                field(&quote.low),
                field(&quote.close),
            ) else {
                // Incomplete rows are holidays or the still-open session.
                tracing::debug!(symbol, %date, "skipping incomplete row");
                continue;
            };

            let adj_close = adj_closes
                .as_ref()
                .and_then(|v| v.get(i).copied().flatten())
                .and_then(price)
                .unwrap_or(close);

            bars.push(Bar {
                date,
                open,
                high,
                low,
                close,
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
                adj_close,
                period,
            });
        }

        // Yahoo answers oldest first and may repeat the live session; keep
        // the last report for each date.
        bars.reverse();
        bars.sort_by(|a, b| b.date.cmp(&a.date));
        bars.dedup_by_key(|b| b.date);
        Ok(bars)
    }

    /// Execute a single HTTP request with retry and circuit breaker logic.
    fn fetch_with_retry(
        &self,
        symbol: &str,
        period: Period,
        range: DateRange,
    ) -> Result<Vec<Bar>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitBreakerTripped);
        }

        let url = self.chart_url(symbol, period, range)?;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_delay, attempt);
                tracing::debug!(symbol, attempt, ?delay, "retrying chart request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(FetchError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url.clone()).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(FetchError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(FetchError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(FetchError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(FetchError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(FetchError::AuthenticationRequired(
                    "Yahoo Finance requires authentication".into(),
                ));
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(FetchError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(FetchError::Http {
                    status: status.as_u16(),
                    symbol: symbol.to_string(),
                });
                continue;
            }

            let chart: ChartResponse = resp.json().map_err(|e| {
                FetchError::ResponseFormatChanged(format!(
                    "failed to parse response for {symbol}: {e}"
                ))
            })?;

            let bars = Self::parse_response(symbol, period, chart)?;
            self.circuit_breaker.record_success();
            return Ok(bars);
        }

        Err(last_error.unwrap_or_else(|| FetchError::Other("max retries exceeded".into())))
    }
}

impl RemoteFetcher for YahooFetcher {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(&self, symbol: &str, period: Period, range: DateRange) -> Result<Fetched, FetchError> {
        let bars = self.fetch_with_retry(symbol, period, range)?;
        tracing::debug!(symbol, %period, %range, bars = bars.len(), "fetched from yahoo");
        Ok(Fetched {
            header: HEADER.to_string(),
            bars,
        })
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// Delay before retry number `attempt` (1-based): doubles each time,
/// saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

/// Calendar date of a session timestamp in the exchange's time zone.
fn exchange_date(ts: i64, gmtoffset: i64) -> Option<NaiveDate> {
    chrono::DateTime::from_timestamp(ts.checked_add(gmtoffset)?, 0).map(|dt| dt.date_naive())
}

fn price(v: f64) -> Option<Decimal> {
    Decimal::from_f64(v).map(|d| d.round_dp(PRICE_DP).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn fetcher() -> YahooFetcher {
        YahooFetcher::new(
            &FetcherConfig::default(),
            Arc::new(CircuitBreaker::default_provider()),
        )
        .unwrap()
    }

    fn parse(json: &str, period: Period) -> Result<Vec<Bar>, FetchError> {
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        YahooFetcher::parse_response("SPY", period, resp)
    }

    // 2014-06-16 and 2014-06-17 13:30 UTC (09:30 New York), gmtoffset -14400.
    const TWO_DAYS: &str = r#"{"chart":{"result":[{
        "meta":{"gmtoffset":-14400},
        "timestamp":[1402925400,1403011800],
        "indicators":{
            "quote":[{"open":[187.8699951171875,187.09],"high":[188.5,188.09],
                      "low":[187.38,186.8],"close":[188.41,187.6],
                      "volume":[9480400,7290900]}],
            "adjclose":[{"adjclose":[178.12,177.35]}]}}],"error":null}}"#;

    #[test]
    fn parses_bars_newest_first() {
        let bars = parse(TWO_DAYS, Period::Daily).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, d(2014, 6, 17));
        assert_eq!(bars[1].date, d(2014, 6, 16));
        assert_eq!(bars[1].open, Decimal::from_str("187.87").unwrap());
        assert_eq!(bars[1].adj_close, Decimal::from_str("178.12").unwrap());
        assert_eq!(bars[0].volume, 7_290_900);
        assert!(bars.iter().all(|b| b.period == Period::Daily));
    }

    #[test]
    fn missing_timestamps_mean_no_bars() {
        let json = r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse(json, Period::Daily).unwrap().is_empty());
    }

    #[test]
    fn incomplete_rows_are_skipped() {
        let json = r#"{"chart":{"result":[{
            "timestamp":[1402925400,1403011800],
            "indicators":{"quote":[{"open":[1.0,null],"high":[1.0,null],
                                    "low":[1.0,null],"close":[1.0,null],
                                    "volume":[10,null]}]}}],"error":null}}"#;
        let bars = parse(json, Period::Weekly).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].adj_close, Decimal::ONE);
    }

    #[test]
    fn duplicate_session_keeps_last_report() {
        let json = r#"{"chart":{"result":[{
            "timestamp":[1403011800,1403020000],
            "indicators":{"quote":[{"open":[1.0,2.0],"high":[1.0,2.0],
                                    "low":[1.0,2.0],"close":[1.0,2.0],
                                    "volume":[10,20]}]}}],"error":null}}"#;
        let bars = parse(json, Period::Daily).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Decimal::from(2));
    }

    #[test]
    fn not_found_maps_to_symbol_error() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        assert!(matches!(
            parse(json, Period::Daily),
            Err(FetchError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn chart_url_carries_range_and_interval() {
        let range = DateRange::new(d(2014, 1, 2), d(2014, 1, 9)).unwrap();
        let url = fetcher().chart_url("^GSPC", Period::Weekly, range).unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://query2.finance.yahoo.com/v8/finance/chart/"));
        assert!(s.contains("period1=1388620800"));
        assert!(s.contains("period2=1389312000"));
        assert!(s.contains("interval=1wk"));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
        assert_eq!(
            backoff_delay(base, 40),
            Duration::from_millis(500 * u64::from(u32::MAX))
        );
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
    }

    #[test]
    fn tripped_breaker_refuses_without_network() {
        let breaker = Arc::new(CircuitBreaker::default_provider());
        breaker.trip();
        let f = YahooFetcher::new(&FetcherConfig::default(), breaker).unwrap();
        assert!(!f.is_available());
        let range = DateRange::single(d(2014, 1, 2));
        assert!(matches!(
            f.fetch("SPY", Period::Daily, range),
            Err(FetchError::CircuitBreakerTripped)
        ));
    }
}
