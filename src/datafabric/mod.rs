//! Multi-source market-data fabric (spec §4.1): unified OHLCV/quote contract over a
//! priority-ordered list of sources, with TTL caching and stale-cache fallback.

mod cache;
mod sources;

pub use cache::{CacheKey, OhlcvCache};
pub use sources::{strip_exchange_suffix, DataSource, SourceOutcome, SourcePriority};

use crate::errors::DataFabricError;
use crate::types::{Interval, OhlcvSeries, Quote};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exponential backoff parameters for transient per-source failures (spec §4.1).
const RETRY_BASE_SECS: f64 = 1.0;
const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Presents the unified "give me OHLCV / quote" contract, hiding source heterogeneity behind a
/// fixed priority order `[Broker, Exchange-API, Fallback-Historical]`.
pub struct DataFabric {
    sources: Vec<Arc<dyn DataSource>>,
    /// Sources that hard-failed (auth, 403) are parked here until process restart, per spec.
    unavailable: Mutex<HashSet<String>>,
    cache: OhlcvCache,
}

impl DataFabric {
    pub fn new(sources: Vec<Arc<dyn DataSource>>, cache: OhlcvCache) -> Self {
        Self {
            sources,
            unavailable: Mutex::new(HashSet::new()),
            cache,
        }
    }

    fn available_sources(&self) -> impl Iterator<Item = &Arc<dyn DataSource>> {
        let unavailable = self.unavailable.lock().clone();
        self.sources.iter().filter(move |s| !unavailable.contains(s.name()))
    }

    /// Clamp the requested `[from, to]` window per spec §4.1's date-range safety rules. Returns
    /// the corrected range and whether a correction was applied (logged by the caller as a
    /// `RangeAdjusted` notice).
    pub fn clamp_range(
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>, bool) {
        let now = Utc::now();
        let mut adjusted = false;

        let to = if to > now {
            adjusted = true;
            now
        } else {
            to
        };

        let min_from = now - interval.max_history();
        let mut from = from;
        if from < min_from {
            adjusted = true;
            from = min_from;
        }

        if from >= to {
            adjusted = true;
            from = to - sensible_default_span(interval);
        }

        (from, to, adjusted)
    }

    /// `GetOHLCV` (spec §4.1). Tries the cache first; on a miss or stale TTL, consults sources
    /// in priority order and caches the first success. If every live source fails, falls back
    /// to a stale cached copy rather than failing outright.
    pub async fn get_ohlcv(
        &self,
        ticker: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<OhlcvSeries, DataFabricError> {
        let (from, to, adjusted) = Self::clamp_range(interval, from, to);
        if adjusted {
            info!(ticker, %interval, "RangeAdjusted: requested range was clamped to a safe window");
        }

        let key = CacheKey::new(ticker, interval, from, to);
        if let Some(series) = self.cache.get_fresh(&key) {
            debug!(ticker, %interval, "serving OHLCV from fresh cache");
            return Ok(series);
        }

        for source in self.available_sources() {
            match self.fetch_with_retry(source.as_ref(), ticker, interval, from, to).await {
                SourceOutcome::Success(mut series) => {
                    series.source = source.name().to_string();
                    self.validate(&series)?;
                    self.cache.put(key.clone(), series.clone());
                    return Ok(series);
                }
                SourceOutcome::HardFail(reason) => {
                    warn!(source = source.name(), %reason, "source hard-failed, marking unavailable until restart");
                    self.unavailable.lock().insert(source.name().to_string());
                }
                SourceOutcome::SoftFail(reason) => {
                    debug!(source = source.name(), %reason, "source soft-failed, trying next");
                }
            }
        }

        if let Some(mut stale) = self.cache.get_any(&key) {
            warn!(ticker, %interval, "all live sources failed, serving stale cache");
            stale.is_stale = true;
            return Ok(stale);
        }

        Err(DataFabricError::NoData { ticker: ticker.to_string() })
    }

    /// `GetQuote` (spec §4.1): a single snapshot with change/change-pct derived against the
    /// previous close. No caching — quotes are always fetched fresh.
    pub async fn get_quote(&self, ticker: &str) -> Result<Quote, DataFabricError> {
        for source in self.available_sources() {
            match source.fetch_quote(ticker).await {
                SourceOutcome::Success(quote) => return Ok(quote),
                SourceOutcome::HardFail(reason) => {
                    warn!(source = source.name(), %reason, "quote source hard-failed");
                    self.unavailable.lock().insert(source.name().to_string());
                }
                SourceOutcome::SoftFail(reason) => {
                    debug!(source = source.name(), %reason, "quote source soft-failed, trying next");
                }
            }
        }
        Err(DataFabricError::NoData { ticker: ticker.to_string() })
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn DataSource,
        ticker: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SourceOutcome<OhlcvSeries> {
        let mut delay = RETRY_BASE_SECS;
        for attempt in 1..=RETRY_MAX_ATTEMPTS {
            match source.fetch_ohlcv(ticker, interval, from, to).await {
                SourceOutcome::SoftFail(reason) if attempt < RETRY_MAX_ATTEMPTS => {
                    debug!(source = source.name(), attempt, %reason, "transient failure, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                    delay *= 2.0;
                }
                other => return other,
            }
        }
        SourceOutcome::SoftFail("retries exhausted".to_string())
    }

    /// Validation per spec §4.1: negative prices are fatal, everything else is advisory.
    fn validate(&self, series: &OhlcvSeries) -> Result<(), DataFabricError> {
        for bar in &series.bars {
            if bar.open < 0.0 || bar.high < 0.0 || bar.low < 0.0 || bar.close < 0.0 {
                return Err(DataFabricError::ValidationFailed {
                    ticker: series.ticker.clone(),
                    reason: "negative price in OHLCV bar".to_string(),
                });
            }
            if !bar.is_valid() {
                warn!(ticker = %series.ticker, "OHLC inequality invariant violated on a bar, advisory only");
            }
        }
        Ok(())
    }
}

fn sensible_default_span(interval: Interval) -> chrono::Duration {
    match interval {
        Interval::OneMinute | Interval::FiveMinute | Interval::FifteenMinute => {
            chrono::Duration::days(5)
        }
        Interval::ThirtyMinute | Interval::OneHour => chrono::Duration::days(30),
        Interval::OneDay | Interval::OneWeek | Interval::OneMonth => chrono::Duration::days(365),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OhlcvBar;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AuthFailSource;
    #[async_trait]
    impl DataSource for AuthFailSource {
        fn name(&self) -> &str {
            "broker"
        }
        fn priority(&self) -> SourcePriority {
            SourcePriority::Broker
        }
        async fn fetch_ohlcv(&self, _t: &str, _i: Interval, _f: DateTime<Utc>, _to: DateTime<Utc>) -> SourceOutcome<OhlcvSeries> {
            SourceOutcome::HardFail("auth error".to_string())
        }
        async fn fetch_quote(&self, _t: &str) -> SourceOutcome<Quote> {
            SourceOutcome::HardFail("auth error".to_string())
        }
    }

    struct TimeoutSource;
    #[async_trait]
    impl DataSource for TimeoutSource {
        fn name(&self) -> &str {
            "exchange-api"
        }
        fn priority(&self) -> SourcePriority {
            SourcePriority::ExchangeApi
        }
        async fn fetch_ohlcv(&self, _t: &str, _i: Interval, _f: DateTime<Utc>, _to: DateTime<Utc>) -> SourceOutcome<OhlcvSeries> {
            SourceOutcome::SoftFail("timeout".to_string())
        }
        async fn fetch_quote(&self, _t: &str) -> SourceOutcome<Quote> {
            SourceOutcome::SoftFail("timeout".to_string())
        }
    }

    struct FallbackSource {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl DataSource for FallbackSource {
        fn name(&self) -> &str {
            "fallback-historical"
        }
        fn priority(&self) -> SourcePriority {
            SourcePriority::FallbackHistorical
        }
        async fn fetch_ohlcv(&self, ticker: &str, interval: Interval, _from: DateTime<Utc>, to: DateTime<Utc>) -> SourceOutcome<OhlcvSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bars = vec![OhlcvBar { t: to, open: 100.0, high: 101.0, low: 99.0, close: 100.5, volume: 1000 }];
            SourceOutcome::Success(OhlcvSeries { ticker: ticker.to_string(), interval, bars, is_stale: false, source: "fallback-historical".to_string() })
        }
        async fn fetch_quote(&self, ticker: &str) -> SourceOutcome<Quote> {
            SourceOutcome::Success(Quote::from_prices(ticker, 100.5, 99.8, "fallback-historical"))
        }
    }

    #[tokio::test]
    async fn source_failover_falls_back_and_then_serves_from_cache() {
        let fallback = Arc::new(FallbackSource { calls: AtomicUsize::new(0) });
        let fabric = DataFabric::new(
            vec![Arc::new(AuthFailSource), Arc::new(TimeoutSource), fallback.clone()],
            OhlcvCache::new(),
        );

        let to = Utc::now();
        let from = to - chrono::Duration::days(5);
        let series = fabric.get_ohlcv("X.NS", Interval::OneDay, from, to).await.unwrap();
        assert_eq!(series.source, "fallback-historical");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);

        // Second request within TTL should be served from cache, not re-consult any source.
        let series2 = fabric.get_ohlcv("X.NS", Interval::OneDay, from, to).await.unwrap();
        assert_eq!(series2.source, "fallback-historical");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quote_failover_skips_hard_failed_source() {
        let fabric = DataFabric::new(
            vec![Arc::new(AuthFailSource), Arc::new(FallbackSource { calls: AtomicUsize::new(0) })],
            OhlcvCache::new(),
        );
        let quote = fabric.get_quote("X.NS").await.unwrap();
        assert_eq!(quote.source, "fallback-historical");
    }

    #[test]
    fn clamp_range_pulls_future_to_to_now() {
        let future = Utc::now() + chrono::Duration::days(5);
        let (_, to, adjusted) =
            DataFabric::clamp_range(Interval::OneDay, Utc::now() - chrono::Duration::days(10), future);
        assert!(adjusted);
        assert!(to <= Utc::now());
    }

    #[test]
    fn clamp_range_enforces_intraday_60_day_cap() {
        let to = Utc::now();
        let from = to - chrono::Duration::days(200);
        let (clamped_from, clamped_to, adjusted) = DataFabric::clamp_range(Interval::FiveMinute, from, to);
        assert!(adjusted);
        assert!(clamped_from >= clamped_to - chrono::Duration::days(60));
    }

    #[test]
    fn clamp_range_fixes_inverted_from_to() {
        let to = Utc::now();
        let from = to + chrono::Duration::days(1);
        let (clamped_from, clamped_to, adjusted) = DataFabric::clamp_range(Interval::OneDay, from, to);
        assert!(adjusted);
        assert!(clamped_from < clamped_to);
    }
}
