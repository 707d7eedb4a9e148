//! TTL-aware OHLCV cache keyed by `(ticker-slug, interval, from-date, to-date)` (spec §3, §4.1).
//!
//! Single-writer, multi-reader: reads never block, writes serialize through the same lock the
//! rest of this codebase uses for its JSON stores (`parking_lot::Mutex`), held only across the
//! synchronous insert, never across an `.await`.

use crate::types::{Interval, OhlcvSeries};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    slug: String,
    interval: Interval,
    from_date: String,
    to_date: String,
}

impl CacheKey {
    pub fn new(ticker: &str, interval: Interval, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            slug: ticker.to_uppercase(),
            interval,
            from_date: from.format("%Y-%m-%d").to_string(),
            to_date: to.format("%Y-%m-%d").to_string(),
        }
    }
}

struct Entry {
    series: OhlcvSeries,
    cached_at: DateTime<Utc>,
}

pub struct OhlcvCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl OhlcvCache {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached series only if it is still within its interval-specific TTL.
    pub fn get_fresh(&self, key: &CacheKey) -> Option<OhlcvSeries> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        let ttl = entry.series.interval.cache_ttl();
        if Utc::now() - entry.cached_at <= ttl {
            Some(entry.series.clone())
        } else {
            None
        }
    }

    /// Returns the cached series regardless of staleness — used for the stale-cache fallback
    /// when every live source has failed.
    pub fn get_any(&self, key: &CacheKey) -> Option<OhlcvSeries> {
        self.entries.lock().get(key).map(|e| e.series.clone())
    }

    pub fn put(&self, key: CacheKey, series: OhlcvSeries) {
        self.entries.lock().insert(key, Entry { series, cached_at: Utc::now() });
    }
}

impl Default for OhlcvCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OhlcvBar;

    fn sample_series(ticker: &str) -> OhlcvSeries {
        OhlcvSeries {
            ticker: ticker.to_string(),
            interval: Interval::OneDay,
            bars: vec![OhlcvBar {
                t: Utc::now(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 1000,
            }],
            is_stale: false,
            source: "test".to_string(),
        }
    }

    #[test]
    fn fresh_entry_served_within_ttl() {
        let cache = OhlcvCache::new();
        let key = CacheKey::new("RELIANCE.NS", Interval::OneDay, Utc::now() - chrono::Duration::days(5), Utc::now());
        cache.put(key.clone(), sample_series("RELIANCE.NS"));
        assert!(cache.get_fresh(&key).is_some());
    }

    #[test]
    fn stale_entry_not_served_as_fresh_but_available_as_fallback() {
        let cache = OhlcvCache::new();
        let key = CacheKey::new("RELIANCE.NS", Interval::FiveMinute, Utc::now() - chrono::Duration::days(1), Utc::now());
        let mut entries = cache.entries.lock();
        entries.insert(
            key.clone(),
            Entry { series: sample_series("RELIANCE.NS"), cached_at: Utc::now() - chrono::Duration::hours(1) },
        );
        drop(entries);
        assert!(cache.get_fresh(&key).is_none());
        assert!(cache.get_any(&key).is_some());
    }
}
