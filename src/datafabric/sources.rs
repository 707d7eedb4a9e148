//! Pluggable data sources consulted by `DataFabric` in priority order (spec §4.1).
//!
//! Grounded on `original_source/src/web/data_source_manager.py`'s `DataSource` enum and
//! try-each-in-order failover loop; generalized here into a trait object so the fabric itself
//! never special-cases a connector by name.

use crate::types::{Interval, OhlcvSeries, Quote};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Fixed priority order from spec §4.1: `[Broker, Exchange-API, Fallback-Historical]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourcePriority {
    Broker = 1,
    ExchangeApi = 2,
    FallbackHistorical = 3,
}

/// Outcome of a single source call. `HardFail` (auth, 403) marks the source unavailable for the
/// rest of the process; `SoftFail` (timeout, transient 5xx) only affects the current call.
pub enum SourceOutcome<T> {
    Success(T),
    HardFail(String),
    SoftFail(String),
}

/// A market-data connector. The broker connector, the exchange-API connector, and the
/// fallback-historical connector are all implementations of this trait; `DataFabric` only ever
/// calls through it, never a concrete type — the OAuth2 handshake and HTTP plumbing of any
/// individual source are out of scope here (spec §1).
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> SourcePriority;

    async fn fetch_ohlcv(
        &self,
        ticker: &str,
        interval: Interval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SourceOutcome<OhlcvSeries>;

    async fn fetch_quote(&self, ticker: &str) -> SourceOutcome<Quote>;
}

/// Normalizes a user-facing ticker to the form a source expects, stripping the exchange suffix
/// NSE connectors don't want and indices they key differently (mirrors
/// `data_source_manager.py`'s `symbol.replace('.NS', '').replace('.BO', '')`).
pub fn strip_exchange_suffix(ticker: &str) -> &str {
    ticker.trim_end_matches(".NS").trim_end_matches(".BO")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_suffixes() {
        assert_eq!(strip_exchange_suffix("RELIANCE.NS"), "RELIANCE");
        assert_eq!(strip_exchange_suffix("TATASTEEL.BO"), "TATASTEEL");
        assert_eq!(strip_exchange_suffix("^NSEI"), "^NSEI");
    }
}
