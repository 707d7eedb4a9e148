//! Shared data model (spec §3): bars, series, signals, plans, positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bar granularity. Interval-dependent behavior (cache TTL, max history, VWAP session reset)
/// is keyed off this enum rather than a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "15m")]
    FifteenMinute,
    #[serde(rename = "30m")]
    ThirtyMinute,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1wk")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
}

impl Interval {
    /// Cache TTL per spec §3.
    pub fn cache_ttl(self) -> chrono::Duration {
        match self {
            Interval::OneMinute => chrono::Duration::minutes(5),
            Interval::FiveMinute => chrono::Duration::minutes(10),
            Interval::FifteenMinute => chrono::Duration::minutes(30),
            Interval::ThirtyMinute => chrono::Duration::hours(1),
            Interval::OneHour => chrono::Duration::hours(2),
            Interval::OneDay => chrono::Duration::hours(24),
            Interval::OneWeek => chrono::Duration::hours(24),
            Interval::OneMonth => chrono::Duration::hours(24),
        }
    }

    /// Upstream history cap for intraday intervals (spec §4.1's "60-day-history cap").
    pub fn max_history(self) -> chrono::Duration {
        match self {
            Interval::OneMinute | Interval::FiveMinute | Interval::FifteenMinute => {
                chrono::Duration::days(60)
            }
            Interval::ThirtyMinute | Interval::OneHour => chrono::Duration::days(365),
            Interval::OneDay | Interval::OneWeek | Interval::OneMonth => {
                chrono::Duration::days(365 * 10)
            }
        }
    }

    pub fn is_intraday(self) -> bool {
        !matches!(self, Interval::OneDay | Interval::OneWeek | Interval::OneMonth)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinute => "5m",
            Interval::FifteenMinute => "15m",
            Interval::ThirtyMinute => "30m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single OHLCV bar. `t` is the bar-close instant in market time, stored as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub t: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcvBar {
    /// The invariant every returned bar must satisfy (spec §3, §8 invariant 1).
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.low.is_finite()
            && self.high.is_finite()
    }
}

/// An ordered, strictly-increasing-in-time sequence of bars at a declared interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvSeries {
    pub ticker: String,
    pub interval: Interval,
    pub bars: Vec<OhlcvBar>,
    /// Set when the data fabric had to serve a stale cached copy because every live source
    /// failed (spec §4.1 stale-cache fallback).
    #[serde(default)]
    pub is_stale: bool,
    /// Which source ultimately produced this series; `"cache"` when served from cache.
    pub source: String,
}

impl OhlcvSeries {
    pub fn is_time_ordered(&self) -> bool {
        self.bars.windows(2).all(|w| w[0].t < w[1].t)
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// A single point-in-time quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub prev_close: f64,
    pub volume: u64,
    pub change: f64,
    pub change_pct: f64,
    pub ts: DateTime<Utc>,
    pub source: String,
}

impl Quote {
    pub fn from_prices(ticker: impl Into<String>, price: f64, prev_close: f64, source: impl Into<String>) -> Self {
        let change = price - prev_close;
        let change_pct = if prev_close > 0.0 { change / prev_close * 100.0 } else { 0.0 };
        Self {
            ticker: ticker.into(),
            price,
            open: price,
            high: price,
            low: price,
            prev_close,
            volume: 0,
            change,
            change_pct,
            ts: Utc::now(),
            source: source.into(),
        }
    }
}

/// Named feature values for a single bar. The recognized key set is closed per model version
/// (spec §4.2); this type itself stays an open map so FeatureEngine doesn't need to know which
/// model will eventually consume it.
pub type FeatureRow = std::collections::BTreeMap<String, f64>;

/// A single model's raw output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Prediction {
    pub probability: f64,
    pub ts: DateTime<Utc>,
}

impl Prediction {
    pub fn is_bullish(&self) -> bool {
        self.probability >= 0.5
    }
}

/// Directional recommendation. Ordered so that `SignalKind::STRONG_BUY < BUY < HOLD < SELL <
/// STRONG_SELL` is *not* implied — direction is categorical, not ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum SignalKind {
    STRONG_BUY,
    BUY,
    HOLD,
    SELL,
    STRONG_SELL,
}

impl SignalKind {
    pub fn is_buy(self) -> bool {
        matches!(self, SignalKind::BUY | SignalKind::STRONG_BUY)
    }

    pub fn is_sell(self) -> bool {
        matches!(self, SignalKind::SELL | SignalKind::STRONG_SELL)
    }

    pub fn is_hold(self) -> bool {
        matches!(self, SignalKind::HOLD)
    }

    /// Categorical signal from a probability via the fixed thresholds shared by the ensemble,
    /// the multi-timeframe aggregator, and the ML strategy (spec §4.5).
    pub fn from_probability(p: f64) -> Self {
        if p >= 0.65 {
            SignalKind::STRONG_BUY
        } else if p >= 0.55 {
            SignalKind::BUY
        } else if p <= 0.35 {
            SignalKind::STRONG_SELL
        } else if p <= 0.45 {
            SignalKind::SELL
        } else {
            SignalKind::HOLD
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::STRONG_BUY => "STRONG_BUY",
            SignalKind::BUY => "BUY",
            SignalKind::HOLD => "HOLD",
            SignalKind::SELL => "SELL",
            SignalKind::STRONG_SELL => "STRONG_SELL",
        };
        write!(f, "{s}")
    }
}

/// Price levels attached to a signal or plan.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Levels {
    pub entry: f64,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
}

/// A signal for one `(ticker, timeframe)` at a computation instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub timeframe: Interval,
    pub kind: SignalKind,
    pub probability: f64,
    pub confidence: f64,
    pub levels: Levels,
    pub current_price: f64,
    pub ts: DateTime<Utc>,
    /// Present when the SignalFilter rejected the raw strategy output; the signal itself is
    /// downgraded to HOLD but the reason survives for diagnostics (spec §4.6).
    pub filtered_reason: Option<String>,
}

/// Trading product / holding-period classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingType {
    Intraday,
    Swing,
    Position,
}

/// Broker product classification (distinct from `TradingType`: SWING and POSITION both settle
/// to `Delivery`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    Intraday,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Draft,
    Approved,
    Executed,
    Cancelled,
}

/// A persisted, risk-sized trading intention (spec §3, §4.7). Immutable except `status` and
/// `order_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub id: String,
    pub ticker: String,
    pub side: Side,
    pub trading_type: TradingType,
    pub quantity: u64,
    pub entry: f64,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub risk_amount: f64,
    pub risk_reward_ratio: f64,
    pub capital_required: f64,
    pub max_loss: f64,
    pub order_type: OrderType,
    pub product: Product,
    pub status: PlanStatus,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub warnings: Vec<String>,
}

/// Broker-owned position, mirrored locally as a read-through cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub quantity: i64,
    pub average_price: f64,
    pub current_price: f64,
    pub product: Product,
    pub entry_ts: DateTime<Utc>,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    /// Set once the target-1 scale-out has fired, so it is not fired twice.
    #[serde(default)]
    pub target_1_hit: bool,
}

impl Position {
    pub fn risk_amount(&self) -> f64 {
        (self.average_price - self.stop_loss).abs() * self.quantity.unsigned_abs() as f64
    }
}

/// Queued at BUY time, resolved when the matching position closes (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPrediction {
    pub model_id: String,
    pub ticker: String,
    pub probability: f64,
    pub entry_price: f64,
    pub ts: DateTime<Utc>,
}

/// Process-wide breaker state, reset at day start (spec §3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub consecutive_losses: u32,
    pub daily_pnl: f64,
    pub cooldown_end: Option<DateTime<Utc>>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            triggered: false,
            triggered_at: None,
            consecutive_losses: 0,
            daily_pnl: 0.0,
            cooldown_end: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_invariant_rejects_inverted_high_low() {
        let bar = OhlcvBar {
            t: Utc::now(),
            open: 10.0,
            high: 9.0,
            low: 11.0,
            close: 10.0,
            volume: 100,
        };
        assert!(!bar.is_valid());
    }

    #[test]
    fn signal_kind_thresholds_match_spec() {
        assert_eq!(SignalKind::from_probability(0.70), SignalKind::STRONG_BUY);
        assert_eq!(SignalKind::from_probability(0.58), SignalKind::BUY);
        assert_eq!(SignalKind::from_probability(0.50), SignalKind::HOLD);
        assert_eq!(SignalKind::from_probability(0.40), SignalKind::SELL);
        assert_eq!(SignalKind::from_probability(0.20), SignalKind::STRONG_SELL);
    }
}
