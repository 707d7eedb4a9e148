//! Multi-timeframe signal aggregation (spec §4.5).
//!
//! Grounded on `original_source/src/web/ai_models/multi_timeframe_signal.py`'s weighted
//! consensus with the 75%/50% agreement override.

use crate::types::{Levels, Signal, SignalKind};
use std::collections::HashMap;

/// Intraday weighting favors the shortest timeframe; end-of-day weighting favors the daily bar
/// as trend context. Both tables are fixed per spec §4.5, not derived.
fn intraday_weights() -> HashMap<&'static str, f64> {
    [("5m", 0.35), ("15m", 0.30), ("1h", 0.25), ("1d", 0.10)].into_iter().collect()
}

fn daily_weights() -> HashMap<&'static str, f64> {
    [("5m", 0.10), ("15m", 0.15), ("1h", 0.25), ("1d", 0.50)].into_iter().collect()
}

/// One timeframe's contribution going into the aggregator.
#[derive(Debug, Clone)]
pub struct TimeframeSignal {
    pub timeframe: &'static str,
    pub kind: SignalKind,
    pub probability: f64,
    pub confidence: f64,
    pub levels: Levels,
    pub current_price: f64,
}

#[derive(Debug, Clone)]
pub struct ConsensusSignal {
    pub ticker: String,
    pub consensus: SignalKind,
    pub probability: f64,
    pub confidence: f64,
    pub levels: Levels,
    pub current_price: f64,
    pub timeframe_weights: HashMap<String, f64>,
}

/// Aggregate per-timeframe signals into a single consensus view for `ticker`. `is_intraday`
/// selects which weight table is used; levels are taken from the highest-priority timeframe
/// that produced a signal (shortest-first intraday, longest-first end-of-day).
pub fn aggregate(ticker: &str, signals: &[TimeframeSignal], is_intraday: bool) -> ConsensusSignal {
    let base_weights = if is_intraday { intraday_weights() } else { daily_weights() };

    let mut selected: HashMap<&str, f64> =
        signals.iter().map(|s| (s.timeframe, base_weights.get(s.timeframe).copied().unwrap_or(0.0))).collect();
    let total: f64 = selected.values().sum();
    if total > 0.0 {
        for w in selected.values_mut() {
            *w /= total;
        }
    } else if !signals.is_empty() {
        let equal = 1.0 / signals.len() as f64;
        for s in signals {
            selected.insert(s.timeframe, equal);
        }
    }

    let weighted_prob: f64 = signals.iter().map(|s| s.probability * selected.get(s.timeframe).copied().unwrap_or(0.0)).sum();
    let weighted_conf: f64 = signals.iter().map(|s| s.confidence * selected.get(s.timeframe).copied().unwrap_or(0.0)).sum();
    let weight_sum: f64 = selected.values().sum();

    let probability = if weight_sum > 0.0 { weighted_prob / weight_sum } else { 0.5 };
    let confidence = if weight_sum > 0.0 { weighted_conf / weight_sum } else { 0.5 };

    let mut consensus = SignalKind::from_probability(probability);

    if signals.len() >= 3 {
        let n = signals.len() as f64;
        let buy_count = signals.iter().filter(|s| s.kind.is_buy()).count() as f64;
        let sell_count = signals.iter().filter(|s| s.kind.is_sell()).count() as f64;

        if buy_count >= n * 0.75 {
            consensus = SignalKind::STRONG_BUY;
        } else if buy_count >= n * 0.5 {
            consensus = SignalKind::BUY;
        } else if sell_count >= n * 0.75 {
            consensus = SignalKind::STRONG_SELL;
        } else if sell_count >= n * 0.5 {
            consensus = SignalKind::SELL;
        }
    }

    let priority: &[&str] = if is_intraday { &["5m", "15m", "1h", "1d"] } else { &["1d", "1h", "15m", "5m"] };
    let chosen = priority.iter().find_map(|tf| signals.iter().find(|s| s.timeframe == *tf));
    let (levels, current_price) = chosen
        .map(|s| (s.levels, s.current_price))
        .unwrap_or((Levels::default(), 0.0));

    ConsensusSignal {
        ticker: ticker.to_string(),
        consensus,
        probability,
        confidence,
        levels,
        current_price,
        timeframe_weights: selected.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    }
}

/// `should_execute` (spec §4.5): consensus must be directional, the probability must clear
/// `min_confidence` in either direction, and confidence must clear an absolute floor of 0.4.
pub fn should_execute(consensus: &ConsensusSignal, min_confidence: f64) -> bool {
    if consensus.consensus.is_hold() {
        return false;
    }
    if consensus.probability < min_confidence && consensus.probability > (1.0 - min_confidence) {
        return false;
    }
    consensus.confidence >= 0.4
}

impl ConsensusSignal {
    pub fn into_signal(self, timeframe: crate::types::Interval) -> Signal {
        Signal {
            ticker: self.ticker,
            timeframe,
            kind: self.consensus,
            probability: self.probability,
            confidence: self.confidence,
            levels: self.levels,
            current_price: self.current_price,
            ts: chrono::Utc::now(),
            filtered_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf(timeframe: &'static str, kind: SignalKind, probability: f64) -> TimeframeSignal {
        TimeframeSignal {
            timeframe,
            kind,
            probability,
            confidence: 0.8,
            levels: Levels { entry: 100.0, stop_loss: 95.0, target_1: 105.0, target_2: 110.0 },
            current_price: 100.0,
        }
    }

    #[test]
    fn three_quarter_agreement_overrides_threshold_consensus() {
        let signals = vec![
            tf("5m", SignalKind::BUY, 0.58),
            tf("15m", SignalKind::BUY, 0.56),
            tf("1h", SignalKind::BUY, 0.57),
            tf("1d", SignalKind::HOLD, 0.50),
        ];
        let consensus = aggregate("RELIANCE.NS", &signals, true);
        assert_eq!(consensus.consensus, SignalKind::STRONG_BUY);
    }

    #[test]
    fn half_agreement_upgrades_hold_to_directional() {
        let signals = vec![
            tf("5m", SignalKind::BUY, 0.58),
            tf("15m", SignalKind::BUY, 0.56),
            tf("1h", SignalKind::HOLD, 0.50),
            tf("1d", SignalKind::HOLD, 0.50),
        ];
        let consensus = aggregate("RELIANCE.NS", &signals, true);
        assert_eq!(consensus.consensus, SignalKind::BUY);
    }

    #[test]
    fn should_execute_rejects_hold_and_low_confidence() {
        let hold = aggregate("X", &[tf("5m", SignalKind::HOLD, 0.5)], true);
        assert!(!should_execute(&hold, 0.7));

        let mut weak = aggregate("X", &[tf("5m", SignalKind::BUY, 0.72)], true);
        weak.confidence = 0.2;
        assert!(!should_execute(&weak, 0.7));
    }

    #[test]
    fn intraday_prefers_shortest_timeframe_levels() {
        let mut short = tf("5m", SignalKind::BUY, 0.6);
        short.levels.entry = 50.0;
        let mut long = tf("1d", SignalKind::BUY, 0.6);
        long.levels.entry = 999.0;
        let consensus = aggregate("X", &[short, long], true);
        assert_eq!(consensus.levels.entry, 50.0);
    }
}
