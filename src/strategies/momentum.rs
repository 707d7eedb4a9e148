//! Trend-following momentum strategy (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/momentum_strategy.py`.

use super::base::{MarketSnapshot, Strategy, StrategyResult};
use crate::types::SignalKind;
use std::collections::HashMap;

pub struct MomentumStrategy {
    pub min_trend_strength: f64,
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        Self { min_trend_strength: 25.0 }
    }
}

/// Momentum score on a 0-1 scale: short/medium return normalized against an assumed ±10%/±20%
/// range, blended with a `tanh`-squashed MACD histogram.
fn momentum_score(ret_5: f64, ret_20: f64, macd_hist: f64) -> f64 {
    let ret_5_norm = (ret_5 / 10.0 + 1.0) / 2.0;
    let ret_20_norm = (ret_20 / 20.0 + 1.0) / 2.0;
    let macd_norm = 0.5 + (macd_hist * 100.0).tanh() / 2.0;
    (ret_5_norm * 0.4 + ret_20_norm * 0.4 + macd_norm * 0.2).clamp(0.0, 1.0)
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "Momentum Strategy"
    }

    fn execute(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        let price = snapshot.current_price;
        let score = momentum_score(snapshot.ret_5, snapshot.ret_20, snapshot.macd_hist);
        let ma_diff = if snapshot.sma_50 > 0.0 { (snapshot.sma_10 - snapshot.sma_50) / snapshot.sma_50 * 100.0 } else { 0.0 };

        let (signal, confidence, entry, stop, t1, t2) = if ma_diff > 0.0
            && snapshot.macd > snapshot.macd_signal
            && score > 0.6
            && snapshot.adx > self.min_trend_strength
        {
            let confidence = (0.6 + score * 0.3 + (snapshot.adx - 25.0) / 100.0).min(0.95);
            (
                SignalKind::BUY,
                confidence,
                price * 1.002,
                snapshot.sma_10 * 0.97,
                price * 1.05,
                price * 1.10,
            )
        } else if ma_diff < -2.0 && snapshot.macd < snapshot.macd_signal && score < 0.4 && snapshot.adx > self.min_trend_strength {
            let confidence = (0.6 + (1.0 - score) * 0.3 + (snapshot.adx - 25.0) / 100.0).min(0.95);
            (
                SignalKind::SELL,
                confidence,
                price * 0.998,
                snapshot.sma_10 * 1.03,
                price * 0.95,
                price * 0.90,
            )
        } else if score > 0.55 && ma_diff > 0.0 {
            (SignalKind::BUY, 0.55 + score * 0.2, price * 1.001, price * 0.97, price * 1.03, price * 1.05)
        } else {
            (SignalKind::HOLD, 0.5, price, price * 0.97, price * 1.02, price * 1.04)
        };

        let mut metadata = HashMap::new();
        metadata.insert("momentum_score".to_string(), format!("{score:.3}"));
        metadata.insert("ma_diff_pct".to_string(), format!("{ma_diff:.2}"));

        StrategyResult {
            strategy_name: self.name().to_string(),
            signal,
            confidence: confidence.clamp(0.0, 1.0),
            entry_price: entry,
            stop_loss: stop,
            target_1: t1,
            target_2: t2,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_cross_with_strong_trend_yields_buy() {
        let snapshot = MarketSnapshot {
            current_price: 100.0,
            sma_10: 105.0,
            sma_50: 100.0,
            macd: 1.0,
            macd_signal: 0.5,
            macd_hist: 0.5,
            ret_5: 8.0,
            ret_20: 15.0,
            adx: 30.0,
            ..Default::default()
        };
        let result = MomentumStrategy::default().execute(&snapshot);
        assert_eq!(result.signal, SignalKind::BUY);
    }

    #[test]
    fn weak_trend_defaults_to_hold() {
        let snapshot = MarketSnapshot { current_price: 100.0, sma_10: 100.0, sma_50: 100.0, adx: 15.0, ..Default::default() };
        let result = MomentumStrategy::default().execute(&snapshot);
        assert_eq!(result.signal, SignalKind::HOLD);
    }
}
