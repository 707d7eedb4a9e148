//! Bollinger-Band / RSI mean-reversion strategy (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/mean_reversion_strategy.py`.

use super::base::{MarketSnapshot, Strategy, StrategyResult};
use crate::types::SignalKind;
use std::collections::HashMap;

pub struct MeanReversionStrategy {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self { rsi_oversold: 30.0, rsi_overbought: 70.0 }
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "Mean Reversion Strategy"
    }

    fn execute(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        let price = snapshot.current_price;
        let sma = snapshot.sma_20;
        let distance_pct = if sma > 0.0 { (price - sma) / sma * 100.0 } else { 0.0 };

        let (signal, confidence, entry, stop, t1, t2) = if price < snapshot.bollinger_lower && snapshot.rsi_14 < self.rsi_oversold {
            let confidence = (0.6 + distance_pct.abs() / 50.0).min(0.95);
            (SignalKind::BUY, confidence, price * 0.998, price * 0.95, sma, snapshot.bollinger_upper)
        } else if price > snapshot.bollinger_upper && snapshot.rsi_14 > self.rsi_overbought {
            let confidence = (0.6 + distance_pct.abs() / 50.0).min(0.95);
            (SignalKind::SELL, confidence, price * 1.002, price * 1.05, sma, snapshot.bollinger_lower)
        } else {
            let confidence = 0.5 - distance_pct.abs() / 100.0;
            let t1 = if distance_pct < 0.0 { snapshot.bollinger_upper } else { snapshot.bollinger_lower };
            (SignalKind::HOLD, confidence, price, price * 0.97, t1, t1 * 1.02)
        };

        let mut metadata = HashMap::new();
        metadata.insert("distance_from_mean_pct".to_string(), format!("{distance_pct:.2}"));

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
    fn oversold_below_lower_band_yields_buy() {
        let snapshot = MarketSnapshot {
            current_price: 90.0,
            sma_20: 100.0,
            bollinger_lower: 92.0,
            bollinger_upper: 108.0,
            rsi_14: 25.0,
            ..Default::default()
        };
        let result = MeanReversionStrategy::default().execute(&snapshot);
        assert_eq!(result.signal, SignalKind::BUY);
    }

    #[test]
    fn overbought_above_upper_band_yields_sell() {
        let snapshot = MarketSnapshot {
            current_price: 112.0,
            sma_20: 100.0,
            bollinger_lower: 92.0,
            bollinger_upper: 108.0,
            rsi_14: 80.0,
            ..Default::default()
        };
        let result = MeanReversionStrategy::default().execute(&snapshot);
        assert_eq!(result.signal, SignalKind::SELL);
    }

    #[test]
    fn near_mean_holds() {
        let snapshot = MarketSnapshot {
            current_price: 100.0,
            sma_20: 100.0,
            bollinger_lower: 92.0,
            bollinger_upper: 108.0,
            rsi_14: 50.0,
            ..Default::default()
        };
        let result = MeanReversionStrategy::default().execute(&snapshot);
        assert_eq!(result.signal, SignalKind::HOLD);
    }
}
