//! ML-probability-threshold strategy (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/ml_strategy.py`.

use super::base::{MarketSnapshot, Strategy, StrategyResult};
use std::collections::HashMap;

pub struct MlStrategy {
    pub prob_threshold_buy: f64,
    pub prob_threshold_sell: f64,
}

impl Default for MlStrategy {
    fn default() -> Self {
        Self { prob_threshold_buy: 0.60, prob_threshold_sell: 0.40 }
    }
}

impl Strategy for MlStrategy {
    fn name(&self) -> &str {
        "ML Strategy"
    }

    fn execute(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        let price = snapshot.current_price;
        let prob = snapshot.probability;

        let (signal, confidence, entry, stop, t1, t2) = if prob >= self.prob_threshold_buy {
            (crate::types::SignalKind::BUY, prob, price * 0.998, price * 0.97, price * 1.03, price * 1.05)
        } else if prob <= self.prob_threshold_sell {
            (crate::types::SignalKind::SELL, 1.0 - prob, price * 1.002, price * 1.03, price * 0.97, price * 0.95)
        } else {
            (crate::types::SignalKind::HOLD, (prob - 0.5).abs() * 2.0, price * 1.002, price * 0.98, price * 1.02, price * 1.025)
        };

        let mut metadata = HashMap::new();
        metadata.insert("probability".to_string(), prob.to_string());

        StrategyResult {
            strategy_name: self.name().to_string(),
            signal,
            confidence,
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

    fn snapshot(probability: f64) -> MarketSnapshot {
        MarketSnapshot { current_price: 100.0, probability, ..Default::default() }
    }

    #[test]
    fn buy_above_threshold() {
        let result = MlStrategy::default().execute(&snapshot(0.75));
        assert_eq!(result.signal, crate::types::SignalKind::BUY);
        assert_eq!(result.confidence, 0.75);
    }

    #[test]
    fn sell_below_threshold() {
        let result = MlStrategy::default().execute(&snapshot(0.20));
        assert_eq!(result.signal, crate::types::SignalKind::SELL);
        assert!((result.confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn hold_in_between() {
        let result = MlStrategy::default().execute(&snapshot(0.5));
        assert_eq!(result.signal, crate::types::SignalKind::HOLD);
        assert_eq!(result.confidence, 0.0);
    }
}
