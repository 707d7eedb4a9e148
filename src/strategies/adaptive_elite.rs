//! Regime-routed "adaptive elite" strategy (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/adaptive_elite_strategy.py`: picks momentum
//! in a strong trend, mean reversion while ranging, a conservative ML read in high volatility,
//! and an ensemble vote otherwise, then runs the result through `SignalFilter` and widens stops
//! when volatility is elevated.

use super::base::{hold_signal, MarketSnapshot, Strategy, StrategyResult};
use super::mean_reversion::MeanReversionStrategy;
use super::ml::MlStrategy;
use super::momentum::MomentumStrategy;
use super::regime::{RegimeInfo, RegimeType};
use super::signal_filter::SignalFilter;
use crate::types::SignalKind;
use std::collections::HashMap;

pub struct AdaptiveEliteStrategy {
    ml: MlStrategy,
    mean_reversion: MeanReversionStrategy,
    momentum: MomentumStrategy,
    filter: SignalFilter,
}

impl Default for AdaptiveEliteStrategy {
    fn default() -> Self {
        Self {
            ml: MlStrategy::default(),
            mean_reversion: MeanReversionStrategy::default(),
            momentum: MomentumStrategy::default(),
            filter: SignalFilter::default(),
        }
    }
}

impl AdaptiveEliteStrategy {
    /// Full pipeline: regime-route to a sub-strategy, filter it, and widen levels for
    /// volatility. Returns a HOLD (with the rejection reason attached by the caller) when the
    /// filter rejects the raw signal rather than silently substituting a different strategy.
    pub fn execute_with_regime(
        &self,
        snapshot: &MarketSnapshot,
        regime: &RegimeInfo,
        model_predictions: &[f64],
    ) -> StrategyResult {
        let routed = self.select_strategy(snapshot, regime, model_predictions);

        match self.filter.filter_signal(&routed, snapshot, model_predictions, Some(regime)) {
            Ok(mut filtered) => {
                self.adjust_levels_for_volatility(&mut filtered, regime);
                filtered
            }
            Err(_reason) => hold_signal("Adaptive Elite Strategy", snapshot.current_price),
        }
    }

    fn select_strategy(&self, snapshot: &MarketSnapshot, regime: &RegimeInfo, model_predictions: &[f64]) -> StrategyResult {
        match regime.regime_type {
            RegimeType::StrongTrend => self.momentum.execute(snapshot),
            RegimeType::Ranging => self.mean_reversion.execute(snapshot),
            RegimeType::HighVolatility => {
                let avg_prob = if model_predictions.is_empty() {
                    snapshot.probability
                } else {
                    model_predictions.iter().sum::<f64>() / model_predictions.len() as f64
                };
                let adjusted = MarketSnapshot { probability: avg_prob, ..snapshot.clone() };
                let mut result = self.ml.execute(&adjusted);
                let stop_multiplier = 1.0 + regime.volatility_pct / 100.0;
                result.stop_loss = if result.signal.is_buy() {
                    result.entry_price * (1.0 - 0.03 * stop_multiplier)
                } else {
                    result.entry_price * (1.0 + 0.03 * stop_multiplier)
                };
                result
            }
            RegimeType::WeakTrend | RegimeType::Unknown => self.ensemble_vote(snapshot),
        }
    }

    fn ensemble_vote(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        let results = [self.ml.execute(snapshot), self.mean_reversion.execute(snapshot), self.momentum.execute(snapshot)];

        let mut scores: HashMap<&str, f64> = [("BUY", 0.0), ("SELL", 0.0), ("HOLD", 0.0)].into_iter().collect();
        let mut total_confidence = 0.0;
        for r in &results {
            let key = if r.signal.is_buy() { "BUY" } else if r.signal.is_sell() { "SELL" } else { "HOLD" };
            *scores.get_mut(key).unwrap() += r.confidence;
            total_confidence += r.confidence;
        }

        let (winning_key, winning_score) =
            scores.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).map(|(k, v)| (*k, *v)).unwrap();
        let signal = match winning_key {
            "BUY" => SignalKind::BUY,
            "SELL" => SignalKind::SELL,
            _ => SignalKind::HOLD,
        };
        let confidence = if total_confidence > 0.0 { (winning_score / total_confidence).min(1.0) } else { 0.5 };

        let price = snapshot.current_price;
        let entries: Vec<f64> = results.iter().map(|r| r.entry_price).collect();
        let stops: Vec<f64> = results.iter().map(|r| r.stop_loss).collect();
        let t1s: Vec<f64> = results.iter().map(|r| r.target_1).collect();
        let t2s: Vec<f64> = results.iter().map(|r| r.target_2).collect();

        StrategyResult {
            strategy_name: "Ensemble (Weak Trend)".to_string(),
            signal,
            confidence,
            entry_price: mean(&entries).unwrap_or(price),
            stop_loss: mean(&stops).unwrap_or(price * 0.97),
            target_1: mean(&t1s).unwrap_or(price * 1.03),
            target_2: mean(&t2s).unwrap_or(price * 1.05),
            metadata: HashMap::new(),
        }
    }

    fn adjust_levels_for_volatility(&self, result: &mut StrategyResult, regime: &RegimeInfo) {
        if regime.volatility_pct > 4.0 {
            if result.signal.is_buy() {
                result.stop_loss = result.entry_price * 0.94;
                result.target_1 = result.entry_price * 1.06;
                result.target_2 = result.entry_price * 1.10;
            } else if result.signal.is_sell() {
                result.stop_loss = result.entry_price * 1.06;
                result.target_1 = result.entry_price * 0.94;
                result.target_2 = result.entry_price * 0.90;
            }
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::regime::MarketPhase;

    fn regime(kind: RegimeType) -> RegimeInfo {
        RegimeInfo {
            regime_type: kind,
            trend_strength: 45.0,
            volatility_pct: 2.0,
            volatility_percentile: 50.0,
            market_phase: MarketPhase::Bull,
            volume_ratio: 1.5,
            unusual_volume: true,
        }
    }

    #[test]
    fn strong_trend_routes_to_momentum() {
        let strategy = AdaptiveEliteStrategy::default();
        let snapshot = MarketSnapshot {
            current_price: 100.0,
            sma_10: 105.0,
            sma_20: 99.0,
            sma_50: 100.0,
            macd: 1.0,
            macd_signal: 0.5,
            macd_hist: 0.5,
            ret_5: 8.0,
            ret_20: 15.0,
            adx: 45.0,
            volume_ratio: 1.5,
            ..Default::default()
        };
        let result = strategy.execute_with_regime(&snapshot, &regime(RegimeType::StrongTrend), &[0.7, 0.75]);
        assert_eq!(result.signal, SignalKind::BUY);
    }

    #[test]
    fn high_volatility_widens_stop_via_multiplier() {
        let strategy = AdaptiveEliteStrategy::default();
        let snapshot = MarketSnapshot { current_price: 100.0, sma_20: 99.0, probability: 0.8, volume_ratio: 1.5, ..Default::default() };
        let mut vol_regime = regime(RegimeType::HighVolatility);
        vol_regime.volatility_pct = 6.0;
        let result = strategy.execute_with_regime(&snapshot, &vol_regime, &[0.75, 0.8]);
        if result.signal.is_buy() {
            assert!(result.entry_price - result.stop_loss > result.entry_price * 0.03);
        }
    }
}
