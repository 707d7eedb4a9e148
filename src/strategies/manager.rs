//! Registers and combines the strategy set (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/strategy_manager.py`.

use super::adaptive_elite::AdaptiveEliteStrategy;
use super::base::{MarketSnapshot, Strategy, StrategyResult};
use super::mean_reversion::MeanReversionStrategy;
use super::ml::MlStrategy;
use super::momentum::MomentumStrategy;
use super::regime::RegimeInfo;
use crate::types::SignalKind;
use std::collections::HashMap;

pub enum CombineMethod {
    WeightedAverage,
    Voting,
    BestPerformer,
}

/// Owns one instance of each strategy family; `AdaptiveEliteStrategy` is driven separately
/// through `execute_adaptive_elite` since it needs regime/model-prediction inputs the plain
/// `Strategy` trait doesn't carry.
pub struct StrategyManager {
    ml: MlStrategy,
    mean_reversion: MeanReversionStrategy,
    momentum: MomentumStrategy,
    adaptive_elite: AdaptiveEliteStrategy,
}

impl Default for StrategyManager {
    fn default() -> Self {
        Self {
            ml: MlStrategy::default(),
            mean_reversion: MeanReversionStrategy::default(),
            momentum: MomentumStrategy::default(),
            adaptive_elite: AdaptiveEliteStrategy::default(),
        }
    }
}

impl StrategyManager {
    pub fn execute_ml(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        self.ml.execute(snapshot)
    }

    pub fn execute_mean_reversion(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        self.mean_reversion.execute(snapshot)
    }

    pub fn execute_momentum(&self, snapshot: &MarketSnapshot) -> StrategyResult {
        self.momentum.execute(snapshot)
    }

    pub fn execute_adaptive_elite(&self, snapshot: &MarketSnapshot, regime: &RegimeInfo, model_predictions: &[f64]) -> StrategyResult {
        self.adaptive_elite.execute_with_regime(snapshot, regime, model_predictions)
    }

    /// Combine ml/mean_reversion/momentum per spec §4.6's fixed weighting
    /// (`ml=0.4, mean_reversion=0.3, momentum=0.3`).
    pub fn combine(&self, snapshot: &MarketSnapshot, method: CombineMethod) -> StrategyResult {
        let results = [
            ("ml", self.execute_ml(snapshot)),
            ("mean_reversion", self.execute_mean_reversion(snapshot)),
            ("momentum", self.execute_momentum(snapshot)),
        ];

        match method {
            CombineMethod::WeightedAverage => self.weighted_average(&results, snapshot),
            CombineMethod::Voting => self.voting(&results, snapshot),
            CombineMethod::BestPerformer => self.best_performer(&results),
        }
    }

    fn weighted_average(&self, results: &[(&str, StrategyResult); 3], snapshot: &MarketSnapshot) -> StrategyResult {
        let weights: HashMap<&str, f64> = [("ml", 0.4), ("mean_reversion", 0.3), ("momentum", 0.3)].into_iter().collect();

        let mut weighted_signal = 0.0;
        let mut total_confidence = 0.0;
        let mut entries = Vec::new();
        let mut stops = Vec::new();
        let mut t1s = Vec::new();
        let mut t2s = Vec::new();

        for (name, result) in results {
            let weight = weights.get(name).copied().unwrap_or(0.33);
            let signal_score = if result.signal.is_buy() { 1.0 } else if result.signal.is_sell() { -1.0 } else { 0.0 };
            weighted_signal += signal_score * weight * result.confidence;
            total_confidence += result.confidence * weight;
            entries.push(result.entry_price);
            stops.push(result.stop_loss);
            t1s.push(result.target_1);
            t2s.push(result.target_2);
        }

        let signal = if weighted_signal > 0.2 {
            SignalKind::BUY
        } else if weighted_signal < -0.2 {
            SignalKind::SELL
        } else {
            SignalKind::HOLD
        };

        let price = snapshot.current_price;
        StrategyResult {
            strategy_name: "Ensemble (Weighted Average)".to_string(),
            signal,
            confidence: (total_confidence / results.len() as f64).min(1.0),
            entry_price: average(&entries).unwrap_or(price),
            stop_loss: average(&stops).unwrap_or(price * 0.97),
            target_1: average(&t1s).unwrap_or(price * 1.02),
            target_2: average(&t2s).unwrap_or(price * 1.04),
            metadata: HashMap::new(),
        }
    }

    fn voting(&self, results: &[(&str, StrategyResult); 3], snapshot: &MarketSnapshot) -> StrategyResult {
        let mut votes: HashMap<&str, u32> = [("BUY", 0), ("SELL", 0), ("HOLD", 0)].into_iter().collect();
        for (_, result) in results {
            let key = if result.signal.is_buy() { "BUY" } else if result.signal.is_sell() { "SELL" } else { "HOLD" };
            *votes.get_mut(key).unwrap() += 1;
        }
        let (winner, _) = votes.iter().max_by_key(|(_, count)| **count).map(|(k, v)| (*k, *v)).unwrap();
        let signal = match winner {
            "BUY" => SignalKind::BUY,
            "SELL" => SignalKind::SELL,
            _ => SignalKind::HOLD,
        };

        let winning_confidences: Vec<f64> = results
            .iter()
            .filter(|(_, r)| {
                let key = if r.signal.is_buy() { "BUY" } else if r.signal.is_sell() { "SELL" } else { "HOLD" };
                key == winner
            })
            .map(|(_, r)| r.confidence)
            .collect();
        let confidence = average(&winning_confidences).unwrap_or(0.5);

        let price = snapshot.current_price;
        let (stop_mult, t1_mult, t2_mult) = if signal == SignalKind::BUY { (0.97, 1.03, 1.05) } else { (1.03, 0.97, 0.95) };

        StrategyResult {
            strategy_name: "Ensemble (Voting)".to_string(),
            signal,
            confidence,
            entry_price: price,
            stop_loss: price * stop_mult,
            target_1: price * t1_mult,
            target_2: price * t2_mult,
            metadata: HashMap::new(),
        }
    }

    fn best_performer(&self, results: &[(&str, StrategyResult); 3]) -> StrategyResult {
        results.iter().map(|(_, r)| r).max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap()).unwrap().clone()
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_average_bullish_consensus_buys() {
        let manager = StrategyManager::default();
        let snapshot = MarketSnapshot {
            current_price: 100.0,
            sma_10: 105.0,
            sma_20: 90.0,
            sma_50: 100.0,
            macd: 1.0,
            macd_signal: 0.5,
            macd_hist: 0.5,
            ret_5: 8.0,
            ret_20: 15.0,
            adx: 30.0,
            probability: 0.8,
            bollinger_lower: 80.0,
            bollinger_upper: 120.0,
            rsi_14: 50.0,
            ..Default::default()
        };
        let result = manager.combine(&snapshot, CombineMethod::WeightedAverage);
        assert_eq!(result.signal, SignalKind::BUY);
    }

    #[test]
    fn best_performer_picks_highest_confidence() {
        let manager = StrategyManager::default();
        let snapshot = MarketSnapshot { current_price: 100.0, probability: 0.95, ..Default::default() };
        let result = manager.combine(&snapshot, CombineMethod::BestPerformer);
        assert!(result.confidence >= 0.5);
    }
}
