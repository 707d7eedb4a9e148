//! Signal filtering — confidence, model-agreement, trend, and volume gates (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/signal_filter.py::SignalFilter`.

use super::base::{MarketSnapshot, StrategyResult};
use super::regime::RegimeInfo;
use crate::types::SignalKind;

pub struct SignalFilter {
    pub min_confidence_buy_sell: f64,
    pub min_confidence_hold: f64,
    pub min_models_agree: usize,
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self { min_confidence_buy_sell: 0.70, min_confidence_hold: 0.60, min_models_agree: 2 }
    }
}

impl SignalFilter {
    /// Returns `None` when the signal is filtered out; otherwise a confidence-adjusted copy of
    /// `result` with `filtered_reason` left for the caller to attach on rejection.
    pub fn filter_signal(
        &self,
        result: &StrategyResult,
        snapshot: &MarketSnapshot,
        model_predictions: &[f64],
        regime: Option<&RegimeInfo>,
    ) -> Result<StrategyResult, &'static str> {
        if !self.check_confidence(result) {
            return Err("confidence below threshold");
        }
        if !model_predictions.is_empty() && !self.check_model_agreement(result, model_predictions) {
            return Err("insufficient model agreement");
        }
        if !self.check_trend_confirmation(result, snapshot) {
            return Err("trend does not confirm signal");
        }
        if result.signal.is_buy() || result.signal.is_sell() {
            if !self.check_volume_confirmation(snapshot, regime) {
                return Err("volume does not confirm entry");
            }
        }

        let mut adjusted = result.clone();
        adjusted.confidence = self.adjust_confidence(result.confidence, regime);
        Ok(adjusted)
    }

    fn check_confidence(&self, result: &StrategyResult) -> bool {
        if result.signal.is_hold() {
            result.confidence >= self.min_confidence_hold
        } else {
            result.confidence >= self.min_confidence_buy_sell
        }
    }

    fn check_model_agreement(&self, result: &StrategyResult, predictions: &[f64]) -> bool {
        if predictions.len() < self.min_models_agree {
            return true;
        }
        let bullish = predictions.iter().filter(|&&p| p > 0.55).count();
        let bearish = predictions.iter().filter(|&&p| p < 0.45).count();
        match result.signal {
            SignalKind::BUY | SignalKind::STRONG_BUY => bullish >= self.min_models_agree,
            SignalKind::SELL | SignalKind::STRONG_SELL => bearish >= self.min_models_agree,
            SignalKind::HOLD => bullish < self.min_models_agree && bearish < self.min_models_agree,
        }
    }

    fn check_trend_confirmation(&self, result: &StrategyResult, snapshot: &MarketSnapshot) -> bool {
        match result.signal {
            SignalKind::BUY | SignalKind::STRONG_BUY => {
                let price_above_ma = snapshot.current_price > snapshot.sma_20 * 0.98;
                let macd_bullish = snapshot.macd > snapshot.macd_signal;
                price_above_ma || macd_bullish
            }
            SignalKind::SELL | SignalKind::STRONG_SELL => {
                let price_below_ma = snapshot.current_price < snapshot.sma_20 * 1.02;
                let macd_bearish = snapshot.macd < snapshot.macd_signal;
                price_below_ma || macd_bearish
            }
            SignalKind::HOLD => true,
        }
    }

    fn check_volume_confirmation(&self, snapshot: &MarketSnapshot, regime: Option<&RegimeInfo>) -> bool {
        if let Some(regime) = regime {
            regime.volume_ratio >= 1.2 || regime.unusual_volume
        } else {
            snapshot.volume_ratio >= 1.2
        }
    }

    fn adjust_confidence(&self, base: f64, regime: Option<&RegimeInfo>) -> f64 {
        let mut adjusted = base;
        if let Some(regime) = regime {
            if regime.volatility_pct > 5.0 {
                adjusted *= 0.9;
            } else if regime.volatility_pct < 1.5 {
                adjusted *= 1.05;
            }
            if regime.trend_strength > 40.0 {
                adjusted *= 1.1;
            } else if regime.trend_strength < 20.0 {
                adjusted *= 0.95;
            }
            if regime.unusual_volume {
                adjusted *= 1.05;
            }
        }
        adjusted.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::regime::{MarketPhase, RegimeType};
    use std::collections::HashMap;

    fn buy_result(confidence: f64) -> StrategyResult {
        StrategyResult {
            strategy_name: "test".into(),
            signal: SignalKind::BUY,
            confidence,
            entry_price: 100.0,
            stop_loss: 97.0,
            target_1: 103.0,
            target_2: 105.0,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn low_confidence_buy_is_filtered() {
        let filter = SignalFilter::default();
        let snapshot = MarketSnapshot { current_price: 100.0, sma_20: 99.0, ..Default::default() };
        let result = filter.filter_signal(&buy_result(0.5), &snapshot, &[], None);
        assert!(result.is_err());
    }

    #[test]
    fn agreeing_models_and_confirming_trend_pass() {
        let filter = SignalFilter::default();
        let snapshot = MarketSnapshot { current_price: 100.0, sma_20: 99.0, volume_ratio: 1.5, ..Default::default() };
        let result = filter.filter_signal(&buy_result(0.8), &snapshot, &[0.6, 0.65, 0.7], None);
        assert!(result.is_ok());
    }

    #[test]
    fn disagreeing_models_filter_out_buy() {
        let filter = SignalFilter::default();
        let snapshot = MarketSnapshot { current_price: 100.0, sma_20: 99.0, volume_ratio: 1.5, ..Default::default() };
        let result = filter.filter_signal(&buy_result(0.8), &snapshot, &[0.3, 0.35, 0.4], None);
        assert!(result.is_err());
    }

    #[test]
    fn strong_trend_boosts_confidence() {
        let filter = SignalFilter::default();
        let snapshot = MarketSnapshot { current_price: 100.0, sma_20: 99.0, volume_ratio: 1.5, ..Default::default() };
        let regime = RegimeInfo {
            regime_type: RegimeType::StrongTrend,
            trend_strength: 45.0,
            volatility_pct: 1.0,
            volatility_percentile: 50.0,
            market_phase: MarketPhase::Bull,
            volume_ratio: 1.5,
            unusual_volume: true,
        };
        let result = filter.filter_signal(&buy_result(0.8), &snapshot, &[], Some(&regime)).unwrap();
        assert!(result.confidence > 0.8);
    }
}
