//! Shared strategy contract (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/base_strategy.py`'s `BaseStrategy`/
//! `StrategyResult`.

use crate::types::SignalKind;
use std::collections::HashMap;

/// Everything a strategy reads to produce a decision. Field names mirror the indicator
/// vocabulary `FeatureEngine` produces, so a `FeatureRow` can be adapted into this directly at
/// the call site.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub current_price: f64,
    pub sma_10: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub rsi_14: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub ret_5: f64,
    pub ret_20: f64,
    pub adx: f64,
    pub atr: f64,
    pub price_std: f64,
    pub bollinger_upper: f64,
    pub bollinger_lower: f64,
    pub volume_ratio: f64,
    pub probability: f64,
}

/// Output of a single strategy execution (spec §4.6).
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub strategy_name: String,
    pub signal: SignalKind,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub metadata: HashMap<String, String>,
}

pub trait Strategy {
    fn name(&self) -> &str;
    fn execute(&self, snapshot: &MarketSnapshot) -> StrategyResult;
}

pub fn hold_signal(name: &str, current_price: f64) -> StrategyResult {
    StrategyResult {
        strategy_name: name.to_string(),
        signal: SignalKind::HOLD,
        confidence: 0.5,
        entry_price: current_price,
        stop_loss: current_price * 0.97,
        target_1: current_price * 1.02,
        target_2: current_price * 1.04,
        metadata: HashMap::new(),
    }
}
