//! StrategyManager, Strategies, SignalFilter, and regime detection (spec §4.6).

pub mod adaptive_elite;
pub mod base;
pub mod manager;
pub mod mean_reversion;
pub mod ml;
pub mod momentum;
pub mod regime;
pub mod signal_filter;

pub use adaptive_elite::AdaptiveEliteStrategy;
pub use base::{MarketSnapshot, Strategy, StrategyResult};
pub use manager::{CombineMethod, StrategyManager};
pub use regime::{detect_regime, MarketPhase, RegimeInfo, RegimeType};
pub use signal_filter::SignalFilter;
