//! Market regime classification (spec §4.6).
//!
//! Grounded on `original_source/src/web/strategies/adaptive_features.py::detect_market_regime`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegimeType {
    StrongTrend,
    WeakTrend,
    HighVolatility,
    Ranging,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    Bull,
    Bear,
    Neutral,
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeInfo {
    pub regime_type: RegimeType,
    pub trend_strength: f64,
    pub volatility_pct: f64,
    pub volatility_percentile: f64,
    pub market_phase: MarketPhase,
    pub volume_ratio: f64,
    pub unusual_volume: bool,
}

/// `detect_market_regime`: classifies trend/volatility state from ADX, ATR-percentile, and the
/// SMA-20/SMA-50 stack. `atr_percentile` is the fraction of the trailing ATR history below the
/// current ATR reading (0-100).
pub fn detect_regime(
    adx: f64,
    atr_pct: f64,
    atr_percentile: f64,
    current_price: f64,
    sma_20: f64,
    sma_50: f64,
    volume_ratio: f64,
) -> RegimeInfo {
    let market_phase = if current_price > sma_20 && sma_20 > sma_50 {
        MarketPhase::Bull
    } else if current_price < sma_20 && sma_20 < sma_50 {
        MarketPhase::Bear
    } else {
        MarketPhase::Neutral
    };

    let regime_type = if adx > 40.0 && atr_percentile < 70.0 {
        RegimeType::StrongTrend
    } else if adx > 25.0 {
        RegimeType::WeakTrend
    } else if atr_percentile > 80.0 {
        RegimeType::HighVolatility
    } else {
        RegimeType::Ranging
    };

    RegimeInfo {
        regime_type,
        trend_strength: adx,
        volatility_pct: atr_pct,
        volatility_percentile: atr_percentile,
        market_phase,
        volume_ratio,
        unusual_volume: volume_ratio >= 1.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_adx_low_vol_percentile_is_strong_trend() {
        let info = detect_regime(45.0, 2.0, 50.0, 110.0, 105.0, 100.0, 1.0);
        assert_eq!(info.regime_type, RegimeType::StrongTrend);
        assert_eq!(info.market_phase, MarketPhase::Bull);
    }

    #[test]
    fn high_atr_percentile_without_trend_is_high_volatility() {
        let info = detect_regime(20.0, 5.0, 85.0, 100.0, 100.0, 100.0, 1.0);
        assert_eq!(info.regime_type, RegimeType::HighVolatility);
    }

    #[test]
    fn low_adx_low_atr_percentile_is_ranging() {
        let info = detect_regime(15.0, 1.5, 40.0, 100.0, 100.0, 100.0, 1.0);
        assert_eq!(info.regime_type, RegimeType::Ranging);
    }
}
