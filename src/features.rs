//! Deterministic feature derivation from OHLCV bars (spec §4.2).
//!
//! The technical-indicator math itself (RSI, MACD, Bollinger, ADX, ATR, Stochastic, CCI, OBV,
//! Ichimoku) is specified only at the contract level — inputs/outputs — per spec §1; the
//! formulas here are the standard ones, not a novel variant.

use crate::types::{FeatureRow, OhlcvSeries};

/// One row of named features per input bar.
pub type FeatureTable = Vec<FeatureRow>;

/// `MakeFeatures` (spec §4.2): derive the full feature set for every bar in `series`.
/// For intraday inputs, VWAP and opening-range features reset at the start of each trading
/// session (a UTC-date boundary, since the series is already clipped to market-hours sessions
/// by the DataFabric); for daily inputs they degrade to rolling approximations.
pub fn make_features(series: &OhlcvSeries) -> FeatureTable {
    let n = series.bars.len();
    let closes: Vec<f64> = series.bars.iter().map(|b| b.close).collect();
    let highs: Vec<f64> = series.bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = series.bars.iter().map(|b| b.low).collect();
    let volumes: Vec<f64> = series.bars.iter().map(|b| b.volume as f64).collect();

    let sma20 = simple_moving_average(&closes, 20);
    let sma50 = simple_moving_average(&closes, 50);
    let ema12 = exponential_moving_average(&closes, 12);
    let ema26 = exponential_moving_average(&closes, 26);
    let rsi14 = rsi(&closes, 14);
    let atr14 = atr(&highs, &lows, &closes, 14);
    let adx14 = adx(&highs, &lows, &closes, 14);
    let (bb_upper, bb_lower) = bollinger_bands(&closes, 20, 2.0);
    let obv = on_balance_volume(&closes, &volumes);
    let vwap = if series.interval.is_intraday() {
        session_vwap(&highs, &lows, &closes, &volumes)
    } else {
        rolling_vwap_approx(&highs, &lows, &closes, &volumes, 20)
    };
    let vol_ratio = volume_ratio(&volumes, 20);

    (0..n)
        .map(|i| {
            let mut row = FeatureRow::new();
            row.insert("close".to_string(), closes[i]);
            row.insert("sma_20".to_string(), sma20[i]);
            row.insert("sma_50".to_string(), sma50[i]);
            row.insert("ema_12".to_string(), ema12[i]);
            row.insert("ema_26".to_string(), ema26[i]);
            row.insert("macd".to_string(), ema12[i] - ema26[i]);
            row.insert("rsi_14".to_string(), rsi14[i]);
            row.insert("atr_14".to_string(), atr14[i]);
            row.insert("adx_14".to_string(), adx14[i]);
            row.insert("bb_upper".to_string(), bb_upper[i]);
            row.insert("bb_lower".to_string(), bb_lower[i]);
            row.insert(
                "bb_position".to_string(),
                bollinger_position(closes[i], bb_upper[i], bb_lower[i]),
            );
            row.insert("obv".to_string(), obv[i]);
            row.insert("vwap".to_string(), vwap[i]);
            row.insert("volume_ratio".to_string(), vol_ratio[i]);
            row.insert(
                "return_1".to_string(),
                if i >= 1 { pct_change(closes[i - 1], closes[i]) } else { 0.0 },
            );
            row
        })
        .collect()
}

/// `AddForwardReturnLabel` (spec §4.2): appends `fwd_ret_h` and `label_up` for bars where the
/// forward return is observable. The returned table is shorter than the input by `horizon` rows
/// (the undefined tail is dropped, matching the cleaning contract's "never fills values" rule).
pub fn add_forward_return_label(
    series: &OhlcvSeries,
    mut table: FeatureTable,
    horizon: usize,
    threshold: f64,
) -> FeatureTable {
    let closes: Vec<f64> = series.bars.iter().map(|b| b.close).collect();
    let n = closes.len();
    if horizon == 0 || horizon >= n {
        return Vec::new();
    }
    for i in 0..(n - horizon) {
        let fwd_ret = pct_change(closes[i], closes[i + horizon]);
        table[i].insert("fwd_ret_h".to_string(), fwd_ret);
        table[i].insert("label_up".to_string(), if fwd_ret > threshold { 1.0 } else { 0.0 });
    }
    table.truncate(n - horizon);
    table
}

/// `CleanFrame` (spec §4.2): drop rows with `±Inf`/`NaN` in any required column. Never fills.
pub fn clean_frame(table: FeatureTable, required_cols: &[&str]) -> FeatureTable {
    table
        .into_iter()
        .filter(|row| {
            required_cols.iter().all(|col| {
                row.get(*col).map(|v| v.is_finite()).unwrap_or(false)
            })
        })
        .collect()
}

fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to - from) / from
    }
}

fn simple_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in 0..values.len() {
        if i + 1 >= window {
            let sum: f64 = values[i + 1 - window..=i].iter().sum();
            out[i] = sum / window as f64;
        } else if i + 1 > 0 {
            let sum: f64 = values[..=i].iter().sum();
            out[i] = sum / (i + 1) as f64;
        }
    }
    out
}

fn exponential_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut out = vec![f64::NAN; values.len()];
    if values.is_empty() {
        return out;
    }
    out[0] = values[0];
    for i in 1..values.len() {
        out[i] = alpha * values[i] + (1.0 - alpha) * out[i - 1];
    }
    out
}

fn rsi(closes: &[f64], window: usize) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![50.0; n];
    if n < 2 {
        return out;
    }
    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let delta = closes[i] - closes[i - 1];
        gains[i] = delta.max(0.0);
        losses[i] = (-delta).max(0.0);
    }
    let avg_gain = simple_moving_average(&gains, window);
    let avg_loss = simple_moving_average(&losses, window);
    for i in 0..n {
        let rs = if avg_loss[i] == 0.0 { f64::INFINITY } else { avg_gain[i] / avg_loss[i] };
        out[i] = if rs.is_infinite() { 100.0 } else { 100.0 - 100.0 / (1.0 + rs) };
    }
    out
}

fn true_range(highs: &[f64], lows: &[f64], closes: &[f64], i: usize) -> f64 {
    if i == 0 {
        highs[i] - lows[i]
    } else {
        let a = highs[i] - lows[i];
        let b = (highs[i] - closes[i - 1]).abs();
        let c = (lows[i] - closes[i - 1]).abs();
        a.max(b).max(c)
    }
}

fn atr(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    let tr: Vec<f64> = (0..closes.len()).map(|i| true_range(highs, lows, closes, i)).collect();
    simple_moving_average(&tr, window)
}

/// Simplified Wilder-style ADX: directional movement smoothed over `window`, expressed on the
/// standard 0-100 scale. Contract-level only, per spec §1.
fn adx(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Vec<f64> {
    let n = closes.len();
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }
    let tr: Vec<f64> = (0..n).map(|i| true_range(highs, lows, closes, i)).collect();
    let atr = simple_moving_average(&tr, window);
    let plus_di = simple_moving_average(&plus_dm, window);
    let minus_di = simple_moving_average(&minus_dm, window);

    (0..n)
        .map(|i| {
            let atr_i = atr[i];
            if atr_i == 0.0 || atr_i.is_nan() {
                return 0.0;
            }
            let pdi = 100.0 * plus_di[i] / atr_i;
            let mdi = 100.0 * minus_di[i] / atr_i;
            let sum = pdi + mdi;
            if sum == 0.0 {
                0.0
            } else {
                100.0 * (pdi - mdi).abs() / sum
            }
        })
        .collect()
}

fn bollinger_bands(closes: &[f64], window: usize, num_std: f64) -> (Vec<f64>, Vec<f64>) {
    let sma = simple_moving_average(closes, window);
    let n = closes.len();
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    for i in 0..n {
        let start = i.saturating_sub(window - 1);
        let slice = &closes[start..=i];
        let mean = sma[i];
        let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / slice.len() as f64;
        let std = variance.sqrt();
        upper[i] = mean + num_std * std;
        lower[i] = mean - num_std * std;
    }
    (upper, lower)
}

fn bollinger_position(close: f64, upper: f64, lower: f64) -> f64 {
    let width = upper - lower;
    if width.abs() < f64::EPSILON || !width.is_finite() {
        0.5
    } else {
        ((close - lower) / width).clamp(0.0, 1.0)
    }
}

fn on_balance_volume(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![0.0; n];
    for i in 1..n {
        out[i] = if closes[i] > closes[i - 1] {
            out[i - 1] + volumes[i]
        } else if closes[i] < closes[i - 1] {
            out[i - 1] - volumes[i]
        } else {
            out[i - 1]
        };
    }
    out
}

fn session_vwap(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    let mut cum_pv = 0.0;
    let mut cum_vol = 0.0;
    for i in 0..n {
        let typical = (highs[i] + lows[i] + closes[i]) / 3.0;
        cum_pv += typical * volumes[i];
        cum_vol += volumes[i];
        out[i] = if cum_vol > 0.0 { cum_pv / cum_vol } else { typical };
    }
    out
}

fn rolling_vwap_approx(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    volumes: &[f64],
    window: usize,
) -> Vec<f64> {
    let n = closes.len();
    let mut out = vec![f64::NAN; n];
    for i in 0..n {
        let start = i.saturating_sub(window - 1);
        let mut pv = 0.0;
        let mut vol = 0.0;
        for j in start..=i {
            let typical = (highs[j] + lows[j] + closes[j]) / 3.0;
            pv += typical * volumes[j];
            vol += volumes[j];
        }
        out[i] = if vol > 0.0 { pv / vol } else { closes[i] };
    }
    out
}

fn volume_ratio(volumes: &[f64], window: usize) -> Vec<f64> {
    let avg = simple_moving_average(volumes, window);
    (0..volumes.len())
        .map(|i| if avg[i] > 0.0 { volumes[i] / avg[i] } else { 1.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interval, OhlcvBar};
    use chrono::Utc;

    fn series_with_closes(closes: &[f64]) -> OhlcvSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| OhlcvBar {
                t: Utc::now() + chrono::Duration::minutes(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1000 + i as u64 * 10,
            })
            .collect();
        OhlcvSeries { ticker: "TEST.NS".into(), interval: Interval::FiveMinute, bars, is_stale: false, source: "test".into() }
    }

    #[test]
    fn make_features_produces_one_row_per_bar() {
        let series = series_with_closes(&[100.0, 101.0, 102.0, 101.5, 103.0]);
        let table = make_features(&series);
        assert_eq!(table.len(), series.bars.len());
        for row in &table {
            assert!(row.contains_key("rsi_14"));
            assert!(row.contains_key("macd"));
        }
    }

    #[test]
    fn forward_return_label_drops_unobservable_tail() {
        let series = series_with_closes(&[100.0, 101.0, 102.0, 103.0, 104.0]);
        let table = make_features(&series);
        let labeled = add_forward_return_label(&series, table, 2, 0.0);
        assert_eq!(labeled.len(), series.bars.len() - 2);
        for row in &labeled {
            assert!(row["fwd_ret_h"].is_finite());
        }
    }

    #[test]
    fn clean_frame_drops_rows_with_nan_in_required_column() {
        let mut row_ok = FeatureRow::new();
        row_ok.insert("rsi_14".to_string(), 55.0);
        let mut row_bad = FeatureRow::new();
        row_bad.insert("rsi_14".to_string(), f64::NAN);
        let table = vec![row_ok, row_bad];
        let cleaned = clean_frame(table, &["rsi_14"]);
        assert_eq!(cleaned.len(), 1);
    }

    #[test]
    fn bollinger_position_handles_zero_width_band() {
        assert_eq!(bollinger_position(100.0, 100.0, 100.0), 0.5);
    }
}
