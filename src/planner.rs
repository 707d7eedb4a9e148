//! TradePlanner (spec §4.7): turns a signal into a risk-sized, persisted `TradePlan`.
//!
//! Grounded on `original_source/src/web/trade_planner.py`'s `TradePlanner.generate_trade_plan`/
//! `_adjust_levels_for_trading_type`/`_get_order_details`/`validate_trade_plan`/
//! `backtest_trade_plan`; persistence follows the same atomic tmp-then-rename pattern as
//! `registry.rs`.

use crate::types::{Levels, OhlcvSeries, OrderType, PlanStatus, Product, Side, SignalKind, TradePlan, TradingType};
use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// `⌊risk_amount / |entry - stop|⌋`, floored to whole lots, minimum one share once risk capital
/// allows any position at all (spec §4.7's "min-1 rule").
pub fn risk_based_size(entry: f64, stop_loss: f64, risk_amount: f64, lot_size: u64) -> u64 {
    let price_risk = (entry - stop_loss).abs();
    if price_risk <= 0.0 || risk_amount <= 0.0 {
        return 0;
    }
    let raw_qty = (risk_amount / price_risk) as u64;
    let lots = raw_qty / lot_size.max(1);
    let qty = lots * lot_size.max(1);
    if qty == 0 && raw_qty > 0 {
        lot_size.max(1)
    } else {
        qty
    }
}

/// Tighten/widen levels by holding-period convention (spec §4.7): intraday gets a tight 2%
/// stop/1-1.5% targets, position trading gets a wide 5%/5-10% band, swing keeps whatever the
/// signal already proposed.
fn adjust_levels_for_trading_type(current_price: f64, levels: Levels, trading_type: TradingType) -> Levels {
    match trading_type {
        TradingType::Intraday => Levels {
            entry: levels.entry,
            stop_loss: current_price * 0.98,
            target_1: current_price * 1.01,
            target_2: current_price * 1.015,
        },
        TradingType::Position => Levels {
            entry: levels.entry,
            stop_loss: current_price * 0.95,
            target_1: current_price * 1.05,
            target_2: current_price * 1.10,
        },
        TradingType::Swing => levels,
    }
}

fn order_details(trading_type: TradingType) -> (OrderType, Product) {
    match trading_type {
        TradingType::Intraday => (OrderType::Market, Product::Intraday),
        TradingType::Swing | TradingType::Position => (OrderType::Limit, Product::Delivery),
    }
}

pub struct TradePlanner {
    path: PathBuf,
    plans: Mutex<HashMap<String, TradePlan>>,
}

impl TradePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let plans = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading trade plans at {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| "parsing trade plans JSON")?
        } else {
            HashMap::new()
        };
        Ok(Self { path, plans: Mutex::new(plans) })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let plans = self.plans.lock();
        let json = serde_json::to_string_pretty(&*plans)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// `generate_trade_plan` (spec §4.7). `account_balance` and `max_risk_per_trade` come from
    /// `TradingConfig`; `lot_size` is 1 for cash equities and the exchange lot size for F&O.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_trade_plan(
        &self,
        ticker: &str,
        signal_kind: SignalKind,
        probability: f64,
        current_price: f64,
        raw_levels: Levels,
        trading_type: TradingType,
        account_balance: f64,
        max_risk_per_trade: f64,
        lot_size: u64,
    ) -> TradePlan {
        let levels = adjust_levels_for_trading_type(current_price, raw_levels, trading_type);
        let risk_amount = account_balance * max_risk_per_trade;
        let quantity = risk_based_size(levels.entry, levels.stop_loss, risk_amount, lot_size);
        let capital_required = quantity as f64 * levels.entry;

        let price_risk = (levels.entry - levels.stop_loss).abs();
        let price_reward = (levels.target_1 - levels.entry).abs();
        let risk_reward_ratio = if price_risk > 0.0 { price_reward / price_risk } else { 0.0 };
        let max_loss = quantity as f64 * price_risk;

        let (order_type, product) = order_details(trading_type);
        let side = if signal_kind.is_buy() { Side::Buy } else { Side::Sell };

        let plan_id = format!("{ticker}_{trading_type:?}_{}", Utc::now().format("%Y%m%d_%H%M%S"));

        let plan = TradePlan {
            id: plan_id,
            ticker: ticker.to_string(),
            side,
            trading_type,
            quantity,
            entry: levels.entry,
            stop_loss: levels.stop_loss,
            target_1: levels.target_1,
            target_2: levels.target_2,
            risk_amount,
            risk_reward_ratio,
            capital_required,
            max_loss,
            order_type,
            product,
            status: PlanStatus::Draft,
            order_id: None,
            created_at: Utc::now(),
            warnings: Vec::new(),
        };
        let _ = probability;
        plan
    }

    pub fn persist(&self, plan: TradePlan) -> Result<()> {
        self.plans.lock().insert(plan.id.clone(), plan);
        self.save()
    }

    pub fn get_plan(&self, id: &str) -> Option<TradePlan> {
        self.plans.lock().get(id).cloned()
    }

    pub fn update_status(&self, id: &str, status: PlanStatus) -> Result<()> {
        {
            let mut plans = self.plans.lock();
            if let Some(plan) = plans.get_mut(id) {
                plan.status = status;
            }
        }
        self.save()
    }

    /// Pre-approval sanity checks independent of portfolio state (spec §4.7); portfolio-level
    /// checks belong to `RiskManager`.
    pub fn validate(&self, plan: &TradePlan, max_risk_per_trade: f64) -> (bool, Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let risk_pct = if plan.capital_required > 0.0 { plan.risk_amount / plan.capital_required } else { 0.0 };
        if risk_pct > max_risk_per_trade {
            errors.push(format!(
                "risk per trade ({:.2}%) exceeds maximum ({:.2}%)",
                risk_pct * 100.0,
                max_risk_per_trade * 100.0
            ));
        }

        let stop_loss_pct = if plan.entry > 0.0 { (plan.entry - plan.stop_loss).abs() / plan.entry } else { 0.0 };
        if stop_loss_pct > 0.10 {
            warnings.push(format!("stop loss is very wide ({:.2}%)", stop_loss_pct * 100.0));
        } else if stop_loss_pct < 0.01 {
            warnings.push(format!("stop loss is very tight ({:.2}%)", stop_loss_pct * 100.0));
        }

        if plan.risk_reward_ratio < 1.0 {
            warnings.push(format!("risk-reward ratio is less than 1:1 ({:.2})", plan.risk_reward_ratio));
        }

        if plan.quantity == 0 {
            errors.push("position size is zero".to_string());
        }

        (errors.is_empty(), errors, warnings)
    }
}

/// Outcome of replaying a plan against historical bars.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub hit_stop_loss: bool,
    pub hit_target_1: bool,
    pub hit_target_2: bool,
}

/// `backtest_trade_plan` (spec §4.7 supplement): replay a plan's levels against historical
/// OHLCV, starting from the bar whose close is nearest the plan's entry price. Stop-loss is
/// checked before targets on every bar (a gap that clears both in one bar books the loss).
pub fn backtest_trade_plan(plan: &TradePlan, historical: &OhlcvSeries) -> Option<BacktestResult> {
    let entry_idx = historical
        .bars
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.close - plan.entry).abs().partial_cmp(&(b.close - plan.entry).abs()).unwrap()
        })
        .map(|(i, _)| i)?;

    let mut hit_stop = false;
    let mut hit_target_1 = false;
    let mut hit_target_2 = false;
    let mut exit_price = None;

    for bar in &historical.bars[entry_idx..] {
        if plan.side == Side::Buy {
            if bar.low <= plan.stop_loss {
                hit_stop = true;
                exit_price = Some(plan.stop_loss);
                break;
            }
            if bar.high >= plan.target_2 {
                hit_target_2 = true;
                exit_price = Some(plan.target_2);
                break;
            } else if bar.high >= plan.target_1 {
                hit_target_1 = true;
            }
        } else {
            if bar.high >= plan.stop_loss {
                hit_stop = true;
                exit_price = Some(plan.stop_loss);
                break;
            }
            if bar.low <= plan.target_2 {
                hit_target_2 = true;
                exit_price = Some(plan.target_2);
                break;
            } else if bar.low <= plan.target_1 {
                hit_target_1 = true;
            }
        }
    }

    let exit_price = exit_price.unwrap_or_else(|| historical.bars.last().map(|b| b.close).unwrap_or(plan.entry));
    let pnl = if plan.side == Side::Buy {
        (exit_price - plan.entry) * plan.quantity as f64
    } else {
        (plan.entry - exit_price) * plan.quantity as f64
    };
    let pnl_pct = if plan.entry > 0.0 && plan.quantity > 0 {
        pnl / (plan.entry * plan.quantity as f64) * 100.0
    } else {
        0.0
    };

    Some(BacktestResult { entry_price: plan.entry, exit_price, pnl, pnl_pct, hit_stop_loss: hit_stop, hit_target_1, hit_target_2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OhlcvBar;
    use tempfile::tempdir;

    #[test]
    fn risk_based_size_floors_to_lot_and_enforces_min_one() {
        assert_eq!(risk_based_size(100.0, 95.0, 2000.0, 1), 400);
        assert_eq!(risk_based_size(100.0, 99.0, 10.0, 1), 1);
        assert_eq!(risk_based_size(100.0, 100.0, 2000.0, 1), 0);
    }

    #[test]
    fn intraday_levels_are_tighter_than_position() {
        let price = 100.0;
        let raw = Levels { entry: 100.0, stop_loss: 90.0, target_1: 110.0, target_2: 120.0 };
        let intraday = adjust_levels_for_trading_type(price, raw, TradingType::Intraday);
        let position = adjust_levels_for_trading_type(price, raw, TradingType::Position);
        assert!((price - intraday.stop_loss).abs() < (price - position.stop_loss).abs());
    }

    #[test]
    fn generate_and_persist_round_trips() {
        let dir = tempdir().unwrap();
        let planner = TradePlanner::new(dir.path().join("plans.json")).unwrap();
        let levels = Levels { entry: 100.0, stop_loss: 95.0, target_1: 110.0, target_2: 120.0 };
        let plan = planner.generate_trade_plan(
            "RELIANCE.NS",
            SignalKind::BUY,
            0.7,
            100.0,
            levels,
            TradingType::Swing,
            100_000.0,
            0.02,
            1,
        );
        let id = plan.id.clone();
        planner.persist(plan).unwrap();

        let reloaded = TradePlanner::new(dir.path().join("plans.json")).unwrap();
        assert!(reloaded.get_plan(&id).is_some());
    }

    #[test]
    fn risk_based_sizing_matches_worked_example() {
        let dir = tempdir().unwrap();
        let planner = TradePlanner::new(dir.path().join("plans.json")).unwrap();
        let levels = Levels { entry: 500.0, stop_loss: 485.0, target_1: 515.0, target_2: 530.0 };
        let plan = planner.generate_trade_plan(
            "X.NS",
            SignalKind::BUY,
            0.7,
            500.0,
            levels,
            TradingType::Swing,
            100_000.0,
            0.02,
            1,
        );
        assert_eq!(plan.risk_amount, 2000.0);
        assert_eq!(plan.quantity, 133);
        assert_eq!(plan.capital_required, 66_500.0);
        assert!((plan.risk_reward_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn validate_flags_excessive_risk_and_zero_quantity() {
        let dir = tempdir().unwrap();
        let planner = TradePlanner::new(dir.path().join("plans.json")).unwrap();

        // price_risk (20) vs risk_amount (1000 * 0.02 = 20) sizes a single share, whose
        // capital_required (500) is well under account_balance, pushing risk_pct over the cap.
        let levels = Levels { entry: 500.0, stop_loss: 480.0, target_1: 520.0, target_2: 540.0 };
        let plan = planner.generate_trade_plan(
            "X.NS",
            SignalKind::BUY,
            0.7,
            500.0,
            levels,
            TradingType::Swing,
            1000.0,
            0.02,
            1,
        );
        let (valid, errors, _warnings) = planner.validate(&plan, 0.02);
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("risk per trade")));

        // risk_amount (10 * 0.02 = 0.2) is smaller than price_risk (0.5), so the raw share count
        // truncates to zero before the lot-size floor ever applies.
        let tight_levels = Levels { entry: 100.0, stop_loss: 99.5, target_1: 101.0, target_2: 102.0 };
        let zero_qty_plan = planner.generate_trade_plan(
            "X.NS",
            SignalKind::BUY,
            0.7,
            100.0,
            tight_levels,
            TradingType::Swing,
            10.0,
            0.02,
            1,
        );
        let (valid, errors, _warnings) = planner.validate(&zero_qty_plan, 0.02);
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("zero")));
    }

    #[test]
    fn backtest_stops_out_before_target() {
        let bars = vec![
            OhlcvBar { t: Utc::now(), open: 100.0, high: 101.0, low: 99.0, close: 100.0, volume: 1000 },
            OhlcvBar { t: Utc::now(), open: 100.0, high: 100.5, low: 94.0, close: 95.0, volume: 1000 },
        ];
        let series = OhlcvSeries { ticker: "X".into(), interval: crate::types::Interval::OneDay, bars, is_stale: false, source: "test".into() };
        let plan = TradePlan {
            id: "p1".into(),
            ticker: "X".into(),
            side: Side::Buy,
            trading_type: TradingType::Swing,
            quantity: 10,
            entry: 100.0,
            stop_loss: 95.0,
            target_1: 110.0,
            target_2: 120.0,
            risk_amount: 50.0,
            risk_reward_ratio: 2.0,
            capital_required: 1000.0,
            max_loss: 50.0,
            order_type: OrderType::Limit,
            product: Product::Delivery,
            status: PlanStatus::Draft,
            order_id: None,
            created_at: Utc::now(),
            warnings: Vec::new(),
        };
        let result = backtest_trade_plan(&plan, &series).unwrap();
        assert!(result.hit_stop_loss);
        assert!(result.pnl < 0.0);
    }
}
