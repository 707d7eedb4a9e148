//! Portfolio risk management (spec §4.8): pre-trade and pre-execution guardrails layered on
//! top of a single trade plan's own `validate` check.
//!
//! Grounded on `original_source/src/web/risk_manager.py`'s `PortfolioRiskManager`.

use crate::config::TradingConfig;
use crate::types::{Position, TradePlan};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mirrors the original's `RiskCheckResult`: a pass/fail verdict, a human-readable summary, and
/// a details map for callers (CLI output, logs) that want the individual numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub message: String,
    pub details: HashMap<String, String>,
}

impl RiskCheckResult {
    fn ok(message: impl Into<String>, details: HashMap<String, String>) -> Self {
        Self { passed: true, message: message.into(), details }
    }

    fn from_errors_warnings(errors: Vec<String>, warnings: Vec<String>, details: HashMap<String, String>) -> Self {
        let passed = errors.is_empty();
        let mut message = if passed { "risk check passed".to_string() } else { errors.join("; ") };
        if !warnings.is_empty() {
            message.push_str(" | warnings: ");
            message.push_str(&warnings.join("; "));
        }
        Self { passed, message, details }
    }
}

/// Sector membership for the advisory exposure check (spec §4.8 supplement). Not every ticker
/// needs an entry; unmapped tickers are simply excluded from sector totals.
pub type SectorMap = HashMap<String, String>;

pub struct RiskManager {
    config: TradingConfig,
}

impl RiskManager {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Portfolio-wide checks for adding `plan` given `existing_positions` and the account's
    /// total value.
    pub fn check_portfolio_risk(
        &self,
        plan: &TradePlan,
        existing_positions: &[Position],
        portfolio_value: f64,
    ) -> RiskCheckResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let position_size_pct = if portfolio_value > 0.0 { plan.capital_required / portfolio_value } else { 0.0 };
        if position_size_pct > self.config.max_position_size {
            errors.push(format!(
                "position size ({:.2}%) exceeds maximum ({:.2}%)",
                position_size_pct * 100.0,
                self.config.max_position_size * 100.0
            ));
        }

        if existing_positions.len() >= self.config.max_open_positions {
            errors.push(format!("maximum open positions ({}) already reached", self.config.max_open_positions));
        }

        let total_portfolio_risk: f64 = existing_positions.iter().map(|p| p.risk_amount()).sum::<f64>() + plan.risk_amount;
        let portfolio_risk_pct = if portfolio_value > 0.0 { total_portfolio_risk / portfolio_value } else { 0.0 };
        if portfolio_risk_pct > self.config.max_portfolio_risk {
            errors.push(format!(
                "portfolio risk ({:.2}%) exceeds maximum ({:.2}%)",
                portfolio_risk_pct * 100.0,
                self.config.max_portfolio_risk * 100.0
            ));
        }

        let daily_risk_pct = if portfolio_value > 0.0 { plan.risk_amount / portfolio_value } else { 0.0 };
        if daily_risk_pct > self.config.max_daily_risk {
            warnings.push(format!(
                "daily risk ({:.2}%) exceeds recommended limit ({:.2}%)",
                daily_risk_pct * 100.0,
                self.config.max_daily_risk * 100.0
            ));
        }

        let mut symbol_counts: HashMap<&str, u32> = HashMap::new();
        for pos in existing_positions {
            *symbol_counts.entry(pos.ticker.as_str()).or_insert(0) += 1;
        }
        for (symbol, count) in &symbol_counts {
            if *count >= 3 {
                warnings.push(format!("multiple positions in {symbol} ({count}); consider diversification"));
            }
        }

        let details = HashMap::from([
            ("position_size_pct".to_string(), position_size_pct.to_string()),
            ("portfolio_risk_pct".to_string(), portfolio_risk_pct.to_string()),
            ("daily_risk_pct".to_string(), daily_risk_pct.to_string()),
            ("open_positions".to_string(), existing_positions.len().to_string()),
        ]);
        RiskCheckResult::from_errors_warnings(errors, warnings, details)
    }

    /// Correlation advisory (spec §4.8 supplement): the original treats this as "simplified",
    /// flagging same-symbol concentration rather than computing a real correlation matrix.
    pub fn check_correlation_risk(&self, new_symbol: &str, existing_positions: &[Position]) -> RiskCheckResult {
        let existing_count = existing_positions.iter().filter(|p| p.ticker == new_symbol).count();
        if existing_count > 0 {
            RiskCheckResult::ok(
                format!("already have a position in {new_symbol}; consider consolidating"),
                HashMap::from([("existing_count".to_string(), existing_count.to_string())]),
            )
        } else {
            RiskCheckResult::ok("no correlation risk detected", HashMap::new())
        }
    }

    /// Sector exposure advisory (spec §4.8 supplement). Unmapped tickers don't contribute to
    /// either side of the ratio, so exposure is only ever tracked among classified symbols.
    pub fn check_sector_exposure(
        &self,
        new_symbol: &str,
        plan_capital: f64,
        existing_positions: &[Position],
        portfolio_value: f64,
        sectors: &SectorMap,
        max_sector_exposure: f64,
    ) -> RiskCheckResult {
        let Some(sector) = sectors.get(new_symbol) else {
            return RiskCheckResult::ok("symbol has no sector classification; exposure check skipped", HashMap::new());
        };

        let existing_sector_capital: f64 = existing_positions
            .iter()
            .filter(|p| sectors.get(&p.ticker) == Some(sector))
            .map(|p| p.average_price * p.quantity.unsigned_abs() as f64)
            .sum();

        let sector_exposure_pct =
            if portfolio_value > 0.0 { (existing_sector_capital + plan_capital) / portfolio_value } else { 0.0 };

        let details = HashMap::from([
            ("sector".to_string(), sector.clone()),
            ("sector_exposure_pct".to_string(), sector_exposure_pct.to_string()),
        ]);

        if sector_exposure_pct > max_sector_exposure {
            RiskCheckResult {
                passed: false,
                message: format!(
                    "sector exposure to {sector} ({:.2}%) would exceed maximum ({:.2}%)",
                    sector_exposure_pct * 100.0,
                    max_sector_exposure * 100.0
                ),
                details,
            }
        } else {
            RiskCheckResult::ok(format!("sector exposure to {sector} within limits"), details)
        }
    }

    /// Comprehensive pre-approval validation, combining the portfolio/correlation/sector checks.
    pub fn validate_trade_plan_risk(
        &self,
        plan: &TradePlan,
        existing_positions: &[Position],
        portfolio_value: f64,
        sectors: &SectorMap,
    ) -> RiskCheckResult {
        let portfolio_check = self.check_portfolio_risk(plan, existing_positions, portfolio_value);
        let correlation_check = self.check_correlation_risk(&plan.ticker, existing_positions);
        let sector_check =
            self.check_sector_exposure(&plan.ticker, plan.capital_required, existing_positions, portfolio_value, sectors, 0.40);

        let passed = portfolio_check.passed && correlation_check.passed && sector_check.passed;
        let mut message = portfolio_check.message.clone();
        if !correlation_check.passed {
            message.push_str(&format!(" | {}", correlation_check.message));
        }
        if !sector_check.passed {
            message.push_str(&format!(" | {}", sector_check.message));
        }

        let mut details = HashMap::new();
        details.extend(portfolio_check.details.iter().map(|(k, v)| (format!("portfolio.{k}"), v.clone())));
        details.extend(correlation_check.details.iter().map(|(k, v)| (format!("correlation.{k}"), v.clone())));
        details.extend(sector_check.details.iter().map(|(k, v)| (format!("sector.{k}"), v.clone())));

        RiskCheckResult { passed, message, details }
    }

    /// Pre-execution risk gate for the autotrader's scan loop (spec §4.8/§4.10): checks that the
    /// proposed entry/stop/targets are sane and that the resulting position would not blow past
    /// any portfolio limit, independent of whatever `TradePlanner::validate` already did.
    pub fn check_auto_trade_risk(
        &self,
        ticker: &str,
        current_price: f64,
        stop_loss: f64,
        entry_level: f64,
        target_1: f64,
        current_positions: &[Position],
        portfolio_value: f64,
    ) -> RiskCheckResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if current_price <= 0.0 {
            errors.push(format!("invalid current price: {current_price}"));
        }
        if stop_loss <= 0.0 {
            errors.push(format!("invalid stop-loss: {stop_loss}"));
        }
        if entry_level <= 0.0 {
            errors.push(format!("invalid entry level: {entry_level}"));
        }

        let risk_per_share = (entry_level - stop_loss).abs();
        if risk_per_share == 0.0 {
            errors.push("stop-loss equals entry price; no risk defined".to_string());
        }

        let max_risk_amount = portfolio_value * self.config.max_risk_per_trade;
        let max_quantity = if risk_per_share > 0.0 { (max_risk_amount / risk_per_share) as i64 } else { 0 };
        if max_quantity < 1 {
            errors.push(format!("calculated quantity ({max_quantity}) below minimum lot size (1)"));
        }

        let estimated_capital = entry_level * max_quantity.max(0) as f64;
        let position_size_pct = if portfolio_value > 0.0 { estimated_capital / portfolio_value } else { 0.0 };
        if position_size_pct > self.config.max_position_size {
            errors.push(format!(
                "position size ({:.2}%) exceeds maximum ({:.2}%)",
                position_size_pct * 100.0,
                self.config.max_position_size * 100.0
            ));
        }

        if current_positions.len() >= self.config.max_open_positions {
            errors.push(format!("maximum open positions ({}) already reached", self.config.max_open_positions));
        }

        let daily_risk_pct = if portfolio_value > 0.0 { max_risk_amount / portfolio_value } else { 0.0 };
        if daily_risk_pct > self.config.max_daily_risk {
            warnings.push(format!(
                "daily risk ({:.2}%) exceeds recommended limit ({:.2}%)",
                daily_risk_pct * 100.0,
                self.config.max_daily_risk * 100.0
            ));
        }

        let stop_loss_pct = if entry_level > 0.0 { risk_per_share / entry_level } else { 0.0 };
        if stop_loss_pct < 0.005 {
            warnings.push(format!("stop-loss is very tight ({:.2}%)", stop_loss_pct * 100.0));
        } else if stop_loss_pct > 0.10 {
            warnings.push(format!("stop-loss is very wide ({:.2}%)", stop_loss_pct * 100.0));
        }

        if target_1 > 0.0 && risk_per_share > 0.0 {
            let reward_per_share = (target_1 - entry_level).abs();
            let risk_reward_ratio = reward_per_share / risk_per_share;
            if risk_reward_ratio < self.config.min_risk_reward_ratio {
                warnings.push(format!(
                    "risk-reward ratio ({risk_reward_ratio:.2}) below minimum ({})",
                    self.config.min_risk_reward_ratio
                ));
            }
        }

        if current_positions.iter().any(|p| p.ticker == ticker) {
            errors.push(format!("already have a position in {ticker}"));
        }

        let details = HashMap::from([
            ("risk_per_share".to_string(), risk_per_share.to_string()),
            ("max_risk_amount".to_string(), max_risk_amount.to_string()),
            ("max_quantity".to_string(), max_quantity.to_string()),
            ("position_size_pct".to_string(), position_size_pct.to_string()),
            ("daily_risk_pct".to_string(), daily_risk_pct.to_string()),
            ("stop_loss_pct".to_string(), stop_loss_pct.to_string()),
        ]);
        RiskCheckResult::from_errors_warnings(errors, warnings, details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(ticker: &str, qty: i64, avg: f64, stop: f64, product: crate::types::Product) -> Position {
        Position {
            ticker: ticker.to_string(),
            quantity: qty,
            average_price: avg,
            current_price: avg,
            product,
            entry_ts: Utc::now(),
            stop_loss: stop,
            target_1: avg * 1.05,
            target_2: avg * 1.10,
            target_1_hit: false,
        }
    }

    fn plan(ticker: &str, capital_required: f64, risk_amount: f64) -> TradePlan {
        TradePlan {
            id: "p1".into(),
            ticker: ticker.to_string(),
            side: crate::types::Side::Buy,
            trading_type: crate::types::TradingType::Swing,
            quantity: 10,
            entry: 100.0,
            stop_loss: 95.0,
            target_1: 110.0,
            target_2: 120.0,
            risk_amount,
            risk_reward_ratio: 2.0,
            capital_required,
            max_loss: risk_amount,
            order_type: crate::types::OrderType::Limit,
            product: crate::types::Product::Delivery,
            status: crate::types::PlanStatus::Draft,
            order_id: None,
            created_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn oversized_position_is_rejected() {
        let manager = RiskManager::new(TradingConfig::default());
        let result = manager.check_portfolio_risk(&plan("X.NS", 30_000.0, 1_000.0), &[], 100_000.0);
        assert!(!result.passed);
    }

    #[test]
    fn too_many_open_positions_is_rejected() {
        let manager = RiskManager::new(TradingConfig::default());
        let positions: Vec<Position> =
            (0..10).map(|i| position(&format!("T{i}.NS"), 10, 100.0, 95.0, crate::types::Product::Delivery)).collect();
        let result = manager.check_portfolio_risk(&plan("NEW.NS", 1_000.0, 100.0), &positions, 1_000_000.0);
        assert!(!result.passed);
    }

    #[test]
    fn existing_symbol_position_flags_correlation_advisory() {
        let manager = RiskManager::new(TradingConfig::default());
        let positions = vec![position("RELIANCE.NS", 10, 2400.0, 2350.0, crate::types::Product::Delivery)];
        let result = manager.check_correlation_risk("RELIANCE.NS", &positions);
        assert!(result.passed);
        assert!(result.message.contains("consolidating"));
    }

    #[test]
    fn auto_trade_risk_rejects_zero_risk_per_share() {
        let manager = RiskManager::new(TradingConfig::default());
        let result = manager.check_auto_trade_risk("X.NS", 100.0, 100.0, 100.0, 110.0, &[], 100_000.0);
        assert!(!result.passed);
    }

    #[test]
    fn auto_trade_risk_passes_for_reasonable_setup() {
        // position_size_pct = max_risk_per_trade * entry / risk_per_share = 0.02 * 100 / 10 = 20%,
        // right at (not over) the default max_position_size cap.
        let manager = RiskManager::new(TradingConfig::default());
        let result = manager.check_auto_trade_risk("X.NS", 100.0, 90.0, 100.0, 110.0, &[], 100_000.0);
        assert!(result.passed);
    }

    #[test]
    fn sector_exposure_blocks_when_limit_would_be_exceeded() {
        let manager = RiskManager::new(TradingConfig::default());
        let sectors: SectorMap =
            HashMap::from([("A.NS".to_string(), "Energy".to_string()), ("B.NS".to_string(), "Energy".to_string())]);
        let positions = vec![position("A.NS", 100, 350.0, 340.0, crate::types::Product::Delivery)];
        let result = manager.check_sector_exposure("B.NS", 10_000.0, &positions, 100_000.0, &sectors, 0.40);
        assert!(!result.passed);
    }
}
