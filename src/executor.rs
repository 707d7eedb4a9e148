//! TradeExecutor (spec §4.9): order placement, retry, and position lifecycle management.
//!
//! Grounded on `original_source/src/web/trade_executor.py`; retry/dry-run structure on the
//! teacher's `vault/trade_executor.rs`.

use crate::broker::{BrokerClient, OrderRequest};
use crate::errors::BrokerError;
use crate::trading_mode::TradingModeManager;
use crate::types::{OrderType, PendingPrediction, Position, Product, Side, TradePlan};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_price: Option<f64>,
    pub paper_trade: bool,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failure(error: impl Into<String>) -> Self {
        Self { success: false, order_id: None, filled_price: None, paper_trade: false, error: Some(error.into()) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Target1,
    Target2,
    Manual,
    /// Post-market forced close of an Intraday position (spec §4.11 DailyWorkflow cleanup).
    EndOfDayCleanup,
}

impl ExitReason {
    fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::Target1 => "TARGET_1",
            ExitReason::Target2 => "TARGET_2",
            ExitReason::Manual => "MANUAL",
            ExitReason::EndOfDayCleanup => "EOD_CLEANUP",
        }
    }
}

/// Callback invoked with `(realized_pnl, ticker)` on every successful SELL (spec §4.9 feedback
/// hook); the AutoTrader wires this to its circuit-breaker bookkeeping.
pub type PnlCallback = Box<dyn Fn(f64, &str) + Send + Sync>;

/// One exit attempted by `check_and_exit_positions`, naming which position and which trigger it
/// was so the caller can update its own position store (`target_1_hit`) on success.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    pub ticker: String,
    pub reason: ExitReason,
    pub result: ExecutionResult,
}

pub struct TradeExecutor {
    broker: Arc<dyn BrokerClient>,
    trading_mode: Arc<TradingModeManager>,
    pending_predictions: Mutex<VecDeque<PendingPrediction>>,
    on_pnl: Option<PnlCallback>,
}

impl TradeExecutor {
    pub fn new(broker: Arc<dyn BrokerClient>, trading_mode: Arc<TradingModeManager>, on_pnl: Option<PnlCallback>) -> Self {
        Self { broker, trading_mode, pending_predictions: Mutex::new(VecDeque::new()), on_pnl }
    }

    /// `ExecuteBuy` (spec §4.9). Enqueues a `PendingPrediction` on success so the model that
    /// produced this trade can later be scored against its realized outcome.
    pub async fn execute_buy(&self, plan: &TradePlan, model_id: &str, probability: f64) -> ExecutionResult {
        if plan.quantity == 0 {
            return ExecutionResult::failure(format!("invalid quantity: {}", plan.quantity));
        }

        let result = if self.trading_mode.is_paper_mode() {
            info!("[PAPER TRADE] BUY {} {} @ {}", plan.quantity, plan.ticker, plan.entry);
            self.simulate_order()
        } else {
            let request = OrderRequest {
                ticker: plan.ticker.clone(),
                side: Side::Buy,
                quantity: plan.quantity,
                order_type: plan.order_type,
                product: plan.product,
                price: (plan.order_type == OrderType::Limit).then_some(plan.entry),
                trigger_price: None,
            };
            self.execute_with_retry(request).await
        };

        if result.success {
            self.pending_predictions.lock().push_back(PendingPrediction {
                model_id: model_id.to_string(),
                ticker: plan.ticker.clone(),
                probability,
                entry_price: plan.entry,
                ts: Utc::now(),
            });
        }
        result
    }

    /// `ExecuteSell` (spec §4.9). `quantity` defaults to the full position when `None`.
    pub async fn execute_sell(&self, position: &Position, quantity: Option<i64>, reason: ExitReason) -> ExecutionResult {
        let qty = quantity.unwrap_or(position.quantity);
        if qty <= 0 || qty > position.quantity {
            return ExecutionResult::failure(format!("invalid quantity: {qty} (position: {})", position.quantity));
        }

        let result = if self.trading_mode.is_paper_mode() {
            info!("[PAPER TRADE] SELL {} {} @ {} ({})", qty, position.ticker, position.current_price, reason.as_str());
            self.simulate_order()
        } else {
            let request = OrderRequest {
                ticker: position.ticker.clone(),
                side: Side::Sell,
                quantity: qty as u64,
                order_type: OrderType::Market,
                product: position.product,
                price: None,
                trigger_price: None,
            };
            self.execute_with_retry(request).await
        };

        if result.success {
            self.resolve_feedback(position, qty);
        }
        result
    }

    /// Resolves the oldest still-open `PendingPrediction` for this ticker and invokes the P&L
    /// callback with `(sell_price - avg_buy_price) * quantity` (spec §4.9).
    fn resolve_feedback(&self, position: &Position, quantity: i64) {
        let sell_price = position.current_price;
        if sell_price <= 0.0 {
            return;
        }

        {
            let mut pending = self.pending_predictions.lock();
            if let Some(idx) = pending.iter().position(|p| p.ticker == position.ticker) {
                pending.remove(idx);
            }
        }

        if position.average_price > 0.0 {
            let realized_pnl = (sell_price - position.average_price) * quantity as f64;
            if let Some(callback) = &self.on_pnl {
                callback(realized_pnl, &position.ticker);
            }
        }
    }

    /// `UpdateStopLoss` (spec §4.9).
    pub async fn update_stop_loss(&self, order_id: &str, new_stop: f64) -> ExecutionResult {
        if self.trading_mode.is_paper_mode() {
            info!("[PAPER TRADE] update stop-loss for order {order_id} to {new_stop}");
            return ExecutionResult {
                success: true,
                order_id: Some(order_id.to_string()),
                filled_price: None,
                paper_trade: true,
                error: None,
            };
        }

        match self.broker.modify_order(order_id, new_stop).await {
            Ok(ack) => {
                info!("updated stop-loss for order {order_id} to {new_stop}");
                ExecutionResult { success: true, order_id: Some(ack.order_id), filled_price: ack.filled_price, paper_trade: false, error: None }
            }
            Err(e) => {
                error!("error updating stop-loss for {order_id}: {e}");
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    /// `CheckAndExitPositions` (spec §4.9): target-1 scales out 50%, target-2 exits the
    /// remainder, a stop-loss breach exits in full. Stop-loss is checked before targets so a gap
    /// through both in one tick books the loss rather than the win.
    ///
    /// Returns one `ExitOutcome` per exit attempted, since `Position` here is a read-only
    /// snapshot — a successful `Target1` outcome is the caller's signal to persist
    /// `target_1_hit` on its position store so the next tick doesn't scale out again.
    pub async fn check_and_exit_positions(&self, positions: &[Position]) -> Vec<ExitOutcome> {
        let mut results = Vec::new();

        for position in positions {
            if position.current_price <= 0.0 || position.average_price <= 0.0 {
                continue;
            }

            if position.stop_loss > 0.0 && position.current_price <= position.stop_loss {
                info!("stop-loss triggered for {} @ {}", position.ticker, position.current_price);
                let result = self.execute_sell(position, None, ExitReason::StopLoss).await;
                results.push(ExitOutcome { ticker: position.ticker.clone(), reason: ExitReason::StopLoss, result });
                continue;
            }

            if position.target_1 > 0.0 && position.current_price >= position.target_1 && !position.target_1_hit {
                info!("target 1 hit for {} @ {}", position.ticker, position.current_price);
                let result = self.execute_sell(position, Some(position.quantity / 2), ExitReason::Target1).await;
                results.push(ExitOutcome { ticker: position.ticker.clone(), reason: ExitReason::Target1, result });
            }

            if position.target_2 > 0.0 && position.current_price >= position.target_2 {
                info!("target 2 hit for {} @ {}", position.ticker, position.current_price);
                let result = self.execute_sell(position, None, ExitReason::Target2).await;
                results.push(ExitOutcome { ticker: position.ticker.clone(), reason: ExitReason::Target2, result });
            }
        }

        results
    }

    fn simulate_order(&self) -> ExecutionResult {
        ExecutionResult {
            success: true,
            order_id: Some(format!("PAPER_{}", Utc::now().timestamp_millis())),
            filled_price: None,
            paper_trade: true,
            error: None,
        }
    }

    /// Linear backoff (`delay * attempt`); hard errors (auth failure, rejected order) are never
    /// retried since a retry cannot change their outcome.
    async fn execute_with_retry(&self, request: OrderRequest) -> ExecutionResult {
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            match self.broker.place_order(request.clone()).await {
                Ok(ack) => {
                    info!("order executed: {:?} {} {} ({:?})", request.side, request.quantity, request.ticker, request.order_type);
                    return ExecutionResult {
                        success: true,
                        order_id: Some(ack.order_id),
                        filled_price: ack.filled_price,
                        paper_trade: false,
                        error: None,
                    };
                }
                Err(e @ BrokerError::AuthFailure(_)) | Err(e @ BrokerError::OrderRejected(_)) => {
                    error!("order failed, not retrying: {e}");
                    return ExecutionResult::failure(e.to_string());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("order failed (attempt {attempt}/{MAX_RETRIES}): {last_error}");
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(std::time::Duration::from_secs(RETRY_DELAY_SECS * attempt as u64)).await;
                    }
                }
            }
        }

        ExecutionResult::failure(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_mode::TradingMode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubBroker {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl BrokerClient for StubBroker {
        async fn place_order(&self, _request: OrderRequest) -> Result<crate::broker::BrokerOrderAck, BrokerError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(BrokerError::Transient("timeout".into()))
            } else {
                Ok(crate::broker::BrokerOrderAck { order_id: "ORD1".into(), filled_price: Some(100.0) })
            }
        }

        async fn modify_order(&self, order_id: &str, _new_trigger_price: f64) -> Result<crate::broker::BrokerOrderAck, BrokerError> {
            Ok(crate::broker::BrokerOrderAck { order_id: order_id.to_string(), filled_price: None })
        }
    }

    fn plan() -> TradePlan {
        TradePlan {
            id: "p1".into(),
            ticker: "X.NS".into(),
            side: Side::Buy,
            trading_type: crate::types::TradingType::Swing,
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
            status: crate::types::PlanStatus::Draft,
            order_id: None,
            created_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn paper_mode_simulates_buy_without_calling_broker() {
        let broker = Arc::new(StubBroker { fail_times: AtomicU32::new(0) });
        let mode = Arc::new(TradingModeManager::new());
        let executor = TradeExecutor::new(broker, mode, None);
        let result = executor.execute_buy(&plan(), "model-1", 0.7).await;
        assert!(result.success);
        assert!(result.paper_trade);
        assert!(result.order_id.unwrap().starts_with("PAPER_"));
    }

    #[tokio::test]
    async fn live_mode_retries_transient_failures_then_succeeds() {
        let broker = Arc::new(StubBroker { fail_times: AtomicU32::new(2) });
        let mode = Arc::new(TradingModeManager::new());
        mode.set_mode(TradingMode::Live, true);
        let executor = TradeExecutor::new(broker, mode, None);
        let result = executor.execute_buy(&plan(), "model-1", 0.7).await;
        assert!(result.success);
        assert_eq!(result.order_id.unwrap(), "ORD1");
    }

    #[tokio::test]
    async fn target_1_hit_scales_out_half_position() {
        let broker = Arc::new(StubBroker { fail_times: AtomicU32::new(0) });
        let mode = Arc::new(TradingModeManager::new());
        let executor = TradeExecutor::new(broker, mode, None);
        let position = Position {
            ticker: "X.NS".into(),
            quantity: 10,
            average_price: 100.0,
            current_price: 111.0,
            product: Product::Delivery,
            entry_ts: Utc::now(),
            stop_loss: 95.0,
            target_1: 110.0,
            target_2: 130.0,
            target_1_hit: false,
        };
        let results = executor.check_and_exit_positions(&[position]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].reason, ExitReason::Target1);
        assert_eq!(results[0].ticker, "X.NS");
        assert!(results[0].result.success);
    }

    #[tokio::test]
    async fn pnl_callback_fires_with_realized_gain_on_sell() {
        let broker = Arc::new(StubBroker { fail_times: AtomicU32::new(0) });
        let mode = Arc::new(TradingModeManager::new());
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let executor =
            TradeExecutor::new(broker, mode, Some(Box::new(move |pnl, ticker| { *seen_clone.lock() = Some((pnl, ticker.to_string())); })));
        let position = Position {
            ticker: "X.NS".into(),
            quantity: 10,
            average_price: 100.0,
            current_price: 105.0,
            product: Product::Delivery,
            entry_ts: Utc::now(),
            stop_loss: 95.0,
            target_1: 0.0,
            target_2: 0.0,
            target_1_hit: false,
        };
        executor.execute_sell(&position, None, ExitReason::Manual).await;
        let recorded = seen.lock().clone().unwrap();
        assert!((recorded.0 - 50.0).abs() < 1e-9);
        assert_eq!(recorded.1, "X.NS");
    }
}
