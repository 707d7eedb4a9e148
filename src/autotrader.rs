//! AutoTrader (spec §4.10): the conductor loop. Scans a watchlist, applies the confidence,
//! cooldown, and circuit-breaker gates, and hands passing signals to `RiskManager` then
//! `TradeExecutor`.
//!
//! Grounded on `original_source/src/web/auto_trader.py::AutoTrader`. Signal generation (ELITE
//! multi-timeframe vs quant-strategy path) is injected via `SignalProvider` rather than hardcoded
//! here, since that choice belongs to whichever caller wires `mtf.rs`/`strategies::StrategyManager`
//! together — this module only needs a signal and a model id to attribute it to.

use crate::config::TradingConfig;
use crate::executor::{ExecutionResult, ExitReason, TradeExecutor};
use crate::risk::RiskManager;
use crate::strategies::RegimeType;
use crate::types::{CircuitBreakerState, OrderType, PlanStatus, Position, Product, Side, Signal, SignalKind, TradePlan};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait SignalProvider: Send + Sync {
    async fn generate_signal(&self, ticker: &str) -> Option<GeneratedSignal>;
}

pub struct GeneratedSignal {
    pub signal: Signal,
    pub model_id: String,
    pub regime: Option<RegimeType>,
}

#[async_trait]
pub trait AccuracyProvider: Send + Sync {
    /// Rolling 30-day accuracy and evaluated-sample count for `model_id`. HOLD predictions are
    /// never scored, so the count reflects resolved BUY/SELL outcomes only (spec §4.10's
    /// resolved-open-question convention).
    async fn accuracy_30d(&self, model_id: &str) -> Option<(f64, u32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

#[derive(Debug, Default)]
pub struct ScanSummary {
    pub signals_generated: u32,
    pub signals_executed: u32,
    pub signals_rejected: u32,
    pub rejections: Vec<(String, String)>,
}

pub struct AutoTrader {
    config: TradingConfig,
    risk: RiskManager,
    executor: Arc<TradeExecutor>,
    signal_provider: Arc<dyn SignalProvider>,
    accuracy: Arc<dyn AccuracyProvider>,
    model_id_for_threshold: String,
    running: AtomicBool,
    scan_lock: Mutex<()>,
    breaker: Mutex<CircuitBreakerState>,
    ticker_cooldown: Mutex<HashMap<String, DateTime<Utc>>>,
    cooldown_path: PathBuf,
}

impl AutoTrader {
    pub fn new(
        config: TradingConfig,
        risk: RiskManager,
        executor: Arc<TradeExecutor>,
        signal_provider: Arc<dyn SignalProvider>,
        accuracy: Arc<dyn AccuracyProvider>,
        model_id_for_threshold: impl Into<String>,
        cooldown_path: impl Into<PathBuf>,
    ) -> Self {
        let cooldown_path = cooldown_path.into();
        let ticker_cooldown = load_cooldown(&cooldown_path).unwrap_or_default();
        Self {
            config,
            risk,
            executor,
            signal_provider,
            accuracy,
            model_id_for_threshold: model_id_for_threshold.into(),
            running: AtomicBool::new(false),
            scan_lock: Mutex::new(()),
            breaker: Mutex::new(CircuitBreakerState::default()),
            ticker_cooldown: Mutex::new(ticker_cooldown),
            cooldown_path,
        }
    }

    /// Exposes the underlying executor for callers (e.g. the post-market cleanup job) that need
    /// to act on positions outside the normal signal-driven path.
    pub fn executor(&self) -> &Arc<TradeExecutor> {
        &self.executor
    }

    pub fn state(&self) -> RunState {
        if self.running.load(Ordering::SeqCst) {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("auto trader is already running");
            return false;
        }
        info!("auto trader started");
        true
    }

    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("auto trader is not running");
            return false;
        }
        info!("auto trader stopped");
        true
    }

    fn is_ticker_in_cooldown(&self, ticker: &str) -> bool {
        if self.config.cooldown_hours_after_ticker_loss <= 0 {
            return false;
        }
        match self.ticker_cooldown.lock().get(ticker) {
            Some(last_loss) => {
                Utc::now() - *last_loss < chrono::Duration::hours(self.config.cooldown_hours_after_ticker_loss)
            }
            None => false,
        }
    }

    fn save_cooldown(&self) {
        let map = self.ticker_cooldown.lock();
        if let Some(parent) = self.cooldown_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string(&*map) {
            let tmp = self.cooldown_path.with_extension("json.tmp");
            if std::fs::write(&tmp, json).is_ok() {
                let _ = std::fs::rename(&tmp, &self.cooldown_path);
            }
        }
    }

    /// `update_pnl` (spec §4.10): accumulates daily P&L, tracks consecutive losses, and records
    /// a per-ticker cooldown timestamp on a loss.
    pub fn update_pnl(&self, pnl: f64, ticker: Option<&str>) {
        let mut breaker = self.breaker.lock();
        breaker.daily_pnl += pnl;
        if pnl < 0.0 {
            breaker.consecutive_losses += 1;
            if let Some(ticker) = ticker {
                if self.config.cooldown_hours_after_ticker_loss > 0 {
                    drop(breaker);
                    self.ticker_cooldown.lock().insert(ticker.to_string(), Utc::now());
                    self.save_cooldown();
                    return;
                }
            }
        } else {
            breaker.consecutive_losses = 0;
        }
    }

    pub fn reset_daily_pnl(&self) {
        self.breaker.lock().daily_pnl = 0.0;
        info!("daily P&L reset for new trading day");
    }

    pub fn reset_circuit_breaker(&self) {
        let mut breaker = self.breaker.lock();
        *breaker = CircuitBreakerState::default();
        info!("circuit breaker manually reset");
    }

    /// Evaluates every trigger condition and applies the cooldown-expiry transition (spec
    /// §4.10). Returns `true` when trading should be paused.
    async fn check_circuit_breaker(&self, portfolio_value: f64) -> bool {
        let mut breaker = self.breaker.lock();

        if breaker.triggered {
            if let Some(cooldown_end) = breaker.cooldown_end {
                if Utc::now() < cooldown_end {
                    return true;
                }
                info!("circuit breaker cooldown expired, resuming trading");
                breaker.triggered = false;
                breaker.triggered_at = None;
                breaker.cooldown_end = None;
                breaker.consecutive_losses = 0;
            }
        }

        let trip = |breaker: &mut CircuitBreakerState, reason: &str| {
            warn!("circuit breaker triggered: {reason}");
            breaker.triggered = true;
            breaker.triggered_at = Some(Utc::now());
            breaker.cooldown_end = Some(Utc::now() + chrono::Duration::minutes(self.config.cooldown_minutes));
        };

        if breaker.consecutive_losses >= self.config.max_consecutive_losses {
            trip(&mut breaker, &format!("{} consecutive losses", breaker.consecutive_losses));
            return true;
        }

        if portfolio_value > 0.0 && breaker.daily_pnl < 0.0 {
            let daily_loss_pct = breaker.daily_pnl.abs() / portfolio_value;
            if daily_loss_pct >= self.config.daily_loss_limit_pct {
                trip(&mut breaker, &format!("daily loss {:.2}% exceeds limit", daily_loss_pct * 100.0));
                return true;
            }
            if breaker.daily_pnl.abs() >= self.config.daily_loss_limit_amount {
                trip(&mut breaker, &format!("daily loss {:.2} exceeds amount limit", breaker.daily_pnl.abs()));
                return true;
            }
        }
        drop(breaker);

        if self.config.min_accuracy > 0.0 {
            if let Some((accuracy, evaluated)) = self.accuracy.accuracy_30d(&self.model_id_for_threshold).await {
                if evaluated >= 5 && accuracy < self.config.min_accuracy {
                    let mut breaker = self.breaker.lock();
                    trip(&mut breaker, &format!("30-day accuracy {:.1}% below minimum", accuracy * 100.0));
                    return true;
                }
            }
        }

        false
    }

    /// Regime-aware base threshold with an adaptive-accuracy floor (spec §4.10).
    async fn effective_confidence_threshold(&self, regime: Option<RegimeType>) -> f64 {
        let mut threshold = self.config.confidence_threshold;
        if self.config.use_regime_thresholds {
            threshold = match regime {
                Some(RegimeType::Ranging) => self.config.confidence_threshold_ranging,
                Some(RegimeType::StrongTrend) | Some(RegimeType::WeakTrend) => self.config.confidence_threshold_trending,
                _ => threshold,
            };
        }

        if self.config.use_adaptive_threshold {
            if let Some((accuracy, evaluated)) = self.accuracy.accuracy_30d(&self.model_id_for_threshold).await {
                if evaluated >= 5 && accuracy < 0.5 {
                    return threshold.max(self.config.adaptive_threshold_floor);
                }
            }
        }
        threshold
    }

    /// `scan_and_execute` (spec §4.10). Non-blocking: a scan already in progress returns `None`
    /// rather than queuing behind it.
    pub async fn scan_and_execute(
        &self,
        tickers: &[String],
        market_open: bool,
        current_positions: &[Position],
        portfolio_value: f64,
    ) -> Option<ScanSummary> {
        if !self.running.load(Ordering::SeqCst) {
            return None;
        }
        let _guard = self.scan_lock.try_lock()?;

        if !market_open {
            info!("market is closed, skipping scan");
            return Some(ScanSummary::default());
        }

        let mut summary = ScanSummary::default();
        info!("[AutoTrader] scanning {} tickers", tickers.len());

        for ticker in tickers {
            let Some(generated) = self.signal_provider.generate_signal(ticker).await else { continue };
            summary.signals_generated += 1;

            if self.check_circuit_breaker(portfolio_value).await {
                summary.signals_rejected += 1;
                summary.rejections.push((ticker.clone(), "circuit breaker active".to_string()));
                continue;
            }

            if self.is_ticker_in_cooldown(ticker) {
                summary.signals_rejected += 1;
                summary.rejections.push((ticker.clone(), "ticker in post-loss cooldown".to_string()));
                continue;
            }

            let threshold = self.effective_confidence_threshold(generated.regime).await;
            let should_exec = crate::mtf::should_execute(
                &signal_as_consensus_probability(&generated.signal),
                threshold,
            ) && generated.signal.confidence >= threshold;

            if !should_exec {
                summary.signals_rejected += 1;
                summary.rejections.push((ticker.clone(), "signal does not meet execution criteria".to_string()));
                continue;
            }

            match self.execute_signal(&generated, current_positions, portfolio_value).await {
                Ok(_) => summary.signals_executed += 1,
                Err(reason) => {
                    summary.signals_rejected += 1;
                    summary.rejections.push((ticker.clone(), reason));
                }
            }
        }

        info!(
            "[AutoTrader] scan complete: {} signals, {} executed, {} rejected",
            summary.signals_generated, summary.signals_executed, summary.signals_rejected
        );
        Some(summary)
    }

    async fn execute_signal(
        &self,
        generated: &GeneratedSignal,
        current_positions: &[Position],
        portfolio_value: f64,
    ) -> Result<ExecutionResult, String> {
        let signal = &generated.signal;

        if signal.kind.is_hold() {
            return Err("signal is HOLD".to_string());
        }

        if current_positions.len() >= self.config.max_open_positions {
            return Err(format!("maximum positions ({}) reached", self.config.max_open_positions));
        }

        if signal.kind.is_buy() {
            let risk_result = self.risk.check_auto_trade_risk(
                &signal.ticker,
                signal.current_price,
                signal.levels.stop_loss,
                signal.levels.entry,
                signal.levels.target_1,
                current_positions,
                portfolio_value,
            );
            if !risk_result.passed {
                return Err(format!("risk check failed: {}", risk_result.message));
            }

            let max_quantity: u64 =
                risk_result.details.get("max_quantity").and_then(|s| s.parse::<i64>().ok()).unwrap_or(0).max(0) as u64;
            if max_quantity == 0 {
                return Err("risk check produced zero quantity".to_string());
            }

            let plan = TradePlan {
                id: format!("{}_{}", signal.ticker, Utc::now().timestamp_millis()),
                ticker: signal.ticker.clone(),
                side: Side::Buy,
                trading_type: crate::types::TradingType::Intraday,
                quantity: max_quantity,
                entry: signal.levels.entry,
                stop_loss: signal.levels.stop_loss,
                target_1: signal.levels.target_1,
                target_2: signal.levels.target_2,
                risk_amount: risk_result.details.get("max_risk_amount").and_then(|s| s.parse().ok()).unwrap_or(0.0),
                risk_reward_ratio: 0.0,
                capital_required: signal.levels.entry * max_quantity as f64,
                max_loss: 0.0,
                order_type: OrderType::Market,
                product: Product::Intraday,
                status: PlanStatus::Approved,
                order_id: None,
                created_at: Utc::now(),
                warnings: Vec::new(),
            };

            let result = self.executor.execute_buy(&plan, &generated.model_id, signal.probability).await;
            if result.success {
                Ok(result)
            } else {
                Err(result.error.unwrap_or_else(|| "execution failed".to_string()))
            }
        } else {
            let Some(position) = current_positions.iter().find(|p| p.ticker == signal.ticker) else {
                return Err(format!("no open position for SELL ({})", signal.ticker));
            };
            let result = self.executor.execute_sell(position, None, ExitReason::Manual).await;
            if result.success {
                Ok(result)
            } else {
                Err(result.error.unwrap_or_else(|| "execution failed".to_string()))
            }
        }
    }
}

fn signal_as_consensus_probability(signal: &Signal) -> crate::mtf::ConsensusSignal {
    crate::mtf::ConsensusSignal {
        ticker: signal.ticker.clone(),
        consensus: signal.kind,
        probability: signal.probability,
        confidence: signal.confidence,
        levels: signal.levels,
        current_price: signal.current_price,
        timeframe_weights: HashMap::new(),
    }
}

fn load_cooldown(path: &PathBuf) -> Option<HashMap<String, DateTime<Utc>>> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, BrokerOrderAck, OrderRequest};
    use crate::errors::BrokerError;
    use crate::trading_mode::TradingModeManager;
    use crate::types::Levels;
    use async_trait::async_trait as at;

    struct StubBroker;
    #[at]
    impl BrokerClient for StubBroker {
        async fn place_order(&self, _r: OrderRequest) -> Result<BrokerOrderAck, BrokerError> {
            Ok(BrokerOrderAck { order_id: "ORD1".into(), filled_price: Some(100.0) })
        }
        async fn modify_order(&self, order_id: &str, _p: f64) -> Result<BrokerOrderAck, BrokerError> {
            Ok(BrokerOrderAck { order_id: order_id.to_string(), filled_price: None })
        }
    }

    struct StubSignals {
        kind: SignalKind,
    }
    #[at]
    impl SignalProvider for StubSignals {
        async fn generate_signal(&self, ticker: &str) -> Option<GeneratedSignal> {
            Some(GeneratedSignal {
                signal: Signal {
                    ticker: ticker.to_string(),
                    timeframe: crate::types::Interval::FiveMinute,
                    kind: self.kind,
                    probability: 0.8,
                    confidence: 0.8,
                    levels: Levels { entry: 100.0, stop_loss: 95.0, target_1: 110.0, target_2: 120.0 },
                    current_price: 100.0,
                    ts: Utc::now(),
                    filtered_reason: None,
                },
                model_id: "test-model".to_string(),
                regime: None,
            })
        }
    }

    struct StubAccuracy;
    #[at]
    impl AccuracyProvider for StubAccuracy {
        async fn accuracy_30d(&self, _model_id: &str) -> Option<(f64, u32)> {
            Some((0.8, 20))
        }
    }

    fn build_trader(kind: SignalKind, cooldown_path: std::path::PathBuf) -> AutoTrader {
        let executor = Arc::new(TradeExecutor::new(Arc::new(StubBroker), Arc::new(TradingModeManager::new()), None));
        AutoTrader::new(
            TradingConfig::default(),
            RiskManager::new(TradingConfig::default()),
            executor,
            Arc::new(StubSignals { kind }),
            Arc::new(StubAccuracy),
            "test-model",
            cooldown_path,
        )
    }

    #[tokio::test]
    async fn stopped_trader_does_not_scan() {
        let dir = tempfile::tempdir().unwrap();
        let trader = build_trader(SignalKind::BUY, dir.path().join("cooldown.json"));
        let result = trader.scan_and_execute(&["X.NS".to_string()], true, &[], 100_000.0).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn running_trader_executes_buy_signal() {
        let dir = tempfile::tempdir().unwrap();
        let trader = build_trader(SignalKind::STRONG_BUY, dir.path().join("cooldown.json"));
        trader.start();
        let summary = trader.scan_and_execute(&["X.NS".to_string()], true, &[], 100_000.0).await.unwrap();
        assert_eq!(summary.signals_generated, 1);
        assert_eq!(summary.signals_executed, 1);
    }

    #[tokio::test]
    async fn circuit_breaker_blocks_after_consecutive_losses() {
        let dir = tempfile::tempdir().unwrap();
        let trader = build_trader(SignalKind::STRONG_BUY, dir.path().join("cooldown.json"));
        trader.start();
        for _ in 0..5 {
            trader.update_pnl(-100.0, Some("X.NS"));
        }
        let summary = trader.scan_and_execute(&["Y.NS".to_string()], true, &[], 100_000.0).await.unwrap();
        assert_eq!(summary.signals_executed, 0);
        assert!(summary.rejections.iter().any(|(_, reason)| reason.contains("circuit breaker")));
    }

    #[tokio::test]
    async fn daily_loss_limit_trips_breaker_and_rejects_subsequent_buys() {
        let dir = tempfile::tempdir().unwrap();
        let trader = build_trader(SignalKind::STRONG_BUY, dir.path().join("cooldown.json"));
        trader.start();
        trader.update_pnl(-11_000.0, None);
        let summary = trader.scan_and_execute(&["X.NS".to_string()], true, &[], 100_000.0).await.unwrap();
        assert_eq!(summary.signals_executed, 0);
        assert!(summary.rejections.iter().any(|(_, reason)| reason.contains("circuit breaker")));
    }

    #[tokio::test]
    async fn ticker_in_post_loss_cooldown_is_rejected_others_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let trader = build_trader(SignalKind::STRONG_BUY, dir.path().join("cooldown.json"));
        trader.start();
        trader.update_pnl(-100.0, Some("RELIANCE.NS"));
        let summary = trader
            .scan_and_execute(&["RELIANCE.NS".to_string(), "INFY.NS".to_string()], true, &[], 100_000.0)
            .await
            .unwrap();
        assert!(summary.rejections.iter().any(|(t, reason)| t == "RELIANCE.NS" && reason.contains("cooldown")));
        assert!(!summary.rejections.iter().any(|(t, _)| t == "INFY.NS"));
        assert_eq!(summary.signals_executed, 1);
    }

    #[tokio::test]
    async fn market_closed_skips_scan_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let trader = build_trader(SignalKind::STRONG_BUY, dir.path().join("cooldown.json"));
        trader.start();
        let summary = trader.scan_and_execute(&["X.NS".to_string()], false, &[], 100_000.0).await.unwrap();
        assert_eq!(summary.signals_generated, 0);
    }
}
