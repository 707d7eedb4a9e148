//! Scheduler + DailyWorkflow (spec §4.11): market-hours-aware job runner plus the
//! pre-market/market-hours/post-market orchestration built on top of it.
//!
//! Grounded on `original_source/src/web/market_hours.py::MarketHoursManager`,
//! `trading_scheduler.py::TradingScheduler`, and `daily_workflow.py::DailyWorkflowManager`. The
//! threading + `Event.wait(timeout=...)` cooperative-stop idiom in the original becomes a
//! tokio-spawned loop that re-checks a shared `AtomicBool` between short sleeps, mirroring the
//! `tokio::spawn`-per-loop style the teacher uses in `vault/engine.rs`.

use crate::autotrader::{AutoTrader, SignalProvider};
use crate::executor::ExitReason;
use crate::types::{Position, Product};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

fn market_open_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 15, 0).unwrap()
}
fn market_close_time() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).unwrap()
}
fn pre_market_start_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}
fn post_market_end_time() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSession {
    PreMarket,
    Open,
    PostMarket,
    Closed,
    NonTradingDay,
}

#[derive(Debug, Clone, Copy)]
pub struct MarketStatus {
    pub session: MarketSession,
    pub is_open: bool,
    pub is_trading_day: bool,
}

/// `MarketHoursManager` (spec §4.11): trading-day + holiday-set + 09:15-15:30 IST session band.
pub struct MarketHoursManager {
    holidays: Mutex<HashSet<NaiveDate>>,
}

impl Default for MarketHoursManager {
    fn default() -> Self {
        Self { holidays: Mutex::new(HashSet::new()) }
    }
}

impl MarketHoursManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn as_ist(dt: Option<DateTime<Utc>>) -> chrono::DateTime<chrono_tz::Tz> {
        dt.unwrap_or_else(Utc::now).with_timezone(&Kolkata)
    }

    pub fn is_trading_day(&self, dt: Option<DateTime<Utc>>) -> bool {
        let ist = Self::as_ist(dt);
        if ist.weekday().num_days_from_monday() >= 5 {
            return false;
        }
        !self.holidays.lock().contains(&ist.date_naive())
    }

    pub fn is_market_open(&self, dt: Option<DateTime<Utc>>) -> bool {
        if !self.is_trading_day(dt) {
            return false;
        }
        let ist = Self::as_ist(dt);
        let t = ist.time();
        t >= market_open_time() && t <= market_close_time()
    }

    pub fn get_market_status(&self, dt: Option<DateTime<Utc>>) -> MarketStatus {
        if !self.is_trading_day(dt) {
            return MarketStatus { session: MarketSession::NonTradingDay, is_open: false, is_trading_day: false };
        }
        let ist = Self::as_ist(dt);
        let t = ist.time();

        let session = if t < pre_market_start_time() {
            MarketSession::Closed
        } else if t < market_open_time() {
            MarketSession::PreMarket
        } else if t <= market_close_time() {
            MarketSession::Open
        } else if t <= post_market_end_time() {
            MarketSession::PostMarket
        } else {
            MarketSession::Closed
        };

        MarketStatus { session, is_open: session == MarketSession::Open, is_trading_day: true }
    }

    /// Next market-open instant, searching up to 7 calendar days ahead.
    pub fn get_next_market_open(&self, dt: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let mut check_date = Self::as_ist(dt).date_naive();
        for _ in 0..7 {
            let candidate_ist = Kolkata.from_local_datetime(&check_date.and_time(market_open_time())).single()?;
            if self.is_trading_day(Some(candidate_ist.with_timezone(&Utc))) {
                return Some(candidate_ist.with_timezone(&Utc));
            }
            check_date = check_date.succ_opt()?;
        }
        None
    }

    pub fn add_holiday(&self, date: NaiveDate) {
        self.holidays.lock().insert(date);
        info!("added market holiday: {date}");
    }

    pub fn remove_holiday(&self, date: NaiveDate) {
        self.holidays.lock().remove(&date);
    }

    pub fn get_holidays(&self) -> Vec<NaiveDate> {
        let mut holidays: Vec<NaiveDate> = self.holidays.lock().iter().copied().collect();
        holidays.sort();
        holidays
    }
}

type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct JobSpec {
    func: Mutex<JobFn>,
    schedule_time: Option<NaiveTime>,
    interval_seconds: Option<u64>,
    market_hours_gated: bool,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

/// Sleeps in short increments so a stop request is observed within ~2 seconds instead of
/// blocking for the full duration. Returns `false` if the sleep was cut short by a stop.
async fn interruptible_sleep(running: &AtomicBool, total_secs: u64) -> bool {
    let mut remaining = total_secs;
    while remaining > 0 {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let chunk = remaining.min(2);
        tokio::time::sleep(std::time::Duration::from_secs(chunk)).await;
        remaining -= chunk;
    }
    running.load(Ordering::SeqCst)
}

/// Cooperative job runner (spec §4.11 Scheduler). Jobs register a `schedule_time` (run once daily
/// at that IST time) and/or an `interval_seconds` (recur at that cadence); `market_hours_gated`
/// jobs wait for the next open instead of firing while the market is closed.
pub struct Scheduler {
    market_hours: Arc<MarketHoursManager>,
    jobs: Mutex<HashMap<String, Arc<JobSpec>>>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(market_hours: Arc<MarketHoursManager>) -> Self {
        Self { market_hours, jobs: Mutex::new(HashMap::new()), running: Arc::new(AtomicBool::new(false)), handles: Mutex::new(Vec::new()) }
    }

    pub fn register_job(
        &self,
        name: impl Into<String>,
        func: JobFn,
        schedule_time: Option<NaiveTime>,
        interval_seconds: Option<u64>,
        market_hours_gated: bool,
    ) {
        let name = name.into();
        info!("registered job: {name} (time={schedule_time:?}, interval={interval_seconds:?}s)");
        self.jobs.lock().insert(
            name,
            Arc::new(JobSpec { func: Mutex::new(func), schedule_time, interval_seconds, market_hours_gated, last_run: Mutex::new(None) }),
        );
    }

    /// Overwrite an already-registered job's function without touching its schedule, mirroring
    /// the original's "update scheduler job functions" step in `start_daily_workflow`.
    pub fn set_job_func(&self, name: &str, func: JobFn) -> bool {
        match self.jobs.lock().get(name) {
            Some(spec) => {
                *spec.func.lock() = func;
                true
            }
            None => false,
        }
    }

    /// Takes `Arc<Self>` by value (rather than `&self`) since each job's background loop needs
    /// its own owned handle back to the scheduler; callers hold the scheduler behind an `Arc`
    /// and pass a clone in.
    pub fn start_daily_schedule(self: Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler is already running");
            return false;
        }

        info!("starting trading scheduler...");
        let jobs: Vec<(String, Arc<JobSpec>)> = self.jobs.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut handles = self.handles.lock();
        for (name, spec) in jobs {
            let scheduler = self.clone();
            handles.push(tokio::spawn(scheduler.run_job(name, spec)));
        }
        info!("trading scheduler started successfully");
        true
    }

    pub fn stop_schedule(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("scheduler is not running");
            return false;
        }
        info!("trading scheduler stopped");
        true
    }

    async fn run_job(self: Arc<Self>, name: String, spec: Arc<JobSpec>) {
        info!("job thread {name} started");

        while self.running.load(Ordering::SeqCst) {
            if let Some(schedule_time) = spec.schedule_time {
                if !self.wait_until_ist_time(schedule_time).await {
                    break;
                }
            }

            if spec.market_hours_gated && !self.market_hours.is_market_open(None) {
                if !self.wait_for_market_open().await {
                    break;
                }
                continue;
            }

            {
                let func = spec.func.lock().clone();
                (&*func)().await;
            }
            *spec.last_run.lock() = Some(Utc::now());

            let wait_ok = if let Some(interval) = spec.interval_seconds {
                interruptible_sleep(&self.running, interval).await
            } else if spec.schedule_time.is_some() {
                interruptible_sleep(&self.running, 86_400).await
            } else {
                true
            };
            if !wait_ok {
                break;
            }
        }

        info!("job thread {name} stopped");
    }

    async fn wait_until_ist_time(&self, target: NaiveTime) -> bool {
        let now = Utc::now().with_timezone(&Kolkata);
        let mut target_date = now.date_naive();
        if now.time() > target {
            target_date = target_date.succ_opt().unwrap_or(target_date);
        }
        let Some(target_dt) = Kolkata.from_local_datetime(&target_date.and_time(target)).single() else { return true };
        let wait_seconds = (target_dt.with_timezone(&Utc) - Utc::now()).num_seconds().max(0) as u64;
        interruptible_sleep(&self.running, wait_seconds).await
    }

    async fn wait_for_market_open(&self) -> bool {
        match self.market_hours.get_next_market_open(None) {
            Some(next_open) => {
                let wait_seconds = (next_open - Utc::now()).num_seconds().max(0).min(3_600) as u64;
                info!("market closed, waiting {wait_seconds}s for next session");
                interruptible_sleep(&self.running, wait_seconds).await
            }
            None => interruptible_sleep(&self.running, 3_600).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PreMarketScanResult {
    pub stocks_scanned: usize,
    pub signals_generated: usize,
    pub watchlist: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostMarketCleanupResult {
    pub positions_closed: u32,
    pub positions_remaining: u32,
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct WorkflowStatus {
    pub is_running: bool,
    pub pre_market_completed: bool,
    pub market_hours_active: bool,
    pub post_market_completed: bool,
    pub market_status: MarketStatus,
    pub workflow_events: usize,
}

#[async_trait::async_trait]
pub trait PositionProvider: Send + Sync {
    async fn positions(&self) -> Vec<Position>;
    async fn portfolio_value(&self) -> f64;
    /// Persists that `ticker`'s open position has had its target-1 scale-out executed, so the
    /// next `check_and_exit_positions` tick doesn't sell the remaining half again.
    async fn mark_target_1_hit(&self, ticker: &str);
}

/// `DailyWorkflowManager` (spec §4.11): ties `MarketHoursManager`, `Scheduler`, and `AutoTrader`
/// together into the pre-market/market-hours/post-market cycle.
pub struct DailyWorkflow {
    auto_trader: Option<Arc<AutoTrader>>,
    watchlist: Vec<String>,
    signal_provider: Arc<dyn SignalProvider>,
    positions: Arc<dyn PositionProvider>,
    market_hours: Arc<MarketHoursManager>,
    scheduler: Arc<Scheduler>,
    running: AtomicBool,
    pre_market_completed: AtomicBool,
    market_hours_active: AtomicBool,
    post_market_completed: AtomicBool,
    workflow_log: Mutex<Vec<WorkflowEvent>>,
}

impl DailyWorkflow {
    pub fn new(
        auto_trader: Option<Arc<AutoTrader>>,
        watchlist: Vec<String>,
        signal_provider: Arc<dyn SignalProvider>,
        positions: Arc<dyn PositionProvider>,
        market_hours: Arc<MarketHoursManager>,
    ) -> Self {
        Self {
            auto_trader,
            watchlist,
            signal_provider,
            positions,
            scheduler: Arc::new(Scheduler::new(market_hours.clone())),
            market_hours,
            running: AtomicBool::new(false),
            pre_market_completed: AtomicBool::new(false),
            market_hours_active: AtomicBool::new(false),
            post_market_completed: AtomicBool::new(false),
            workflow_log: Mutex::new(Vec::new()),
        }
    }

    fn log_event(&self, event: &str) {
        self.workflow_log.lock().push(WorkflowEvent { event: event.to_string(), timestamp: Utc::now() });
    }

    /// `run_pre_market_scan` (9:00 AM): scores every watchlist ticker off the daily timeframe and
    /// keeps the top 20 by probability as the day's focus set.
    pub async fn run_pre_market_scan(&self) -> PreMarketScanResult {
        info!("[DailyWorkflow] running pre-market scan...");
        if let Some(auto_trader) = &self.auto_trader {
            auto_trader.reset_daily_pnl();
        }

        let mut scored: Vec<(String, f64)> = Vec::new();
        for ticker in &self.watchlist {
            if let Some(generated) = self.signal_provider.generate_signal(ticker).await {
                if !generated.signal.kind.is_hold() {
                    scored.push((ticker.clone(), generated.signal.probability));
                }
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(20);

        let result = PreMarketScanResult {
            stocks_scanned: self.watchlist.len(),
            signals_generated: scored.len(),
            watchlist: scored.into_iter().map(|(t, _)| t).collect(),
        };

        self.pre_market_completed.store(true, Ordering::SeqCst);
        self.log_event("pre_market_scan");
        info!(
            "[DailyWorkflow] pre-market scan complete: {} signals, {} in watchlist",
            result.signals_generated,
            result.watchlist.len()
        );
        result
    }

    /// `run_market_hours_trading`: ensures the auto trader is running, checks open positions
    /// against their stop-loss/target levels (`CheckAndExitPositions`, spec §4.9), then triggers
    /// one scan tick for new entries.
    pub async fn run_market_hours_trading(&self) -> Result<u32, String> {
        if !self.market_hours.is_market_open(None) {
            return Err("market is not open".to_string());
        }
        let Some(auto_trader) = &self.auto_trader else {
            return Err("auto trader not initialized".to_string());
        };

        if auto_trader.state() != crate::autotrader::RunState::Running {
            auto_trader.start();
        }

        let positions = self.positions.positions().await;

        let exits = auto_trader.executor().check_and_exit_positions(&positions).await;
        for exit in &exits {
            if exit.reason == ExitReason::Target1 && exit.result.success {
                self.positions.mark_target_1_hit(&exit.ticker).await;
            }
        }

        let portfolio_value = self.positions.portfolio_value().await;
        let summary = auto_trader.scan_and_execute(&self.watchlist, true, &positions, portfolio_value).await;

        self.market_hours_active.store(true, Ordering::SeqCst);
        self.log_event("market_hours_trading");
        Ok(summary.map(|s| s.signals_executed).unwrap_or(0))
    }

    /// `run_post_market_cleanup` (3:45 PM): force-closes Intraday positions, leaves Delivery
    /// positions open overnight, and stamps the daily report.
    pub async fn run_post_market_cleanup(&self) -> PostMarketCleanupResult {
        info!("[DailyWorkflow] running post-market cleanup...");
        let mut result = PostMarketCleanupResult::default();

        if let Some(auto_trader) = &self.auto_trader {
            let positions = self.positions.positions().await;
            for position in &positions {
                if position.product != Product::Intraday {
                    continue;
                }
                let outcome = auto_trader.executor().execute_sell(position, None, ExitReason::EndOfDayCleanup).await;
                if outcome.success {
                    result.positions_closed += 1;
                } else {
                    result.errors.push((position.ticker.clone(), outcome.error.unwrap_or_default()));
                }
            }
            result.positions_remaining = positions.iter().filter(|p| p.product != Product::Intraday).count() as u32;
        }

        self.post_market_completed.store(true, Ordering::SeqCst);
        self.market_hours_active.store(false, Ordering::SeqCst);
        self.log_event("post_market_cleanup");
        info!("[DailyWorkflow] post-market cleanup complete: {} positions closed", result.positions_closed);
        result
    }

    /// Registers the four daily jobs and starts the scheduler, mirroring `start_daily_schedule`
    /// plus the function-reassignment step in `start_daily_workflow`. Takes `Arc<Self>` by value
    /// for the same reason `Scheduler::start_daily_schedule` does — the registered jobs need an
    /// owned handle back to this workflow.
    pub fn start_daily_workflow(self: Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("daily workflow is already running");
            return false;
        }

        info!("starting daily workflow...");

        let pre_market: JobFn = {
            let workflow = self.clone();
            Arc::new(move || {
                let workflow = workflow.clone();
                Box::pin(async move {
                    workflow.run_pre_market_scan().await;
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            })
        };
        let market_hours_task: JobFn = {
            let workflow = self.clone();
            Arc::new(move || {
                let workflow = workflow.clone();
                Box::pin(async move {
                    if let Err(e) = workflow.run_market_hours_trading().await {
                        warn!("market hours trading tick skipped: {e}");
                    }
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            })
        };
        let post_market: JobFn = {
            let workflow = self.clone();
            Arc::new(move || {
                let workflow = workflow.clone();
                Box::pin(async move {
                    workflow.run_post_market_cleanup().await;
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            })
        };

        self.scheduler.register_job("pre_market_scan", pre_market, Some(NaiveTime::from_hms_opt(9, 0, 0).unwrap()), None, false);
        self.scheduler.register_job("signal_generation", market_hours_task.clone(), None, Some(300), true);
        self.scheduler.register_job("trade_execution", market_hours_task, None, Some(60), true);
        self.scheduler.register_job("post_market_cleanup", post_market, Some(NaiveTime::from_hms_opt(15, 45, 0).unwrap()), None, false);

        if self.scheduler.clone().start_daily_schedule() {
            info!("daily workflow started successfully");
            true
        } else {
            self.running.store(false, Ordering::SeqCst);
            false
        }
    }

    pub fn stop_daily_workflow(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("daily workflow is not running");
            return false;
        }

        if self.scheduler.stop_schedule() {
            if let Some(auto_trader) = &self.auto_trader {
                auto_trader.stop();
            }
            info!("daily workflow stopped");
            true
        } else {
            false
        }
    }

    pub fn get_workflow_status(&self) -> WorkflowStatus {
        WorkflowStatus {
            is_running: self.running.load(Ordering::SeqCst),
            pre_market_completed: self.pre_market_completed.load(Ordering::SeqCst),
            market_hours_active: self.market_hours_active.load(Ordering::SeqCst),
            post_market_completed: self.post_market_completed.load(Ordering::SeqCst),
            market_status: self.market_hours.get_market_status(None),
            workflow_events: self.workflow_log.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    fn ist_naive(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Kolkata.with_ymd_and_hms(y, m, d, h, mi, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn weekend_is_not_a_trading_day() {
        let manager = MarketHoursManager::new();
        // 2026-08-01 is a Saturday.
        assert!(!manager.is_trading_day(Some(ist_naive(2026, 8, 1, 10, 0))));
    }

    #[test]
    fn holiday_closes_the_market_even_on_a_weekday() {
        let manager = MarketHoursManager::new();
        let monday = ist_naive(2026, 8, 3, 10, 0);
        assert!(manager.is_market_open(Some(monday)));
        manager.add_holiday(monday.with_timezone(&Kolkata).date_naive());
        assert!(!manager.is_market_open(Some(monday)));
    }

    #[test]
    fn market_open_band_matches_9_15_to_15_30_ist() {
        let manager = MarketHoursManager::new();
        assert!(!manager.is_market_open(Some(ist_naive(2026, 8, 3, 9, 0))));
        assert!(manager.is_market_open(Some(ist_naive(2026, 8, 3, 9, 15))));
        assert!(manager.is_market_open(Some(ist_naive(2026, 8, 3, 12, 0))));
        assert!(!manager.is_market_open(Some(ist_naive(2026, 8, 3, 15, 31))));
    }

    #[test]
    fn session_classification_covers_all_bands() {
        let manager = MarketHoursManager::new();
        assert_eq!(manager.get_market_status(Some(ist_naive(2026, 8, 3, 8, 0))).session, MarketSession::Closed);
        assert_eq!(manager.get_market_status(Some(ist_naive(2026, 8, 3, 9, 5))).session, MarketSession::PreMarket);
        assert_eq!(manager.get_market_status(Some(ist_naive(2026, 8, 3, 10, 0))).session, MarketSession::Open);
        assert_eq!(manager.get_market_status(Some(ist_naive(2026, 8, 3, 15, 45))).session, MarketSession::PostMarket);
        assert_eq!(manager.get_market_status(Some(ist_naive(2026, 8, 1, 10, 0))).session, MarketSession::NonTradingDay);
    }
}
