//! Scan/signal CLI for the autonomous trading core.
//!
//! Pulls OHLCV through `DataFabric`, derives features, and reports BUY/SELL/HOLD signals for a
//! ticker list. Never places an order — `planner`/`risk`/`executor`/`autotrader`/`scheduler` are
//! library-level components exercised by their own tests; this binary is the reporting tool the
//! original `scripts/live_trading_signals.py` played, rebuilt against the async trading core.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use trading_core::autotrader::{AccuracyProvider, GeneratedSignal, SignalProvider};
use trading_core::config::{EnsembleMethod, SignalSource, TradingConfig};
use trading_core::datafabric::{strip_exchange_suffix, DataFabric, DataSource, OhlcvCache, SourceOutcome, SourcePriority};
use trading_core::features;
use trading_core::mtf::{self, TimeframeSignal};
use trading_core::registry::{LogisticPredictor, ModelMetadata, ModelRegistry, Predictor};
use trading_core::scheduler::MarketHoursManager;
use trading_core::strategies::{detect_regime, CombineMethod, MarketSnapshot, RegimeInfo, RegimeType, StrategyManager};
use trading_core::types::{FeatureRow, Interval, Levels, OhlcvBar, OhlcvSeries, Quote, Signal, SignalKind};

/// Default watchlist when no `--tickers`/`--file` is given, mirroring the original script's
/// fallback universe.
const DEFAULT_WATCHLIST: &[&str] = &[
    "RELIANCE.NS", "TCS.NS", "HDFCBANK.NS", "INFY.NS", "HINDUNILVR.NS",
    "ICICIBANK.NS", "BHARTIARTL.NS", "SBIN.NS", "BAJFINANCE.NS", "ITC.NS",
    "HCLTECH.NS", "AXISBANK.NS", "KOTAKBANK.NS", "LT.NS", "ASIANPAINT.NS",
    "MARUTI.NS", "TITAN.NS", "ULTRACEMCO.NS", "NTPC.NS", "WIPRO.NS",
];

const MODEL_ID: &str = "baseline-logistic";
const REQUIRED_COLS: &[&str] = &["close", "sma_20", "sma_50", "rsi_14", "macd", "atr_14", "adx_14", "bb_upper", "bb_lower", "volume_ratio"];

#[derive(Parser, Debug)]
#[command(name = "autotrader", about = "Scan a watchlist and report trading signals")]
struct Cli {
    /// Explicit ticker list, e.g. --tickers RELIANCE.NS TCS.NS
    #[arg(long, num_args = 1..)]
    tickers: Vec<String>,

    /// Newline-delimited ticker file.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Use the built-in default watchlist (implied when neither --tickers nor --file is given).
    #[arg(long)]
    watchlist: bool,

    /// Keep scanning every --interval minutes until interrupted.
    #[arg(long)]
    continuous: bool,

    /// Scan interval in minutes for --continuous.
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Write the scan result to data/signals/signals_<ts>.json.
    #[arg(long)]
    save: bool,

    /// Force the single-model quant path instead of the multi-timeframe elite path.
    #[arg(long)]
    no_elite: bool,

    /// Print component health and exit without scanning.
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = TradingConfig::from_env();
    if let Ok(raw) = std::fs::read_to_string("configs/trading_config.toml") {
        config = config.merge_toml(&raw).context("parsing configs/trading_config.toml")?;
    }
    if cli.no_elite && config.signal_source == SignalSource::Elite {
        config.signal_source = SignalSource::QuantEnsemble;
    }

    let fabric = Arc::new(DataFabric::new(
        vec![Arc::new(CacheFileSource::new("cache"))],
        OhlcvCache::new(),
    ));
    let registry = Arc::new(ModelRegistry::new("data/models/registry.json").context("opening model registry")?);
    let market_hours = MarketHoursManager::new();

    if cli.status {
        print_status(&registry, &market_hours);
        return Ok(());
    }

    let tickers = resolve_tickers(&cli)?;
    bootstrap_model(&fabric, &registry, &tickers).await;
    let predictor = load_predictor(&registry);

    let pipeline = Arc::new(Pipeline {
        fabric,
        registry,
        config: config.clone(),
        strategies: StrategyManager::default(),
        predictor: parking_lot::Mutex::new(predictor),
    });

    if cli.continuous {
        info!(interval_min = cli.interval, "entering continuous scan mode, press Ctrl+C to stop");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopped by user");
                    std::process::exit(130);
                }
                _ = run_once(&pipeline, &market_hours, &tickers, cli.save) => {}
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("stopped by user");
                    std::process::exit(130);
                }
                _ = tokio::time::sleep(std::time::Duration::from_secs(cli.interval * 60)) => {}
            }
        }
    } else {
        if !market_hours.is_market_open(None) {
            warn!("market is currently closed; results reflect the last cached close");
        }
        run_once(&pipeline, &market_hours, &tickers, cli.save).await;
    }

    Ok(())
}

async fn run_once(pipeline: &Arc<Pipeline>, market_hours: &MarketHoursManager, tickers: &[String], save: bool) {
    let status = market_hours.get_market_status(None);
    info!(session = ?status.session, "starting scan of {} tickers", tickers.len());

    let mut rows = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        match pipeline.generate_signal(ticker).await {
            Some(generated) => rows.push(generated),
            None => debug!(ticker, "no signal produced (insufficient data or fetch failure)"),
        }
    }

    print_signals(&rows);

    if save {
        if let Err(e) = save_signals(&rows) {
            warn!(error = %e, "failed to save signals");
        }
    }
}

fn resolve_tickers(cli: &Cli) -> Result<Vec<String>> {
    if !cli.tickers.is_empty() {
        return Ok(cli.tickers.clone());
    }
    if let Some(path) = &cli.file {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading ticker file {}", path.display()))?;
        let tickers: Vec<String> = content.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();
        return Ok(tickers);
    }
    Ok(DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect())
}

fn print_status(registry: &ModelRegistry, market_hours: &MarketHoursManager) {
    let status = market_hours.get_market_status(None);
    println!("{}", "=".repeat(60));
    println!("COMPONENT STATUS");
    println!("{}", "=".repeat(60));
    println!("market session : {:?} (open={})", status.session, status.is_open);
    let active = registry.get_active_models(None);
    println!("active models  : {}", active.len());
    for model in &active {
        println!("  - {} ({}) accuracy={:.2}% predictions={}", model.model_id, model.model_type, model.accuracy() * 100.0, model.prediction_count);
    }
    println!("{}", "=".repeat(60));
}

fn print_signals(rows: &[GeneratedSignal]) {
    let actionable: Vec<&GeneratedSignal> = rows.iter().filter(|g| !g.signal.kind.is_hold()).collect();
    println!("\n{}", "=".repeat(80));
    println!("TRADING SIGNALS - {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    println!("{}", "=".repeat(80));

    if actionable.is_empty() {
        println!("no actionable signals this scan");
        println!("{}", "=".repeat(80));
        return;
    }

    let buys: Vec<&&GeneratedSignal> = actionable.iter().filter(|g| g.signal.kind.is_buy()).collect();
    let sells: Vec<&&GeneratedSignal> = actionable.iter().filter(|g| g.signal.kind.is_sell()).collect();

    if !buys.is_empty() {
        println!("\nBUY ({}):", buys.len());
        println!("{}", "-".repeat(80));
        for g in &buys {
            println!(
                "  {:15} | price {:>10.2} | confidence {:>6.1}% | entry {:>10.2} stop {:>10.2}",
                g.signal.ticker, g.signal.current_price, g.signal.confidence * 100.0, g.signal.levels.entry, g.signal.levels.stop_loss
            );
        }
    }
    if !sells.is_empty() {
        println!("\nSELL ({}):", sells.len());
        println!("{}", "-".repeat(80));
        for g in &sells {
            println!(
                "  {:15} | price {:>10.2} | confidence {:>6.1}% | entry {:>10.2} stop {:>10.2}",
                g.signal.ticker, g.signal.current_price, g.signal.confidence * 100.0, g.signal.levels.entry, g.signal.levels.stop_loss
            );
        }
    }
    println!("{}", "=".repeat(80));
}

fn save_signals(rows: &[GeneratedSignal]) -> Result<()> {
    let dir = Path::new("data/signals");
    std::fs::create_dir_all(dir)?;
    let payload: Vec<&Signal> = rows.iter().map(|g| &g.signal).collect();
    let json = serde_json::to_string_pretty(&payload)?;
    let path = dir.join(format!("signals_{}.json", Utc::now().format("%Y%m%d_%H%M%S")));
    std::fs::write(&path, json)?;
    info!(path = %path.display(), count = rows.len(), "saved scan results");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trading_core=info,autotrader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// ---------------------------------------------------------------------------------------------
// Signal pipeline: bridges DataFabric + FeatureEngine output into StrategyManager/mtf inputs and
// implements the SignalProvider/AccuracyProvider seams `autotrader.rs` is driven through.
// ---------------------------------------------------------------------------------------------

struct Pipeline {
    fabric: Arc<DataFabric>,
    registry: Arc<ModelRegistry>,
    config: TradingConfig,
    strategies: StrategyManager,
    predictor: parking_lot::Mutex<LogisticPredictor>,
}

/// Loads the persisted baseline predictor behind the active registry entry, falling back to a
/// fresh (untrained, always-0.5) predictor if the model file is missing or unreadable.
fn load_predictor(registry: &ModelRegistry) -> LogisticPredictor {
    let cols: Vec<String> = REQUIRED_COLS.iter().map(|s| s.to_string()).collect();
    registry
        .get_model(MODEL_ID)
        .and_then(|meta| meta.model_path)
        .and_then(|path| LogisticPredictor::load(Path::new(&path)).ok())
        .unwrap_or_else(|| LogisticPredictor::new(cols))
}

impl Pipeline {
    async fn fetch_table(&self, ticker: &str, interval: Interval) -> Option<(OhlcvSeries, features::FeatureTable)> {
        let to = Utc::now();
        let from = to - interval.max_history();
        let series = match self.fabric.get_ohlcv(ticker, interval, from, to).await {
            Ok(s) => s,
            Err(e) => {
                debug!(ticker, %e, "fetch failed");
                return None;
            }
        };
        let table = features::clean_frame(features::make_features(&series), REQUIRED_COLS);
        if table.is_empty() {
            return None;
        }
        Some((series, table))
    }

    fn model_probability(&self, row: &FeatureRow) -> f64 {
        self.predictor.lock().predict_proba(row).map(|p| p.probability).unwrap_or(0.5)
    }

    fn regime_info_for(&self, table: &features::FeatureTable, idx: usize, snapshot: &MarketSnapshot) -> RegimeInfo {
        let atr_series: Vec<f64> = table.iter().map(|r| r.get("atr_14").copied().unwrap_or(0.0)).collect();
        let atr_pctile = percentile_rank(&atr_series, idx, 60);
        let atr_pct = if snapshot.current_price > 0.0 { snapshot.atr / snapshot.current_price * 100.0 } else { 0.0 };
        detect_regime(snapshot.adx, atr_pct, atr_pctile, snapshot.current_price, snapshot.sma_20, snapshot.sma_50, snapshot.volume_ratio)
    }

    async fn quant_signal(&self, ticker: &str, method: CombineMethod) -> Option<(Signal, RegimeType)> {
        let (series, table) = self.fetch_table(ticker, Interval::OneDay).await?;
        let idx = table.len() - 1;
        let probability = self.model_probability(&table[idx]);
        let snapshot = build_snapshot(&series, &table, idx, probability)?;
        let regime = self.regime_info_for(&table, idx, &snapshot).regime_type;
        let result = self.strategies.combine(&snapshot, method);

        let signal = Signal {
            ticker: ticker.to_string(),
            timeframe: Interval::OneDay,
            kind: result.signal,
            probability,
            confidence: result.confidence,
            levels: Levels { entry: result.entry_price, stop_loss: result.stop_loss, target_1: result.target_1, target_2: result.target_2 },
            current_price: snapshot.current_price,
            ts: Utc::now(),
            filtered_reason: None,
        };
        Some((signal, regime))
    }

    async fn elite_signal(&self, ticker: &str) -> Option<(Signal, RegimeType)> {
        let timeframes = [Interval::FiveMinute, Interval::FifteenMinute, Interval::OneHour, Interval::OneDay];
        let mut tf_signals = Vec::new();
        let mut last_regime = RegimeType::Unknown;

        for interval in timeframes {
            let Some((series, table)) = self.fetch_table(ticker, interval).await else { continue };
            let idx = table.len() - 1;
            let probability = self.model_probability(&table[idx]);
            let Some(snapshot) = build_snapshot(&series, &table, idx, probability) else { continue };
            let regime = self.regime_info_for(&table, idx, &snapshot);
            last_regime = regime.regime_type;

            let result = self.strategies.execute_adaptive_elite(&snapshot, &regime, &[probability]);
            tf_signals.push(TimeframeSignal {
                timeframe: interval.as_str(),
                kind: result.signal,
                probability,
                confidence: result.confidence,
                levels: Levels { entry: result.entry_price, stop_loss: result.stop_loss, target_1: result.target_1, target_2: result.target_2 },
                current_price: snapshot.current_price,
            });
        }

        if tf_signals.is_empty() {
            return None;
        }
        let consensus = mtf::aggregate(ticker, &tf_signals, true);
        Some((consensus.into_signal(Interval::FiveMinute), last_regime))
    }
}

#[async_trait]
impl SignalProvider for Pipeline {
    async fn generate_signal(&self, ticker: &str) -> Option<GeneratedSignal> {
        let (signal, regime) = match self.config.signal_source {
            SignalSource::Elite => self.elite_signal(ticker).await?,
            SignalSource::Quant => self.quant_signal(ticker, CombineMethod::BestPerformer).await?,
            SignalSource::QuantEnsemble => {
                let method = match self.config.quant_ensemble_method {
                    EnsembleMethod::WeightedAverage => CombineMethod::WeightedAverage,
                    EnsembleMethod::Voting => CombineMethod::Voting,
                };
                self.quant_signal(ticker, method).await?
            }
        };
        Some(GeneratedSignal { signal, model_id: MODEL_ID.to_string(), regime: Some(regime) })
    }
}

#[async_trait]
impl AccuracyProvider for Pipeline {
    async fn accuracy_30d(&self, model_id: &str) -> Option<(f64, u32)> {
        let meta = self.registry.get_model(model_id)?;
        Some((meta.accuracy(), meta.prediction_count as u32))
    }
}

/// Bridges `FeatureRow` (FeatureEngine's output vocabulary) into `MarketSnapshot` (the strategy
/// vocabulary): renames the shared columns and derives the handful of rolling stats FeatureEngine
/// doesn't carry (sma_10, macd_signal/hist, ret_5/20, price_std) from the raw close series.
fn build_snapshot(series: &OhlcvSeries, table: &features::FeatureTable, idx: usize, probability: f64) -> Option<MarketSnapshot> {
    let row = table.get(idx)?;
    let closes: Vec<f64> = series.bars.iter().map(|b| b.close).collect();
    if closes.len() <= idx {
        return None;
    }
    let macd_series: Vec<f64> = table.iter().map(|r| r.get("macd").copied().unwrap_or(0.0)).collect();
    let macd_signal = ema_at(&macd_series, idx, 9);
    let macd = row.get("macd").copied().unwrap_or(0.0);

    Some(MarketSnapshot {
        current_price: row.get("close").copied().unwrap_or(0.0),
        sma_10: rolling_mean(&closes, idx, 10),
        sma_20: row.get("sma_20").copied().unwrap_or(0.0),
        sma_50: row.get("sma_50").copied().unwrap_or(0.0),
        rsi_14: row.get("rsi_14").copied().unwrap_or(50.0),
        macd,
        macd_signal,
        macd_hist: macd - macd_signal,
        ret_5: pct_change_back(&closes, idx, 5),
        ret_20: pct_change_back(&closes, idx, 20),
        adx: row.get("adx_14").copied().unwrap_or(0.0),
        atr: row.get("atr_14").copied().unwrap_or(0.0),
        price_std: rolling_std(&closes, idx, 20),
        bollinger_upper: row.get("bb_upper").copied().unwrap_or(0.0),
        bollinger_lower: row.get("bb_lower").copied().unwrap_or(0.0),
        volume_ratio: row.get("volume_ratio").copied().unwrap_or(1.0),
        probability,
    })
}

fn rolling_mean(values: &[f64], idx: usize, window: usize) -> f64 {
    let start = idx.saturating_sub(window.saturating_sub(1));
    let slice = &values[start..=idx];
    slice.iter().sum::<f64>() / slice.len() as f64
}

fn rolling_std(values: &[f64], idx: usize, window: usize) -> f64 {
    let mean = rolling_mean(values, idx, window);
    let start = idx.saturating_sub(window.saturating_sub(1));
    let slice = &values[start..=idx];
    let variance = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / slice.len() as f64;
    variance.sqrt()
}

fn pct_change_back(values: &[f64], idx: usize, lookback: usize) -> f64 {
    if idx < lookback || values[idx - lookback] == 0.0 {
        return 0.0;
    }
    (values[idx] - values[idx - lookback]) / values[idx - lookback]
}

fn ema_at(values: &[f64], idx: usize, window: usize) -> f64 {
    let alpha = 2.0 / (window as f64 + 1.0);
    let start = idx.saturating_sub(window * 3).min(idx);
    let mut acc = values[start];
    for v in &values[start + 1..=idx] {
        acc = alpha * v + (1.0 - alpha) * acc;
    }
    acc
}

/// Percentile rank (0-100) of `values[idx]` within the trailing `lookback` window.
fn percentile_rank(values: &[f64], idx: usize, lookback: usize) -> f64 {
    let start = idx.saturating_sub(lookback.saturating_sub(1));
    let window = &values[start..=idx];
    if window.len() <= 1 {
        return 50.0;
    }
    let current = values[idx];
    let below = window.iter().filter(|&&v| v < current).count();
    100.0 * below as f64 / window.len() as f64
}

// ---------------------------------------------------------------------------------------------
// Model bootstrap: trains a baseline logistic model across the watchlist on first run, the way
// any fresh deployment of this core needs at least one active model before it can score anything.
// ---------------------------------------------------------------------------------------------

async fn bootstrap_model(fabric: &Arc<DataFabric>, registry: &ModelRegistry, tickers: &[String]) {
    let has_active = !registry.get_active_models(Some("logistic")).is_empty();
    if has_active {
        return;
    }
    info!("no active logistic model found, training a baseline model from cached/synthesized history");

    let mut series_list = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let to = Utc::now();
        let from = to - Interval::OneDay.max_history();
        if let Ok(series) = fabric.get_ohlcv(ticker, Interval::OneDay, from, to).await {
            series_list.push(series);
        }
    }

    // Feature computation is CPU-bound and independent per ticker; parallelize across the
    // watchlist the way a full model-refresh job would.
    let tables: Vec<features::FeatureTable> = series_list
        .par_iter()
        .map(|series| {
            let table = features::make_features(series);
            let labeled = features::add_forward_return_label(series, table, 5, 0.01);
            features::clean_frame(labeled, REQUIRED_COLS)
        })
        .collect();

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for table in tables {
        for row in table {
            if let Some(label) = row.get("label_up").copied() {
                labels.push(label);
                rows.push(row);
            }
        }
    }

    if rows.len() < 50 {
        warn!(samples = rows.len(), "not enough samples to train a baseline model, skipping bootstrap");
        return;
    }

    let cols: Vec<String> = REQUIRED_COLS.iter().map(|s| s.to_string()).collect();
    let mut predictor = LogisticPredictor::new(cols.clone());
    let metrics = match predictor.train(&rows, &labels) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "baseline model training failed");
            return;
        }
    };

    let model_path = PathBuf::from("data/models/baseline-logistic.json");
    if let Some(parent) = model_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = predictor.save(&model_path) {
        warn!(error = %e, "failed to persist baseline model");
        return;
    }

    let metadata = ModelMetadata {
        model_id: MODEL_ID.to_string(),
        model_type: "logistic".to_string(),
        version: "1".to_string(),
        feature_cols: cols,
        performance_metrics: metrics,
        trained_date: Utc::now(),
        model_path: Some(model_path.display().to_string()),
        is_active: true,
        prediction_count: 0,
        last_used: None,
    };
    if let Err(e) = registry.register_model(metadata) {
        warn!(error = %e, "failed to register baseline model");
        return;
    }
    info!(samples = rows.len(), "baseline model trained and registered");
}

// ---------------------------------------------------------------------------------------------
// CacheFileSource: a fallback-historical DataSource reading flat CSV caches, synthesizing a
// deterministic random walk when no cache file exists. Broker/exchange-API connectivity is out
// of scope (spec §1); this keeps the binary runnable without live market access.
// ---------------------------------------------------------------------------------------------

struct CacheFileSource {
    cache_dir: PathBuf,
}

impl CacheFileSource {
    fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into() }
    }

    fn path_for(&self, ticker: &str, interval: Interval) -> PathBuf {
        let slug = strip_exchange_suffix(ticker).to_uppercase();
        if interval.is_intraday() {
            self.cache_dir.join("intraday").join(format!("{slug}_{}.csv", interval.as_str()))
        } else {
            self.cache_dir.join(format!("{slug}.csv"))
        }
    }

    /// Manually parsed `t,open,high,low,close,volume` CSV, one bar per line, `t` as an RFC3339
    /// timestamp. No header row.
    fn read_csv(path: &Path) -> Option<Vec<OhlcvBar>> {
        let content = std::fs::read_to_string(path).ok()?;
        let mut bars = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 6 {
                continue;
            }
            let t = DateTime::parse_from_rfc3339(parts[0]).ok()?.with_timezone(&Utc);
            bars.push(OhlcvBar {
                t,
                open: parts[1].parse().ok()?,
                high: parts[2].parse().ok()?,
                low: parts[3].parse().ok()?,
                close: parts[4].parse().ok()?,
                volume: parts[5].parse().ok()?,
            });
        }
        bars.sort_by_key(|b| b.t);
        Some(bars)
    }

    /// Deterministic per-ticker seed so repeated scans of the same ticker see a stable synthetic
    /// history instead of a fresh random walk every call.
    fn seed_for(ticker: &str, interval: Interval) -> u64 {
        let mut hasher = DefaultHasher::new();
        ticker.hash(&mut hasher);
        interval.as_str().hash(&mut hasher);
        hasher.finish()
    }

    fn synthesize(ticker: &str, interval: Interval, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<OhlcvBar> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(Self::seed_for(ticker, interval));
        let step = interval_step(interval);
        let mut bars = Vec::new();
        let mut price = 100.0 + (Self::seed_for(ticker, interval) % 400) as f64;
        let mut t = from;
        while t <= to {
            let drift = rng.gen_range(-0.012..0.012);
            let open = price;
            price = (price * (1.0 + drift)).max(1.0);
            let high = open.max(price) * (1.0 + rng.gen_range(0.0..0.004));
            let low = open.min(price) * (1.0 - rng.gen_range(0.0..0.004));
            let volume = rng.gen_range(50_000u64..500_000u64);
            bars.push(OhlcvBar { t, open, high, low, close: price, volume });
            t += step;
        }
        bars
    }
}

fn interval_step(interval: Interval) -> ChronoDuration {
    match interval {
        Interval::OneMinute => ChronoDuration::minutes(1),
        Interval::FiveMinute => ChronoDuration::minutes(5),
        Interval::FifteenMinute => ChronoDuration::minutes(15),
        Interval::ThirtyMinute => ChronoDuration::minutes(30),
        Interval::OneHour => ChronoDuration::hours(1),
        Interval::OneDay => ChronoDuration::days(1),
        Interval::OneWeek => ChronoDuration::weeks(1),
        Interval::OneMonth => ChronoDuration::days(30),
    }
}

#[async_trait]
impl DataSource for CacheFileSource {
    fn name(&self) -> &str {
        "cache-file"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::FallbackHistorical
    }

    async fn fetch_ohlcv(&self, ticker: &str, interval: Interval, from: DateTime<Utc>, to: DateTime<Utc>) -> SourceOutcome<OhlcvSeries> {
        let path = self.path_for(ticker, interval);
        let bars = match Self::read_csv(&path) {
            Some(bars) if !bars.is_empty() => {
                let filtered: Vec<OhlcvBar> = bars.into_iter().filter(|b| b.t >= from && b.t <= to).collect();
                if filtered.is_empty() {
                    Self::synthesize(ticker, interval, from, to)
                } else {
                    filtered
                }
            }
            _ => Self::synthesize(ticker, interval, from, to),
        };
        if bars.is_empty() {
            return SourceOutcome::SoftFail("no bars in requested range".to_string());
        }
        SourceOutcome::Success(OhlcvSeries { ticker: ticker.to_string(), interval, bars, is_stale: false, source: self.name().to_string() })
    }

    async fn fetch_quote(&self, ticker: &str) -> SourceOutcome<Quote> {
        let to = Utc::now();
        let from = to - ChronoDuration::days(5);
        match self.fetch_ohlcv(ticker, Interval::OneDay, from, to).await {
            SourceOutcome::Success(series) => {
                let Some(last) = series.bars.last() else {
                    return SourceOutcome::SoftFail("empty synthesized series".to_string());
                };
                let prev_close = series.bars.iter().rev().nth(1).map(|b| b.close).unwrap_or(last.close);
                SourceOutcome::Success(Quote::from_prices(ticker, last.close, prev_close, self.name()))
            }
            SourceOutcome::HardFail(reason) => SourceOutcome::HardFail(reason),
            SourceOutcome::SoftFail(reason) => SourceOutcome::SoftFail(reason),
        }
    }
}
