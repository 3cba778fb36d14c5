//! Monitoring scheduler (component E): owns the process lifecycle, fans out
//! per-symbol work with bounded concurrency, and drives the simulator.
//!
//! Graceful shutdown follows the ctrl_c + `tokio::select!` pattern used by
//! the original live-trading command loop, generalised to a cooperative
//! cycle loop instead of a fixed-interval ticker per command.

use crate::cache::CandleCache;
use crate::exchange::ExchangeClient;
use crate::indicators::{self, IndicatorSnapshot, SqueezeParams, TrendLineParams};
use crate::oms::{size_order, Simulator, DEFAULT_POSITION_SIZE, DEFAULT_RISK_REWARD};
use crate::signal;
use crate::types::{DataRequest, Interval, Symbol};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Aggregate process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    ShuttingDown,
    Error,
}

/// Per-symbol administrative / fault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    Active,
    Paused,
    Error,
}

/// Scheduler-owned bookkeeping for one symbol. Never written from outside
/// the scheduler.
#[derive(Debug, Clone)]
pub struct SymbolStatus {
    pub state: SymbolState,
    pub last_snapshot: Option<IndicatorSnapshot>,
    pub update_count: u64,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub latched_signal: Option<crate::types::Side>,
    pub last_latency_ms: Option<u64>,
}

impl Default for SymbolStatus {
    fn default() -> Self {
        Self {
            state: SymbolState::Active,
            last_snapshot: None,
            update_count: 0,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            latched_signal: None,
            last_latency_ms: None,
        }
    }
}

/// Read-only snapshot of the scheduler's aggregate state, issued by copy.
#[derive(Debug, Clone)]
pub struct MonitoringStatus {
    pub state: SchedulerState,
    pub start_time: Option<DateTime<Utc>>,
    pub symbols: HashMap<Symbol, SymbolStatus>,
    pub total_updates: u64,
    pub total_signals: u64,
    pub total_errors: u64,
}

impl MonitoringStatus {
    /// `active_symbols / total_symbols`, weighted down by the recent
    /// (last-cycle) error rate.
    pub fn health_score(&self) -> f64 {
        let total = self.symbols.len();
        if total == 0 {
            return 1.0;
        }
        let active = self
            .symbols
            .values()
            .filter(|s| s.state == SymbolState::Active)
            .count();
        let recent_error_rate = if self.total_updates == 0 {
            0.0
        } else {
            (self.total_errors as f64 / self.total_updates as f64).min(1.0)
        };
        (active as f64 / total as f64) * (1.0 - recent_error_rate)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub symbols: Vec<Symbol>,
    pub interval: Interval,
    pub candles_limit: usize,
    pub cycle_seconds: u64,
    pub per_symbol_timeout_secs: u64,
    pub max_inflight: usize,
    pub max_errors_per_symbol: u32,
    pub error_reset_minutes: i64,
    pub poll_spacing_ms: u64,
    pub max_concurrent_symbols: usize,
    pub position_size_usd: f64,
    pub risk_reward: f64,
    pub trend_params: TrendLineParams,
    pub squeeze_params: SqueezeParams,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            interval: Interval::M5,
            candles_limit: 100,
            cycle_seconds: 60,
            per_symbol_timeout_secs: 30,
            max_inflight: 10,
            max_errors_per_symbol: 5,
            error_reset_minutes: 30,
            poll_spacing_ms: 100,
            max_concurrent_symbols: 50,
            position_size_usd: DEFAULT_POSITION_SIZE,
            risk_reward: DEFAULT_RISK_REWARD,
            trend_params: TrendLineParams::default(),
            squeeze_params: SqueezeParams::default(),
        }
    }
}

/// Outcome of processing a single symbol in a cycle.
struct SymbolOutcome {
    symbol: Symbol,
    snapshot: Option<IndicatorSnapshot>,
    last_close: Option<f64>,
    error: Option<String>,
    /// §7 DataQuality: set when the fetched series' completeness ratio fell
    /// below 0.7. Non-fatal — the cycle still completes and the snapshot is
    /// still recorded — but it counts toward the symbol's error budget.
    data_quality_issue: Option<String>,
    latency_ms: u64,
}

pub struct Scheduler {
    config: SchedulerConfig,
    exchange: Arc<ExchangeClient>,
    cache: Arc<CandleCache>,
    simulator: Arc<Simulator>,
    status: Arc<RwLock<MonitoringStatus>>,
    state: Arc<Mutex<SchedulerState>>,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        exchange: Arc<ExchangeClient>,
        cache: Arc<CandleCache>,
        simulator: Arc<Simulator>,
    ) -> Result<Self, crate::error::CoreError> {
        if config.symbols.is_empty() {
            return Err(crate::error::CoreError::InvalidInput(
                "scheduler requires at least one symbol".into(),
            ));
        }
        if config.symbols.len() > config.max_concurrent_symbols {
            return Err(crate::error::CoreError::InvalidInput(format!(
                "{} symbols exceeds maxConcurrentSymbols {}",
                config.symbols.len(),
                config.max_concurrent_symbols
            )));
        }

        let symbols = config
            .symbols
            .iter()
            .map(|s| (s.clone(), SymbolStatus::default()))
            .collect();

        Ok(Self {
            config,
            exchange,
            cache,
            simulator,
            status: Arc::new(RwLock::new(MonitoringStatus {
                state: SchedulerState::Stopped,
                start_time: None,
                symbols,
                total_updates: 0,
                total_signals: 0,
                total_errors: 0,
            })),
            state: Arc::new(Mutex::new(SchedulerState::Stopped)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn status(&self) -> MonitoringStatus {
        self.status.read().await.clone()
    }

    /// STOPPED -> STARTING -> (connectivity check) -> RUNNING. Returns
    /// `false` on an irrecoverable bootstrap failure, transitioning to
    /// ERROR.
    pub async fn start(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            *state = SchedulerState::Starting;
        }
        self.status.write().await.state = SchedulerState::Starting;

        match self.exchange.ping().await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                let mut state = self.state.lock().await;
                *state = SchedulerState::Error;
                self.status.write().await.state = SchedulerState::Error;
                error!("scheduler bootstrap failed: exchange connectivity check failed");
                return false;
            }
        }

        let mut state = self.state.lock().await;
        *state = SchedulerState::Running;
        drop(state);
        let mut status = self.status.write().await;
        status.state = SchedulerState::Running;
        status.start_time = Some(Utc::now());
        true
    }

    pub async fn request_stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Administratively excludes a symbol from future cycles without
    /// touching its error count or latched signal.
    pub async fn pause_symbol(&self, symbol: &Symbol) {
        let mut status = self.status.write().await;
        if let Some(entry) = status.symbols.get_mut(symbol) {
            entry.state = SymbolState::Paused;
        }
    }

    /// Returns a paused symbol to ACTIVE so it's picked up on the next cycle.
    pub async fn resume_symbol(&self, symbol: &Symbol) {
        let mut status = self.status.write().await;
        if let Some(entry) = status.symbols.get_mut(symbol) {
            if entry.state == SymbolState::Paused {
                entry.state = SymbolState::Active;
            }
        }
    }

    /// Runs the cycle loop until [`Scheduler::request_stop`] is called or a
    /// SIGINT is received. Mirrors the ctrl_c + select! shutdown pattern.
    pub async fn run(self: Arc<Self>) {
        if !self.start().await {
            return;
        }

        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received ctrl-c, initiating shutdown");
                shutdown.store(true, Ordering::SeqCst);
            }
        });

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let cycle_start = tokio::time::Instant::now();
            self.run_cycle().await;

            let elapsed = cycle_start.elapsed();
            let target = Duration::from_secs(self.config.cycle_seconds);
            let sleep_for = target.checked_sub(elapsed).unwrap_or(Duration::from_secs(1)).max(Duration::from_secs(1));

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.wait_for_shutdown() => { break; }
            }
        }

        {
            let mut state = self.state.lock().await;
            *state = SchedulerState::ShuttingDown;
        }
        self.status.write().await.state = SchedulerState::ShuttingDown;
        info!("scheduler shutting down");

        {
            let mut state = self.state.lock().await;
            *state = SchedulerState::Stopped;
        }
        self.status.write().await.state = SchedulerState::Stopped;
    }

    async fn wait_for_shutdown(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// One full sweep: fan out `processSymbol` with bounded concurrency,
    /// then drive the simulator's bracket evaluation from observed closes.
    async fn run_cycle(&self) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_inflight));
        let mut tasks: JoinSet<SymbolOutcome> = JoinSet::new();

        self.reset_expired_errors().await;

        let active_symbols: Vec<Symbol> = {
            let status = self.status.read().await;
            status
                .symbols
                .iter()
                .filter(|(_, s)| s.state == SymbolState::Active)
                .map(|(sym, _)| sym.clone())
                .collect()
        };

        for symbol in active_symbols {
            let permit = Arc::clone(&semaphore);
            let exchange = Arc::clone(&self.exchange);
            let cache = Arc::clone(&self.cache);
            let interval = self.config.interval;
            let limit = self.config.candles_limit;
            let timeout = Duration::from_secs(self.config.per_symbol_timeout_secs);
            let trend_params = self.config.trend_params;
            let squeeze_params = self.config.squeeze_params;

            tasks.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                match tokio::time::timeout(
                    timeout,
                    process_symbol(symbol.clone(), exchange, cache, interval, limit, trend_params, squeeze_params),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => SymbolOutcome {
                        symbol,
                        snapshot: None,
                        last_close: None,
                        error: Some("timed out".to_string()),
                        data_quality_issue: None,
                        latency_ms: timeout.as_millis() as u64,
                    },
                }
            });

            tokio::time::sleep(Duration::from_millis(self.config.poll_spacing_ms)).await;
        }

        let mut price_map = HashMap::new();
        let mut fresh_signals = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(o) => o,
                Err(e) => {
                    warn!(error = %e, "symbol task panicked");
                    continue;
                }
            };
            self.record_outcome(&outcome).await;

            if let Some(close) = outcome.last_close {
                price_map.insert(outcome.symbol.clone(), close);
            }
            if let Some(snap) = &outcome.snapshot {
                if let Some(sig) = signal::detect(snap) {
                    fresh_signals.push((outcome.symbol.clone(), sig, snap.clone()));
                }
            }
        }

        self.simulator.update_positions(&price_map).await;

        for (symbol, sig, snap) in fresh_signals {
            if !self.simulator.can_open_position().await || self.simulator.is_open(&symbol).await {
                continue;
            }
            let (qty, sl, tp) = size_order(
                sig.side,
                snap.current_price,
                snap.tm_value,
                self.config.interval,
                self.config.position_size_usd,
                self.config.risk_reward,
            );
            let opened = self
                .simulator
                .open_position(symbol.clone(), sig.side, self.config.interval, snap.current_price, qty, sl, tp, &snap)
                .await;
            if opened {
                let mut status = self.status.write().await;
                status.total_signals += 1;
                if let Some(s) = status.symbols.get_mut(&symbol) {
                    s.latched_signal = Some(sig.side);
                }
            }
        }
    }

    async fn record_outcome(&self, outcome: &SymbolOutcome) {
        let mut status = self.status.write().await;
        status.total_updates += 1;
        let entry = status.symbols.entry(outcome.symbol.clone()).or_default();

        match &outcome.error {
            Some(err) => {
                entry.error_count += 1;
                entry.last_error = Some(err.clone());
                entry.last_error_at = Some(Utc::now());
                status.total_errors += 1;
                if entry.error_count >= self.config.max_errors_per_symbol {
                    entry.state = SymbolState::Error;
                }
            }
            None => {
                entry.update_count += 1;
                entry.last_snapshot = outcome.snapshot.clone();
                entry.last_latency_ms = Some(outcome.latency_ms);
                if entry.state == SymbolState::Error {
                    entry.state = SymbolState::Active;
                }
                if let Some(snap) = &outcome.snapshot {
                    if let Some(side) = entry.latched_signal {
                        if !signal::still_supported(side, snap) {
                            entry.latched_signal = None;
                        }
                    }
                }

                match &outcome.data_quality_issue {
                    Some(issue) => {
                        entry.error_count += 1;
                        entry.last_error = Some(issue.clone());
                        entry.last_error_at = Some(Utc::now());
                        status.total_errors += 1;
                        if entry.error_count >= self.config.max_errors_per_symbol {
                            entry.state = SymbolState::Error;
                        }
                    }
                    None => entry.error_count = 0,
                }
            }
        }
    }

    /// Reactivate symbols that have sat in ERROR for longer than
    /// `error_reset_minutes` with no further errors (spec §4.5 step 2).
    /// Quarantined symbols are excluded from `process_symbol` fan-out, so
    /// this runs as its own pass each cycle rather than inside
    /// `record_outcome`, which never observes them again while quarantined.
    async fn reset_expired_errors(&self) {
        let mut status = self.status.write().await;
        for entry in status.symbols.values_mut() {
            if entry.state != SymbolState::Error {
                continue;
            }
            if let Some(last_error_at) = entry.last_error_at {
                let elapsed = Utc::now() - last_error_at;
                if elapsed > chrono::Duration::minutes(self.config.error_reset_minutes) {
                    entry.state = SymbolState::Active;
                    entry.error_count = 0;
                }
            }
        }
    }
}

/// `processSymbol(S)` steps a-f: fetch candles, compute indicators, detect
/// fresh signal context (invalidation is applied by the caller against the
/// latched marker), record latency implicitly via tracing spans.
async fn process_symbol(
    symbol: Symbol,
    exchange: Arc<ExchangeClient>,
    cache: Arc<CandleCache>,
    interval: Interval,
    limit: usize,
    trend_params: TrendLineParams,
    squeeze_params: SqueezeParams,
) -> SymbolOutcome {
    let started = tokio::time::Instant::now();
    let request = DataRequest::new(symbol.clone(), interval, limit);

    let series = match cache.get(&request).await {
        Some(series) => series,
        None => match exchange.fetch_candles(&symbol, interval, limit).await {
            Ok(series) => {
                cache.put(&request, series.clone(), None).await;
                series
            }
            Err(e) => {
                return SymbolOutcome {
                    symbol,
                    snapshot: None,
                    last_close: None,
                    error: Some(e.to_string()),
                    data_quality_issue: None,
                    latency_ms: started.elapsed().as_millis() as u64,
                };
            }
        },
    };

    if series.candles.is_empty() {
        return SymbolOutcome {
            symbol,
            snapshot: None,
            last_close: None,
            error: Some("empty candle series".to_string()),
            data_quality_issue: None,
            latency_ms: started.elapsed().as_millis() as u64,
        };
    }

    // §7 DataQuality: a sparse series is non-fatal, but a completeness ratio
    // below 0.7 still counts toward the symbol's error budget.
    let completeness = series.completeness();
    let data_quality_issue = if completeness < 0.7 {
        Some(format!("completeness ratio {completeness:.2} below 0.7"))
    } else {
        None
    };

    let open: Vec<f64> = series.candles.iter().map(|c| c.open).collect();
    let high: Vec<f64> = series.candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = series.candles.iter().map(|c| c.low).collect();
    let close: Vec<f64> = series.candles.iter().map(|c| c.close).collect();
    let timestamp = series.candles.last().map(|c| c.open_time).unwrap_or_else(Utc::now);
    let last_close = close.last().copied();

    let snapshot = indicators::compute_snapshot(&open, &high, &low, &close, timestamp, trend_params, squeeze_params);

    SymbolOutcome {
        symbol,
        snapshot: Some(snapshot),
        last_close,
        error: None,
        data_quality_issue,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_score_is_one_with_no_symbols() {
        let status = MonitoringStatus {
            state: SchedulerState::Stopped,
            start_time: None,
            symbols: HashMap::new(),
            total_updates: 0,
            total_signals: 0,
            total_errors: 0,
        };
        assert_eq!(status.health_score(), 1.0);
    }

    #[test]
    fn health_score_drops_with_errored_symbols() {
        let mut symbols = HashMap::new();
        symbols.insert(
            Symbol::new("BTCUSDT"),
            SymbolStatus {
                state: SymbolState::Error,
                ..Default::default()
            },
        );
        symbols.insert(Symbol::new("ETHUSDT"), SymbolStatus::default());
        let status = MonitoringStatus {
            state: SchedulerState::Running,
            start_time: None,
            symbols,
            total_updates: 10,
            total_signals: 0,
            total_errors: 2,
        };
        assert!(status.health_score() < 1.0);
    }

    #[tokio::test]
    async fn new_rejects_empty_symbol_list() {
        let exchange = Arc::new(ExchangeClient::new(crate::common::RateLimiter::with_defaults()));
        let cache = Arc::new(CandleCache::new(10, 60));
        let store = crate::store::TradeStore::new_in_memory().await.unwrap();
        let simulator = Arc::new(Simulator::new(10_000.0, 5, 0.001, 0.001, Arc::new(store)));
        let config = SchedulerConfig::default();
        assert!(Scheduler::new(config, exchange, cache, simulator).is_err());
    }

    #[tokio::test]
    async fn pause_symbol_excludes_it_and_resume_restores_it() {
        let exchange = Arc::new(ExchangeClient::new(crate::common::RateLimiter::with_defaults()));
        let cache = Arc::new(CandleCache::new(10, 60));
        let store = crate::store::TradeStore::new_in_memory().await.unwrap();
        let simulator = Arc::new(Simulator::new(10_000.0, 5, 0.001, 0.001, Arc::new(store)));
        let symbol = Symbol::new("BTCUSDT");
        let mut config = SchedulerConfig::default();
        config.symbols = vec![symbol.clone()];
        let scheduler = Scheduler::new(config, exchange, cache, simulator).unwrap();

        scheduler.pause_symbol(&symbol).await;
        let status = scheduler.status().await;
        assert_eq!(status.symbols.get(&symbol).unwrap().state, SymbolState::Paused);

        scheduler.resume_symbol(&symbol).await;
        let status = scheduler.status().await;
        assert_eq!(status.symbols.get(&symbol).unwrap().state, SymbolState::Active);
    }

    #[tokio::test]
    async fn reset_expired_errors_reactivates_stale_quarantine() {
        let exchange = Arc::new(ExchangeClient::new(crate::common::RateLimiter::with_defaults()));
        let cache = Arc::new(CandleCache::new(10, 60));
        let store = crate::store::TradeStore::new_in_memory().await.unwrap();
        let simulator = Arc::new(Simulator::new(10_000.0, 5, 0.001, 0.001, Arc::new(store)));
        let symbol = Symbol::new("BTCUSDT");
        let mut config = SchedulerConfig::default();
        config.symbols = vec![symbol.clone()];
        config.error_reset_minutes = 30;
        let scheduler = Scheduler::new(config, exchange, cache, simulator).unwrap();

        {
            let mut status = scheduler.status.write().await;
            let entry = status.symbols.get_mut(&symbol).unwrap();
            entry.state = SymbolState::Error;
            entry.error_count = 5;
            entry.last_error_at = Some(Utc::now() - chrono::Duration::minutes(31));
        }

        scheduler.reset_expired_errors().await;

        let status = scheduler.status().await;
        let entry = status.symbols.get(&symbol).unwrap();
        assert_eq!(entry.state, SymbolState::Active);
        assert_eq!(entry.error_count, 0);
    }

    #[tokio::test]
    async fn reset_expired_errors_leaves_recent_quarantine_untouched() {
        let exchange = Arc::new(ExchangeClient::new(crate::common::RateLimiter::with_defaults()));
        let cache = Arc::new(CandleCache::new(10, 60));
        let store = crate::store::TradeStore::new_in_memory().await.unwrap();
        let simulator = Arc::new(Simulator::new(10_000.0, 5, 0.001, 0.001, Arc::new(store)));
        let symbol = Symbol::new("BTCUSDT");
        let mut config = SchedulerConfig::default();
        config.symbols = vec![symbol.clone()];
        config.error_reset_minutes = 30;
        let scheduler = Scheduler::new(config, exchange, cache, simulator).unwrap();

        {
            let mut status = scheduler.status.write().await;
            let entry = status.symbols.get_mut(&symbol).unwrap();
            entry.state = SymbolState::Error;
            entry.error_count = 5;
            entry.last_error_at = Some(Utc::now() - chrono::Duration::minutes(5));
        }

        scheduler.reset_expired_errors().await;

        let status = scheduler.status().await;
        let entry = status.symbols.get(&symbol).unwrap();
        assert_eq!(entry.state, SymbolState::Error);
        assert_eq!(entry.error_count, 5);
    }
}
