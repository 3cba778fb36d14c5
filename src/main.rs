//! Trendsqueeze engine - main entry point
//!
//! A single `monitor` subcommand wires together the exchange client,
//! candle cache, paper-trading simulator, and trade store behind the
//! monitoring scheduler, then blocks until `Ctrl+C`. Screen drawing,
//! desktop notifications, Telegram alerts, and CSV export remain external
//! collaborators (spec §1) and are not implemented here.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trendsqueeze_engine::cache::CandleCache;
use trendsqueeze_engine::common::RateLimiter;
use trendsqueeze_engine::config::Config;
use trendsqueeze_engine::exchange::ExchangeClient;
use trendsqueeze_engine::oms::Simulator;
use trendsqueeze_engine::scheduler::{Scheduler, SchedulerConfig};
use trendsqueeze_engine::store::TradeStore;

#[derive(Parser, Debug)]
#[command(name = "trendsqueeze-engine")]
#[command(about = "Real-time multi-symbol signal detection and paper-trading engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitoring scheduler until Ctrl+C
    Monitor {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: String,

        /// Trade store (SQLite) path
        #[arg(long, default_value = "trendsqueeze.db")]
        state_db: String,
    },
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .init();

    Ok(())
}

async fn run_monitor(config_path: String, state_db: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let limiter = RateLimiter::new(trendsqueeze_engine::common::RateLimiterConfig {
        max_requests: config.exchange.max_requests_per_minute,
        max_weight: config.exchange.max_weight_per_minute,
        window: std::time::Duration::from_secs(60),
    });
    let exchange = Arc::new(ExchangeClient::new(limiter));
    let cache = Arc::new(CandleCache::new(
        config.cache.max_size_mb,
        config.cache.default_ttl_seconds,
    ));
    let _janitor = cache.spawn_janitor();

    let store = Arc::new(TradeStore::open(&state_db).await?);
    let simulator = Arc::new(Simulator::new(
        config.trading.initial_balance,
        config.trading.max_positions,
        config.exchange.maker_fee,
        config.exchange.taker_fee,
        Arc::clone(&store),
    ));
    simulator.set_auto_close_on_target(config.trading.auto_close_on_target);

    let scheduler_config = SchedulerConfig {
        symbols: config.trading.symbols(),
        interval: config.interval(),
        candles_limit: config.trading.candles_limit,
        cycle_seconds: config.scheduler.cycle_seconds,
        per_symbol_timeout_secs: config.scheduler.per_symbol_timeout_seconds,
        max_inflight: config.scheduler.max_inflight,
        max_errors_per_symbol: config.scheduler.max_errors_per_symbol,
        error_reset_minutes: config.scheduler.error_reset_minutes,
        poll_spacing_ms: config.scheduler.poll_spacing_ms,
        max_concurrent_symbols: config.scheduler.max_concurrent_symbols,
        position_size_usd: config.trading.position_size,
        risk_reward: config.trading.risk_reward,
        trend_params: config.trend_params(),
        squeeze_params: config.squeeze_params(),
    };

    let scheduler = Arc::new(Scheduler::new(scheduler_config, exchange, cache, simulator)?);

    info!(
        symbols = ?config.trading.symbols,
        interval = %config.trading.interval,
        "starting monitoring scheduler"
    );
    scheduler.run().await;
    info!("monitoring scheduler stopped");
    Ok(())
}

fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;

    match cli.command {
        Commands::Monitor { config, state_db } => runtime.block_on(run_monitor(config, state_db)),
    }
}
