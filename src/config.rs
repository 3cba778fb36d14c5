//! Engine configuration (§6): loading and validating the enumerated
//! configuration surface from a JSON file, with exchange credentials
//! injected from the environment the way the teacher's config loader
//! injects `COINDCX_API_KEY`/`COINDCX_API_SECRET`.

use crate::error::CoreError;
use crate::indicators::{SqueezeParams, TrendLineParams};
use crate::types::{Interval, Symbol};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level engine configuration, loaded via [`Config::from_file`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    pub scheduler: SchedulerSettings,
}

impl Config {
    /// Load configuration from a JSON file and inject credentials from the
    /// environment. Credentials are never logged.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::InvalidInput(format!("failed to read config file: {e}")))?;
        let mut config: Config = serde_json::from_str(&contents)
            .map_err(|e| CoreError::InvalidInput(format!("failed to parse config JSON: {e}")))?;

        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            config.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            config.exchange.api_secret = Some(api_secret);
        }

        config.validate()?;
        Ok(config)
    }

    /// Enforce the bounds spec §6 states. Fatal at startup on violation.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.trading.symbols.is_empty() {
            return Err(CoreError::InvalidInput("symbols must be non-empty".into()));
        }
        if self.trading.symbols.len() > self.scheduler.max_concurrent_symbols {
            return Err(CoreError::InvalidInput(format!(
                "{} symbols exceeds maxConcurrentSymbols {}",
                self.trading.symbols.len(),
                self.scheduler.max_concurrent_symbols
            )));
        }
        if Interval::parse(&self.trading.interval).is_none() {
            return Err(CoreError::InvalidInput(format!(
                "unsupported interval: {}",
                self.trading.interval
            )));
        }
        if !(20..=1500).contains(&self.trading.candles_limit) {
            return Err(CoreError::InvalidInput(
                "candlesLimit must be in [20, 1500]".into(),
            ));
        }
        if !(1..=20).contains(&self.trading.max_positions) {
            return Err(CoreError::InvalidInput(
                "maxPositions must be in [1, 20]".into(),
            ));
        }
        if !(0.1..=10.0).contains(&self.trading.max_risk_per_trade_pct) {
            return Err(CoreError::InvalidInput(
                "maxRiskPerTrade must be in [0.1, 10] percent".into(),
            ));
        }
        if self.trading.position_size <= 0.0 {
            return Err(CoreError::InvalidInput(
                "positionSize must be positive".into(),
            ));
        }
        if !(1..=4096).contains(&self.cache.max_size_mb) {
            return Err(CoreError::InvalidInput(
                "cache.maxSizeMB must be in [1, 4096]".into(),
            ));
        }
        if !(10..=3600).contains(&self.cache.default_ttl_seconds) {
            return Err(CoreError::InvalidInput(
                "cache.defaultTTLSeconds must be in [10, 3600]".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Interval {
        Interval::parse(&self.trading.interval).expect("validated at load time")
    }

    pub fn trend_params(&self) -> TrendLineParams {
        TrendLineParams {
            cci_period: self.indicators.cci_period,
            coeff: self.indicators.coeff,
            atr_period: self.indicators.atr_period,
        }
    }

    pub fn squeeze_params(&self) -> SqueezeParams {
        SqueezeParams {
            bb_length: self.indicators.bb_length,
            bb_mult: self.indicators.bb_mult,
            kc_length: self.indicators.kc_length,
            kc_mult: self.indicators.kc_mult,
            use_true_range: self.indicators.use_true_range,
        }
    }
}

/// Exchange connection and fee configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub max_requests_per_minute: usize,
    pub max_weight_per_minute: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            maker_fee: 0.0004,
            taker_fee: 0.0005,
            max_requests_per_minute: 1200,
            max_weight_per_minute: 6000,
        }
    }
}

/// Active trading universe and position/sizing bounds (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub interval: String,
    #[serde(default = "default_candles_limit")]
    pub candles_limit: usize,
    pub initial_balance: f64,
    pub max_positions: usize,
    pub max_risk_per_trade_pct: f64,
    pub position_size: f64,
    #[serde(default = "default_risk_reward")]
    pub risk_reward: f64,
    #[serde(default = "default_true")]
    pub auto_close_on_target: bool,
}

fn default_candles_limit() -> usize {
    100
}
fn default_risk_reward() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            interval: "5m".to_string(),
            candles_limit: default_candles_limit(),
            initial_balance: 10_000.0,
            max_positions: 5,
            max_risk_per_trade_pct: 1.0,
            position_size: 100.0,
            risk_reward: default_risk_reward(),
            auto_close_on_target: true,
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Candle cache bounds (§4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_size_mb: usize,
    pub default_ttl_seconds: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            default_ttl_seconds: 60,
        }
    }
}

/// Indicator parameters (§4.2). `cci_period` defaults to 20 per spec.md;
/// the production scheduler may select 100 via this same field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub cci_period: usize,
    pub coeff: f64,
    pub atr_period: usize,
    pub bb_length: usize,
    pub bb_mult: f64,
    pub kc_length: usize,
    pub kc_mult: f64,
    pub use_true_range: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            cci_period: 20,
            coeff: 1.0,
            atr_period: 5,
            bb_length: 20,
            bb_mult: 2.0,
            kc_length: 20,
            kc_mult: 1.5,
            use_true_range: true,
        }
    }
}

/// Monitoring scheduler timings and concurrency bounds (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: u64,
    #[serde(default = "default_per_symbol_timeout")]
    pub per_symbol_timeout_seconds: u64,
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    #[serde(default = "default_max_errors")]
    pub max_errors_per_symbol: u32,
    #[serde(default = "default_error_reset_minutes")]
    pub error_reset_minutes: i64,
    #[serde(default = "default_poll_spacing_ms")]
    pub poll_spacing_ms: u64,
    #[serde(default = "default_max_concurrent_symbols")]
    pub max_concurrent_symbols: usize,
}

fn default_cycle_seconds() -> u64 {
    60
}
fn default_per_symbol_timeout() -> u64 {
    30
}
fn default_max_inflight() -> usize {
    10
}
fn default_max_errors() -> u32 {
    5
}
fn default_error_reset_minutes() -> i64 {
    30
}
fn default_poll_spacing_ms() -> u64 {
    100
}
fn default_max_concurrent_symbols() -> usize {
    50
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cycle_seconds: default_cycle_seconds(),
            per_symbol_timeout_seconds: default_per_symbol_timeout(),
            max_inflight: default_max_inflight(),
            max_errors_per_symbol: default_max_errors(),
            error_reset_minutes: default_error_reset_minutes(),
            poll_spacing_ms: default_poll_spacing_ms(),
            max_concurrent_symbols: default_max_concurrent_symbols(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            trading: TradingConfig::default(),
            cache: CacheConfig::default(),
            indicators: IndicatorConfig::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_symbols() {
        let mut config = Config::default();
        config.trading.symbols.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_interval() {
        let mut config = Config::default();
        config.trading.interval = "45m".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_candles_limit_out_of_bounds() {
        let mut config = Config::default();
        config.trading.candles_limit = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_too_many_symbols_for_concurrency_bound() {
        let mut config = Config::default();
        config.scheduler.max_concurrent_symbols = 1;
        config.trading.symbols = vec!["A".to_string(), "B".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn trading_config_symbols_converts_to_symbol_type() {
        let config = Config::default();
        assert!(!config.trading.symbols().is_empty());
    }
}
