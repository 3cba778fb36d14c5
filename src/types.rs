//! Core data types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data.
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("high ({high}) must be >= max(open, close) = {max_oc}")]
    HighBelowOpenClose { high: f64, max_oc: f64 },

    #[error("low ({low}) must be <= min(open, close) = {min_oc}")]
    LowAboveOpenClose { low: f64, min_oc: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One OHLCV candlestick bar for a (symbol, interval).
///
/// Invariants: `low <= min(open, close, high)`, `high >= max(open, close, low)`,
/// volumes non-negative. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
    pub trades: Option<u64>,
    pub taker_buy_base: Option<f64>,
    pub taker_buy_quote: Option<f64>,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        interval: Interval,
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            symbol,
            interval,
            open_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: None,
            trades: None,
            taker_buy_base: None,
            taker_buy_quote: None,
        };
        candle.validate()?;
        Ok(candle)
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }
        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }
        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }
        let max_oc = self.open.max(self.close);
        if self.high < max_oc {
            return Err(CandleValidationError::HighBelowOpenClose {
                high: self.high,
                max_oc,
            });
        }
        let min_oc = self.open.min(self.close);
        if self.low > min_oc {
            return Err(CandleValidationError::LowAboveOpenClose {
                low: self.low,
                min_oc,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Ordered sequence of candles for one (symbol, interval).
///
/// Invariant: `open_time` strictly ascending, no duplicates.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    pub symbol: Symbol,
    pub interval: Interval,
    pub candles: Vec<Candle>,
    pub last_updated: DateTime<Utc>,
    pub source: String,
}

impl CandleSeries {
    pub fn new(symbol: Symbol, interval: Interval, candles: Vec<Candle>, source: impl Into<String>) -> Self {
        Self {
            symbol,
            interval,
            candles,
            last_updated: Utc::now(),
            source: source.into(),
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.candles
            .windows(2)
            .all(|w| w[0].open_time < w[1].open_time)
    }

    /// Fraction of bars with no large timestamp gap relative to the interval's
    /// nominal duration, used to derive data-quality completeness.
    pub fn completeness(&self) -> f64 {
        if self.candles.len() < 2 {
            return if self.candles.is_empty() { 0.0 } else { 1.0 };
        }
        let nominal = self.interval.duration();
        let expected_gaps = self.candles.len() - 1;
        let good_gaps = self
            .candles
            .windows(2)
            .filter(|w| {
                let gap = w[1].open_time - w[0].open_time;
                gap > chrono::Duration::zero() && gap <= nominal * 2
            })
            .count();
        good_gaps as f64 / expected_gaps as f64
    }
}

/// A request for "the last `limit` candles of (symbol, interval)".
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub symbol: Symbol,
    pub interval: Interval,
    pub limit: usize,
    pub use_cache: bool,
    pub cache_staleness_budget_secs: i64,
    pub force_refresh: bool,
}

impl DataRequest {
    pub fn new(symbol: Symbol, interval: Interval, limit: usize) -> Self {
        Self {
            symbol,
            interval,
            limit,
            use_cache: true,
            cache_staleness_budget_secs: 60,
            force_refresh: false,
        }
    }

    /// Deterministic cache key: `symbol | interval | limit`.
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.symbol, self.interval.as_str(), self.limit)
    }
}

/// Accepted candlestick intervals. Bare integers normalise to minutes (`"30"` -> `30m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H8 => "8h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
        }
    }

    /// Parse an interval string, normalising bare integers to minutes.
    pub fn parse(s: &str) -> Option<Self> {
        let normalised = if s.chars().all(|c| c.is_ascii_digit()) {
            format!("{}m", s)
        } else {
            s.to_string()
        };
        match normalised.as_str() {
            "1m" => Some(Interval::M1),
            "3m" => Some(Interval::M3),
            "5m" => Some(Interval::M5),
            "15m" => Some(Interval::M15),
            "30m" => Some(Interval::M30),
            "1h" => Some(Interval::H1),
            "2h" => Some(Interval::H2),
            "4h" => Some(Interval::H4),
            "6h" => Some(Interval::H6),
            "8h" => Some(Interval::H8),
            "12h" => Some(Interval::H12),
            "1d" => Some(Interval::D1),
            _ => None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            Interval::M1 => chrono::Duration::minutes(1),
            Interval::M3 => chrono::Duration::minutes(3),
            Interval::M5 => chrono::Duration::minutes(5),
            Interval::M15 => chrono::Duration::minutes(15),
            Interval::M30 => chrono::Duration::minutes(30),
            Interval::H1 => chrono::Duration::hours(1),
            Interval::H2 => chrono::Duration::hours(2),
            Interval::H4 => chrono::Duration::hours(4),
            Interval::H6 => chrono::Duration::hours(6),
            Interval::H8 => chrono::Duration::hours(8),
            Interval::H12 => chrono::Duration::hours(12),
            Interval::D1 => chrono::Duration::days(1),
        }
    }

    /// Stop-distance multiplier used by the order-sizing collaborator.
    /// Nearest defined interval is used for anything not in the table.
    pub fn stop_multiplier(&self) -> f64 {
        match self {
            Interval::M1 => 0.003,
            Interval::M3 => 0.005,
            Interval::M5 => 0.007,
            Interval::M15 => 0.010,
            Interval::M30 => 0.015,
            Interval::H1 => 0.020,
            Interval::H2 => 0.025,
            Interval::H4 => 0.030,
            Interval::H6 => 0.038,
            Interval::H8 => 0.045,
            Interval::H12 => 0.048,
            Interval::D1 => 0.050,
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trading pair symbol using `Arc<str>` for cheap cloning.
///
/// Symbols are frequently cloned when passed between the cache, indicator
/// engine, and simulator. `Arc<str>` makes clones O(1) instead of O(n).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position / trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

// ============================================================================
// Money Type - Precise Decimal Arithmetic for Monetary Values
// ============================================================================

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Money type for precise decimal arithmetic in monetary calculations.
///
/// Wraps `rust_decimal::Decimal` to prevent floating-point drift in PnL
/// tracking across thousands of trades.
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    pub const ONE: Money = Money(Decimal::ONE);

    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::try_from(value).unwrap_or_else(|_| {
            if value.is_nan() || value.is_infinite() {
                Decimal::ZERO
            } else {
                Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
            }
        }))
    }

    pub fn to_f64(self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::hash::Hash for Money {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Mul for Money {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Money(self.0 * rhs.0)
    }
}

impl Div for Money {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        if rhs.0.is_zero() {
            Money::ZERO
        } else {
            Money(self.0 / rhs.0)
        }
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl From<f64> for Money {
    fn from(value: f64) -> Self {
        Money::from_f64(value)
    }
}

impl From<Money> for f64 {
    fn from(value: Money) -> Self {
        value.to_f64()
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> std::iter::Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn money_from_decimal_literal_is_exact() {
        let price = Money(dec!(101.5));
        assert_eq!(price.inner(), dec!(101.5));
    }

    #[test]
    fn money_handles_decimal_precision() {
        let a = Money::from_f64(0.1);
        let b = Money::from_f64(0.2);
        let c = Money::from_f64(0.3);
        assert_eq!(a + b, c);
    }

    #[test]
    fn money_div_by_zero_is_zero() {
        assert_eq!(Money::from_f64(100.0) / Money::ZERO, Money::ZERO);
    }

    #[test]
    fn interval_parses_bare_integers() {
        assert_eq!(Interval::parse("30"), Some(Interval::M30));
        assert_eq!(Interval::parse("30m"), Some(Interval::M30));
        assert_eq!(Interval::parse("45"), None);
    }

    #[test]
    fn candle_rejects_high_below_close() {
        let symbol = Symbol::new("BTCUSDT");
        let err = Candle::new(symbol, Interval::M1, Utc::now(), 100.0, 100.0, 99.0, 101.0, 1.0);
        assert!(err.is_err());
    }

    #[test]
    fn data_request_cache_key_is_deterministic() {
        let req = DataRequest::new(Symbol::new("ETHUSDT"), Interval::H1, 100);
        assert_eq!(req.cache_key(), "ETHUSDT|1h|100");
    }

    fn candle_at(minute: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(
            Symbol::new("BTCUSDT"),
            Interval::M1,
            Utc::now() + chrono::Duration::minutes(minute),
            o,
            h,
            l,
            c,
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn completeness_is_one_with_no_gaps() {
        let candles: Vec<Candle> = (0..5).map(|i| candle_at(i, 100.0, 101.0, 99.0, 100.5)).collect();
        let series = CandleSeries::new(Symbol::new("BTCUSDT"), Interval::M1, candles, "test");
        assert!((series.completeness() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn completeness_drops_with_large_timestamp_gaps() {
        let mut candles = vec![candle_at(0, 100.0, 101.0, 99.0, 100.5)];
        candles.push(candle_at(1, 100.0, 101.0, 99.0, 100.5));
        candles.push(candle_at(50, 100.0, 101.0, 99.0, 100.5));
        let series = CandleSeries::new(Symbol::new("BTCUSDT"), Interval::M1, candles, "test");
        assert!(series.completeness() < 0.7);
    }
}
