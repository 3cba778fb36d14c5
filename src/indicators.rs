//! Indicator engine (component C): pure, deterministic, stateless functions
//! over flat OHLCV slices.
//!
//! Two chained indicators are computed: a CCI+ATR "trend line" (§4.2.1) and
//! a Bollinger/Keltner "squeeze momentum" (§4.2.2). [`compute_snapshot`]
//! ties both together into one canonical [`IndicatorSnapshot`], collapsing
//! what upstream sources keep as several numerically-equivalent variants.

use chrono::{DateTime, Utc};

/// Simple Moving Average.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }
    result
}

/// Population standard deviation over a trailing window.
pub fn stdev(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let means = sma(values, period);
    let mut result = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        match means[i] {
            Some(mean) if i + 1 >= period => {
                let window = &values[i + 1 - period..=i];
                let variance: f64 =
                    window.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / period as f64;
                result.push(Some(variance.sqrt()));
            }
            _ => result.push(None),
        }
    }
    result
}

/// Exponential Moving Average.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());
    if values.is_empty() || period == 0 {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i < period - 1 {
            result.push(None);
        } else if i == period - 1 {
            let sum: f64 = values[0..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev_ema) = ema_value {
            let new_ema = (value - prev_ema) * multiplier + prev_ema;
            ema_value = Some(new_ema);
            result.push(Some(new_ema));
        }
    }
    result
}

/// True Range.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());
    for i in 0..high.len() {
        let tr_value = if i == 0 {
            high[i] - low[i]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(tr_value);
    }
    tr
}

/// Average True Range, as the SMA of True Range over `period` (§4.2.1 step 1).
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let tr = true_range(high, low, close);
    sma(&tr, period)
}

/// Commodity Channel Index.
pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let typical: Vec<f64> = (0..high.len())
        .map(|i| (high[i] + low[i] + close[i]) / 3.0)
        .collect();
    let basis = sma(&typical, period);

    let mut result = Vec::with_capacity(typical.len());
    for i in 0..typical.len() {
        match basis[i] {
            Some(mean) if i + 1 >= period => {
                let window = &typical[i + 1 - period..=i];
                let mean_dev: f64 =
                    window.iter().map(|&x| (x - mean).abs()).sum::<f64>() / period as f64;
                if mean_dev.abs() < f64::EPSILON {
                    result.push(Some(0.0));
                } else {
                    result.push(Some((typical[i] - mean) / (0.015 * mean_dev)));
                }
            }
            _ => result.push(None),
        }
    }
    result
}

/// Ordinary-least-squares slope and intercept of `y` against `0..y.len()`.
pub fn linreg(y: &[f64]) -> (f64, f64) {
    let n = y.len() as f64;
    if y.is_empty() {
        return (0.0, 0.0);
    }
    let sum_x: f64 = (0..y.len()).map(|i| i as f64).sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = y.iter().enumerate().map(|(i, &v)| i as f64 * v).sum();
    let sum_xx: f64 = (0..y.len()).map(|i| (i as f64).powi(2)).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return (0.0, sum_y / n);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

/// Trend-line colour, §4.2.1 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TrendColor {
    Blue,
    Red,
}

/// Squeeze-momentum colour, §4.2.2 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MomentumColor {
    Lime,
    Green,
    Red,
    Maroon,
}

/// Squeeze compression state, §4.2.2 step 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SqueezeState {
    On,
    Off,
    None,
}

/// Parameters for the trend-line (CCI + ATR band) computation.
#[derive(Debug, Clone, Copy)]
pub struct TrendLineParams {
    pub cci_period: usize,
    pub coeff: f64,
    pub atr_period: usize,
}

impl Default for TrendLineParams {
    fn default() -> Self {
        Self {
            cci_period: 20,
            coeff: 1.0,
            atr_period: 5,
        }
    }
}

/// Parameters for the Bollinger/Keltner squeeze momentum computation.
#[derive(Debug, Clone, Copy)]
pub struct SqueezeParams {
    pub bb_length: usize,
    pub bb_mult: f64,
    pub kc_length: usize,
    pub kc_mult: f64,
    pub use_true_range: bool,
}

impl Default for SqueezeParams {
    fn default() -> Self {
        Self {
            bb_length: 20,
            bb_mult: 2.0,
            kc_length: 20,
            kc_mult: 1.5,
            use_true_range: true,
        }
    }
}

/// Per-bar trend-line values plus the final snapshot fields.
pub struct TrendLine {
    pub magic: Vec<f64>,
    pub cci: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
    pub color: Vec<TrendColor>,
}

/// §4.2.1: the monotone max/min recurrence gated by CCI sign.
pub fn trend_magic(high: &[f64], low: &[f64], close: &[f64], params: TrendLineParams) -> TrendLine {
    let n = high.len();
    let atr_values = atr(high, low, close, params.atr_period);
    let cci_values = cci(high, low, close, params.cci_period);

    let mut magic = vec![0.0; n];
    let mut color = Vec::with_capacity(n);

    for i in 0..n {
        let cci_i = cci_values[i].unwrap_or(0.0);
        color.push(if cci_i > 0.0 {
            TrendColor::Blue
        } else {
            TrendColor::Red
        });

        let atr_i = atr_values[i];
        let (upper, lower) = match atr_i {
            Some(a) => (low[i] - a * params.coeff, high[i] + a * params.coeff),
            None => (f64::NAN, f64::NAN),
        };

        magic[i] = if atr_i.is_none() {
            if i == 0 {
                0.0
            } else {
                magic[i - 1]
            }
        } else if cci_i >= 0.0 {
            if i == 0 {
                upper
            } else {
                upper.max(magic[i - 1])
            }
        } else if i == 0 {
            lower
        } else {
            lower.min(magic[i - 1])
        };
    }

    TrendLine {
        magic,
        cci: cci_values,
        atr: atr_values,
        color,
    }
}

/// Crossing flags on the final candle, evaluated over the last two bars (§4.2.1).
pub fn detect_crossing(low: &[f64], high: &[f64], magic: &[f64]) -> (bool, bool) {
    let n = magic.len();
    if n < 2 {
        return (false, false);
    }
    let buy_cross = low[n - 2] <= magic[n - 2] && low[n - 1] > magic[n - 1];
    let sell_cross = high[n - 2] >= magic[n - 2] && high[n - 1] < magic[n - 1];
    (buy_cross, sell_cross)
}

pub struct SqueezeMomentum {
    pub squeeze_state: Vec<SqueezeState>,
    pub momentum_value: Vec<f64>,
    pub momentum_color: Vec<MomentumColor>,
}

/// §4.2.2: Bollinger-vs-Keltner compression state and OLS-fitted momentum.
pub fn squeeze_momentum(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    params: SqueezeParams,
) -> SqueezeMomentum {
    let n = close.len();

    let basis = sma(close, params.bb_length);
    let bb_dev = stdev(close, params.bb_length);
    let mut upper_bb = vec![None; n];
    let mut lower_bb = vec![None; n];
    for i in 0..n {
        if let (Some(b), Some(d)) = (basis[i], bb_dev[i]) {
            upper_bb[i] = Some(b + params.bb_mult * d);
            lower_bb[i] = Some(b - params.bb_mult * d);
        }
    }

    let kc_ma = sma(close, params.kc_length);
    let range_source: Vec<f64> = if params.use_true_range {
        true_range(high, low, close)
    } else {
        (0..n).map(|i| high[i] - low[i]).collect()
    };
    let kc_range = sma(&range_source, params.kc_length);

    let mut upper_kc = vec![None; n];
    let mut lower_kc = vec![None; n];
    for i in 0..n {
        if let (Some(ma), Some(r)) = (kc_ma[i], kc_range[i]) {
            upper_kc[i] = Some(ma + params.kc_mult * r);
            lower_kc[i] = Some(ma - params.kc_mult * r);
        }
    }

    let mut squeeze_state = Vec::with_capacity(n);
    for i in 0..n {
        let state = match (upper_bb[i], lower_bb[i], upper_kc[i], lower_kc[i]) {
            (Some(ub), Some(lb), Some(uk), Some(lk)) => {
                if lb > lk && ub < uk {
                    SqueezeState::On
                } else if lb < lk && ub > uk {
                    SqueezeState::Off
                } else {
                    SqueezeState::None
                }
            }
            _ => SqueezeState::None,
        };
        squeeze_state.push(state);
    }

    // Rolling baseline per bar: avg[j] = (avg(highest_high, lowest_low) + sma_close) / 2,
    // each over the trailing kc_length window ending at j. The linreg source is
    // close[j] - avg[j], not close[j] minus a single scalar from the latest bar.
    let mut avg = vec![f64::NAN; n];
    for j in 0..n {
        if j + 1 < params.kc_length {
            continue;
        }
        let window_start = j + 1 - params.kc_length;
        let hh = high[window_start..=j]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        let ll = low[window_start..=j]
            .iter()
            .cloned()
            .fold(f64::MAX, f64::min);
        let sma_close = match kc_ma[j] {
            Some(v) => v,
            None => continue,
        };
        avg[j] = ((hh + ll) / 2.0 + sma_close) / 2.0;
    }

    let mut momentum_value = vec![0.0; n];
    for i in 0..n {
        if i + 1 < params.kc_length {
            continue;
        }
        let window_start = i + 1 - params.kc_length;
        if avg[window_start..=i].iter().any(|v| v.is_nan()) {
            continue;
        }
        let deltas: Vec<f64> = (window_start..=i).map(|j| close[j] - avg[j]).collect();
        let (slope, intercept) = linreg(&deltas);
        momentum_value[i] = slope * (params.kc_length as f64 - 1.0) + intercept;
    }

    let mut momentum_color = Vec::with_capacity(n);
    for i in 0..n {
        let v = momentum_value[i];
        let v_prev = if i == 0 { 0.0 } else { momentum_value[i - 1] };
        let color = if v > 0.0 && v > v_prev {
            MomentumColor::Lime
        } else if v > 0.0 {
            MomentumColor::Green
        } else if v < v_prev {
            MomentumColor::Red
        } else {
            MomentumColor::Maroon
        };
        momentum_color.push(color);
    }

    SqueezeMomentum {
        squeeze_state,
        momentum_value,
        momentum_color,
    }
}

/// Result of indicator computation at the latest candle (§3 `IndicatorSnapshot`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndicatorSnapshot {
    pub tm_value: f64,
    pub tm_color: TrendColor,
    pub cci: f64,
    pub atr: f64,
    pub buy_cross: bool,
    pub sell_cross: bool,
    pub momentum_value: f64,
    pub momentum_color: MomentumColor,
    pub squeeze_state: SqueezeState,
    pub current_price: f64,
    pub open_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl serde::Serialize for TrendColor {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match self {
            TrendColor::Blue => "BLUE",
            TrendColor::Red => "RED",
        })
    }
}
impl<'de> serde::Deserialize<'de> for TrendColor {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "BLUE" => Ok(TrendColor::Blue),
            "RED" => Ok(TrendColor::Red),
            other => Err(serde::de::Error::custom(format!("unknown tm_color {other}"))),
        }
    }
}
impl serde::Serialize for MomentumColor {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match self {
            MomentumColor::Lime => "LIME",
            MomentumColor::Green => "GREEN",
            MomentumColor::Red => "RED",
            MomentumColor::Maroon => "MAROON",
        })
    }
}
impl<'de> serde::Deserialize<'de> for MomentumColor {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "LIME" => Ok(MomentumColor::Lime),
            "GREEN" => Ok(MomentumColor::Green),
            "RED" => Ok(MomentumColor::Red),
            "MAROON" => Ok(MomentumColor::Maroon),
            other => Err(serde::de::Error::custom(format!(
                "unknown momentum_color {other}"
            ))),
        }
    }
}
impl serde::Serialize for SqueezeState {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match self {
            SqueezeState::On => "ON",
            SqueezeState::Off => "OFF",
            SqueezeState::None => "NONE",
        })
    }
}
impl<'de> serde::Deserialize<'de> for SqueezeState {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "ON" => Ok(SqueezeState::On),
            "OFF" => Ok(SqueezeState::Off),
            "NONE" => Ok(SqueezeState::None),
            other => Err(serde::de::Error::custom(format!(
                "unknown squeeze_state {other}"
            ))),
        }
    }
}

/// Compute the canonical snapshot for the final candle of an OHLCV sequence.
///
/// When fewer than `max(trend.cci_period, squeeze.kc_length, squeeze.bb_length) + margin`
/// candles are available, `momentum_value` is 0.0 and colours reflect
/// whatever partial data exists (§8 boundary behaviour); this never panics.
pub fn compute_snapshot(
    open: &[f64],
    high: &[f64],
    low: &[f64],
    close: &[f64],
    timestamp: DateTime<Utc>,
    trend_params: TrendLineParams,
    squeeze_params: SqueezeParams,
) -> IndicatorSnapshot {
    let n = close.len();
    assert!(n > 0, "compute_snapshot requires at least one candle");

    let trend = trend_magic(high, low, close, trend_params);
    let squeeze = squeeze_momentum(high, low, close, squeeze_params);
    let (buy_cross, sell_cross) = detect_crossing(low, high, &trend.magic);

    IndicatorSnapshot {
        tm_value: (trend.magic[n - 1] * 1000.0).round() / 1000.0,
        tm_color: trend.color[n - 1],
        cci: trend.cci[n - 1].unwrap_or(0.0),
        atr: trend.atr[n - 1].unwrap_or(0.0),
        buy_cross,
        sell_cross,
        momentum_value: squeeze.momentum_value[n - 1],
        momentum_color: squeeze.momentum_color[n - 1],
        squeeze_state: squeeze.squeeze_state[n - 1],
        current_price: close[n - 1],
        open_price: open[n - 1],
        timestamp,
    }
}
