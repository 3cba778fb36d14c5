//! Wire types for the Binance-style REST market-data endpoints.

use crate::error::CoreError;
use crate::types::{Candle, Interval, Symbol};
use chrono::{DateTime, Utc};

/// One row of `/api/v3/klines`, consumed by index as the upstream contract
/// specifies: `[0] openTime, [1] open, [2] high, [3] low, [4] close,
/// [5] volume, [7] quoteVolume, [8] trades, [9] takerBuyBase,
/// [10] takerBuyQuote`.
pub fn parse_kline_row(
    symbol: &Symbol,
    interval: Interval,
    row: &[serde_json::Value],
) -> Result<Candle, CoreError> {
    if row.len() < 11 {
        return Err(CoreError::DataQuality(format!(
            "kline row has {} fields, expected >= 11",
            row.len()
        )));
    }

    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| CoreError::DataQuality("openTime not an integer".into()))?;
    let open_time = DateTime::from_timestamp_millis(open_time_ms)
        .ok_or_else(|| CoreError::DataQuality("openTime out of range".into()))?;

    let parse_f = |v: &serde_json::Value, field: &str| -> Result<f64, CoreError> {
        v.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| v.as_f64())
            .ok_or_else(|| CoreError::DataQuality(format!("{field} not numeric")))
    };

    let open = parse_f(&row[1], "open")?;
    let high = parse_f(&row[2], "high")?;
    let low = parse_f(&row[3], "low")?;
    let close = parse_f(&row[4], "close")?;
    let volume = parse_f(&row[5], "volume")?;
    let quote_volume = parse_f(&row[7], "quoteVolume").ok();
    let trades = row[8].as_u64();
    let taker_buy_base = parse_f(&row[9], "takerBuyBase").ok();
    let taker_buy_quote = parse_f(&row[10], "takerBuyQuote").ok();

    Ok(Candle {
        symbol: symbol.clone(),
        interval,
        open_time,
        open,
        high,
        low,
        close,
        volume,
        quote_volume,
        trades,
        taker_buy_base,
        taker_buy_quote,
    })
}

/// Response shape of `/api/v3/ticker/24hr`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    #[serde(rename = "lastPrice")]
    pub last_price: String,
    pub volume: String,
}

/// One entry of `/api/v3/exchangeInfo`'s `symbols` array, trimmed to the
/// fields the client needs to validate a requested symbol.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_and_string_fields() {
        let row = vec![
            serde_json::json!(1_700_000_000_000i64),
            serde_json::json!("100.5"),
            serde_json::json!("105.0"),
            serde_json::json!("99.0"),
            serde_json::json!("102.0"),
            serde_json::json!("1000.0"),
            serde_json::json!(1_700_000_060_000i64),
            serde_json::json!("102000.0"),
            serde_json::json!(42),
            serde_json::json!("500.0"),
            serde_json::json!("51000.0"),
        ];
        let candle = parse_kline_row(&Symbol::new("BTCUSDT"), Interval::M1, &row).unwrap();
        assert_eq!(candle.open, 100.5);
        assert_eq!(candle.trades, Some(42));
    }

    #[test]
    fn rejects_short_rows() {
        let row = vec![serde_json::json!(1)];
        assert!(parse_kline_row(&Symbol::new("BTCUSDT"), Interval::M1, &row).is_err());
    }
}
