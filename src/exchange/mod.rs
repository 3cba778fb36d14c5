//! Exchange market-data client (component A).
//!
//! Contract: `fetch_candles(symbol, interval, limit) -> CandleSeries | CoreError`.
//! Bounded retries (3 attempts) on `Transient` failures; `InvalidSymbol` and
//! `RateLimited` are not retried internally and are surfaced to the caller.

pub mod types;

use crate::common::RateLimiter;
use crate::error::CoreError;
use crate::types::{CandleSeries, Interval, Symbol};
use std::time::Duration;
use tracing::{debug, warn};
use types::{parse_kline_row, ExchangeInfo, Ticker24h};

const DEFAULT_BASE_URL: &str = "https://api.binance.com/api/v3";
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Weight charged per kline request, matching Binance's published weight
/// table for `limit <= 1000`.
const KLINES_WEIGHT: usize = 2;

pub struct ExchangeClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl ExchangeClient {
    pub fn new(limiter: RateLimiter) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, limiter)
    }

    pub fn with_base_url(base_url: impl Into<String>, limiter: RateLimiter) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            limiter,
        }
    }

    /// Fetch the last `limit` candles of (symbol, interval), with bounded
    /// retries on transient failures and rate-limit respecting waits.
    pub async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<CandleSeries, CoreError> {
        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            let start = std::time::Instant::now();
            match self.fetch_candles_once(symbol, interval, limit).await {
                Ok(series) => {
                    debug!(
                        symbol = %symbol,
                        interval = %interval,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "fetched candles"
                    );
                    return Ok(series);
                }
                Err(CoreError::InvalidSymbol(s)) => return Err(CoreError::InvalidSymbol(s)),
                Err(CoreError::RateLimited { retry_after_secs }) => {
                    warn!(symbol = %symbol, wait_secs = retry_after_secs, "rate limited, waiting");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    last_err = Some(CoreError::RateLimited { retry_after_secs });
                }
                Err(e) => {
                    warn!(symbol = %symbol, attempt, error = %e, "transient fetch failure");
                    last_err = Some(e);
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::Transient("exhausted retries".into())))
    }

    async fn fetch_candles_once(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: usize,
    ) -> Result<CandleSeries, CoreError> {
        self.limiter.acquire(KLINES_WEIGHT).await;

        let url = format!("{}/klines", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", interval.as_str()),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(CoreError::from)?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(CoreError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if response.status().as_u16() == 400 || response.status().as_u16() == 404 {
            let body = response.text().await.unwrap_or_default();
            if body.contains("Invalid symbol") || body.contains("invalid symbol") {
                return Err(CoreError::InvalidSymbol(symbol.to_string()));
            }
            return Err(CoreError::Transient(format!("upstream 4xx: {body}")));
        }

        if response.status().is_server_error() {
            return Err(CoreError::Transient(format!(
                "upstream {}",
                response.status()
            )));
        }

        let rows: Vec<Vec<serde_json::Value>> = response.json().await.map_err(CoreError::from)?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            candles.push(parse_kline_row(symbol, interval, row)?);
        }

        Ok(CandleSeries::new(
            symbol.clone(),
            interval,
            candles,
            "binance".to_string(),
        ))
    }

    pub async fn ping(&self) -> Result<bool, CoreError> {
        self.limiter.acquire(1).await;
        let url = format!("{}/ping", self.base_url);
        let response = self.http.get(&url).send().await.map_err(CoreError::from)?;
        Ok(response.status().is_success())
    }

    pub async fn exchange_info(&self) -> Result<ExchangeInfo, CoreError> {
        self.limiter.acquire(10).await;
        let url = format!("{}/exchangeInfo", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .map_err(CoreError::from)?
            .json()
            .await
            .map_err(CoreError::from)
    }

    pub async fn ticker_24h(&self, symbol: &Symbol) -> Result<Ticker24h, CoreError> {
        self.limiter.acquire(1).await;
        let url = format!("{}/ticker/24hr", self.base_url);
        self.http
            .get(&url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await
            .map_err(CoreError::from)?
            .json()
            .await
            .map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RateLimiterConfig;

    fn test_limiter() -> RateLimiter {
        RateLimiter::new(RateLimiterConfig::default())
    }

    #[test]
    fn constructs_with_default_base_url() {
        let client = ExchangeClient::new(test_limiter());
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
