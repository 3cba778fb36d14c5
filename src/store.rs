//! Persistent trade store (component D, §4.4.2).
//!
//! A single SQLite file with a `trades` table mirroring `ClosedTrade` plus
//! its market-context fields. WAL journal mode + NORMAL synchronous for
//! durability without serialising every write behind an fsync. All queries
//! are parameterised; blocking rusqlite calls run on the tokio blocking
//! pool so the async scheduler never stalls on disk I/O.

use crate::error::CoreError;
use crate::indicators::{MomentumColor, TrendColor};
use crate::oms::types::{CloseReason, ClosedTrade};
use crate::types::{Interval, Money, Side, Symbol};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Long => "LONG",
        Side::Short => "SHORT",
    }
}

fn side_from_str(s: &str) -> Result<Side, CoreError> {
    match s {
        "LONG" => Ok(Side::Long),
        "SHORT" => Ok(Side::Short),
        other => Err(CoreError::DataQuality(format!("unknown side {other}"))),
    }
}

fn reason_to_str(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::TakeProfit => "TAKE_PROFIT",
        CloseReason::StopLoss => "STOP_LOSS",
        CloseReason::Manual => "MANUAL",
    }
}

fn reason_from_str(s: &str) -> Result<CloseReason, CoreError> {
    match s {
        "TAKE_PROFIT" => Ok(CloseReason::TakeProfit),
        "STOP_LOSS" => Ok(CloseReason::StopLoss),
        "MANUAL" => Ok(CloseReason::Manual),
        other => Err(CoreError::DataQuality(format!("unknown close reason {other}"))),
    }
}

fn tm_color_to_str(c: TrendColor) -> &'static str {
    match c {
        TrendColor::Blue => "BLUE",
        TrendColor::Red => "RED",
    }
}

fn tm_color_from_str(s: &str) -> Result<TrendColor, CoreError> {
    match s {
        "BLUE" => Ok(TrendColor::Blue),
        "RED" => Ok(TrendColor::Red),
        other => Err(CoreError::DataQuality(format!("unknown tm color {other}"))),
    }
}

fn momentum_color_to_str(c: MomentumColor) -> &'static str {
    match c {
        MomentumColor::Lime => "LIME",
        MomentumColor::Green => "GREEN",
        MomentumColor::Red => "RED",
        MomentumColor::Maroon => "MAROON",
    }
}

fn momentum_color_from_str(s: &str) -> Result<MomentumColor, CoreError> {
    match s {
        "LIME" => Ok(MomentumColor::Lime),
        "GREEN" => Ok(MomentumColor::Green),
        "RED" => Ok(MomentumColor::Red),
        "MAROON" => Ok(MomentumColor::Maroon),
        other => Err(CoreError::DataQuality(format!("unknown momentum color {other}"))),
    }
}

/// Per-interval trade summary (§4.4.2 required reads).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntervalSummary {
    pub interval: String,
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub avg_duration_secs: f64,
    pub total_pnl: f64,
}

fn row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<ClosedTrade> {
    let side: String = row.get("side")?;
    let reason: String = row.get("close_reason")?;
    let tm_color: String = row.get("tm_color_at_entry")?;
    let momentum_color: String = row.get("momentum_color_at_entry")?;
    let interval: String = row.get("interval")?;
    let entry_time: String = row.get("entry_time")?;
    let exit_time: String = row.get("exit_time")?;

    Ok(ClosedTrade {
        symbol: Symbol::new(row.get::<_, String>("symbol")?),
        side: side_from_str(&side).unwrap_or(Side::Long),
        interval: Interval::parse(&interval).unwrap_or(Interval::M1),
        entry_price: Money::from_f64(row.get("entry_price")?),
        quantity: Money::from_f64(row.get("quantity")?),
        stop_loss: Money::from_f64(row.get("stop_loss")?),
        take_profit: Money::from_f64(row.get("take_profit")?),
        entry_time: DateTime::parse_from_rfc3339(&entry_time)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        entry_commission: Money::from_f64(row.get("entry_commission")?),
        tm_value_at_entry: Money::from_f64(row.get("tm_value_at_entry")?),
        tm_color_at_entry: tm_color_from_str(&tm_color).unwrap_or(TrendColor::Blue),
        momentum_color_at_entry: momentum_color_from_str(&momentum_color).unwrap_or(MomentumColor::Lime),
        exit_price: Money::from_f64(row.get("exit_price")?),
        exit_time: DateTime::parse_from_rfc3339(&exit_time)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        exit_commission: Money::from_f64(row.get("exit_commission")?),
        gross_pnl: Money::from_f64(row.get("gross_pnl")?),
        real_pnl: Money::from_f64(row.get("real_pnl")?),
        total_commissions: Money::from_f64(row.get("total_commissions")?),
        close_reason: reason_from_str(&reason).unwrap_or(CloseReason::Manual),
        is_winner: row.get::<_, i64>("is_winner")? != 0,
    })
}

pub struct TradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl TradeStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = db_path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?;
            }
            let conn = Connection::open(&path)?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        })
        .await
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
    }

    /// Open an in-memory store, useful for tests and short-lived paper
    /// sessions that don't need durability across restarts.
    pub async fn new_in_memory() -> Result<Self, CoreError> {
        tokio::task::spawn_blocking(|| {
            let conn = Connection::open_in_memory()?;
            Self::init_schema(&conn)?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        })
        .await
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
    }

    fn init_schema(conn: &Connection) -> Result<(), CoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                interval TEXT NOT NULL,
                entry_price REAL NOT NULL,
                quantity REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                entry_time TEXT NOT NULL,
                entry_commission REAL NOT NULL,
                tm_value_at_entry REAL NOT NULL,
                tm_color_at_entry TEXT NOT NULL,
                momentum_color_at_entry TEXT NOT NULL,
                exit_price REAL NOT NULL,
                exit_time TEXT NOT NULL,
                exit_commission REAL NOT NULL,
                gross_pnl REAL NOT NULL,
                real_pnl REAL NOT NULL,
                total_commissions REAL NOT NULL,
                close_reason TEXT NOT NULL,
                is_winner INTEGER NOT NULL,
                duration_minutes REAL NOT NULL,
                position_value REAL NOT NULL,
                pnl_percentage REAL NOT NULL,
                price_change_pct REAL NOT NULL,
                risk_reward_ratio REAL NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_interval ON trades(interval)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_entry_time ON trades(entry_time)",
            [],
        )?;

        Ok(())
    }

    /// Append a closed trade as a single atomic transaction.
    pub async fn append_trade(&self, trade: &ClosedTrade) -> Result<(), CoreError> {
        let conn = Arc::clone(&self.conn);
        let trade = trade.clone();
        tokio::task::spawn_blocking(move || -> Result<(), CoreError> {
            let mut conn = conn.lock().expect("trade store mutex poisoned");
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO trades (
                    symbol, side, interval, entry_price, quantity, stop_loss, take_profit,
                    entry_time, entry_commission, tm_value_at_entry, tm_color_at_entry,
                    momentum_color_at_entry, exit_price, exit_time, exit_commission,
                    gross_pnl, real_pnl, total_commissions, close_reason, is_winner,
                    duration_minutes, position_value, pnl_percentage, price_change_pct,
                    risk_reward_ratio
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,
                    ?21,?22,?23,?24,?25)",
                params![
                    trade.symbol.as_str(),
                    side_to_str(trade.side),
                    trade.interval.as_str(),
                    trade.entry_price.to_f64(),
                    trade.quantity.to_f64(),
                    trade.stop_loss.to_f64(),
                    trade.take_profit.to_f64(),
                    trade.entry_time.to_rfc3339(),
                    trade.entry_commission.to_f64(),
                    trade.tm_value_at_entry.to_f64(),
                    tm_color_to_str(trade.tm_color_at_entry),
                    momentum_color_to_str(trade.momentum_color_at_entry),
                    trade.exit_price.to_f64(),
                    trade.exit_time.to_rfc3339(),
                    trade.exit_commission.to_f64(),
                    trade.gross_pnl.to_f64(),
                    trade.real_pnl.to_f64(),
                    trade.total_commissions.to_f64(),
                    reason_to_str(trade.close_reason),
                    trade.is_winner as i64,
                    trade.duration().num_seconds() as f64 / 60.0,
                    trade.position_value().to_f64(),
                    trade.pnl_percent(),
                    trade.price_change_percent(),
                    trade.risk_reward_ratio(),
                ],
            )?;
            tx.commit()?;
            info!(symbol = %trade.symbol, real_pnl = trade.real_pnl.to_f64(), "trade appended to store");
            Ok(())
        })
        .await
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
    }

    /// List trades for one interval, most recent first, optionally limited.
    pub async fn list_trades_for_interval(
        &self,
        interval: Interval,
        limit: Option<usize>,
    ) -> Result<Vec<ClosedTrade>, CoreError> {
        let conn = Arc::clone(&self.conn);
        let interval_str = interval.as_str().to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<ClosedTrade>, CoreError> {
            let conn = conn.lock().expect("trade store mutex poisoned");
            let sql = match limit {
                Some(_) => "SELECT * FROM trades WHERE interval = ?1 ORDER BY entry_time DESC LIMIT ?2",
                None => "SELECT * FROM trades WHERE interval = ?1 ORDER BY entry_time DESC",
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = if let Some(n) = limit {
                stmt.query_map(params![interval_str, n as i64], row_to_trade)?
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                stmt.query_map(params![interval_str], row_to_trade)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            Ok(rows)
        })
        .await
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
    }

    /// Full trade list, most recent first.
    pub async fn list_all_trades(&self) -> Result<Vec<ClosedTrade>, CoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<Vec<ClosedTrade>, CoreError> {
            let conn = conn.lock().expect("trade store mutex poisoned");
            let mut stmt = conn.prepare("SELECT * FROM trades ORDER BY entry_time DESC")?;
            let rows = stmt
                .query_map([], row_to_trade)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
    }

    /// Distinct intervals present in the store.
    pub async fn distinct_intervals(&self) -> Result<Vec<String>, CoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<Vec<String>, CoreError> {
            let conn = conn.lock().expect("trade store mutex poisoned");
            let mut stmt = conn.prepare("SELECT DISTINCT interval FROM trades ORDER BY interval")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| CoreError::PersistenceFailure(e.to_string()))?
    }

    /// Per-interval summary: totals, win-rate, best/worst, avg duration.
    pub async fn interval_summary(&self, interval: Interval) -> Result<IntervalSummary, CoreError> {
        let trades = self.list_trades_for_interval(interval, None).await?;
        Ok(summarize(interval.as_str().to_string(), &trades))
    }

    /// Cross-interval summary: one [`IntervalSummary`] per interval present.
    pub async fn cross_interval_summary(&self) -> Result<Vec<IntervalSummary>, CoreError> {
        let intervals = self.distinct_intervals().await?;
        let mut summaries = Vec::with_capacity(intervals.len());
        for interval_str in intervals {
            let interval = Interval::parse(&interval_str)
                .ok_or_else(|| CoreError::DataQuality(format!("bad interval in store: {interval_str}")))?;
            summaries.push(self.interval_summary(interval).await?);
        }
        Ok(summaries)
    }
}

fn summarize(interval: String, trades: &[ClosedTrade]) -> IntervalSummary {
    let total_trades = trades.len() as u64;
    let wins = trades.iter().filter(|t| t.is_winner).count() as u64;
    let losses = total_trades - wins;
    let win_rate = if total_trades == 0 {
        0.0
    } else {
        wins as f64 / total_trades as f64 * 100.0
    };
    let best_trade = trades
        .iter()
        .map(|t| t.real_pnl.to_f64())
        .fold(f64::MIN, f64::max);
    let worst_trade = trades
        .iter()
        .map(|t| t.real_pnl.to_f64())
        .fold(f64::MAX, f64::min);
    let avg_duration_secs = if trades.is_empty() {
        0.0
    } else {
        trades.iter().map(|t| t.duration().num_seconds() as f64).sum::<f64>() / total_trades as f64
    };
    let total_pnl = trades.iter().map(|t| t.real_pnl.to_f64()).sum();

    IntervalSummary {
        interval,
        total_trades,
        wins,
        losses,
        win_rate,
        best_trade: if trades.is_empty() { 0.0 } else { best_trade },
        worst_trade: if trades.is_empty() { 0.0 } else { worst_trade },
        avg_duration_secs,
        total_pnl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::SqueezeState;
    use chrono::Utc;

    fn sample_trade(symbol: &str, interval: Interval, real_pnl: f64) -> ClosedTrade {
        let _ = SqueezeState::Off;
        ClosedTrade {
            symbol: Symbol::new(symbol),
            side: Side::Long,
            interval,
            entry_price: Money::from_f64(100.0),
            quantity: Money::from_f64(1.0),
            stop_loss: Money::from_f64(90.0),
            take_profit: Money::from_f64(120.0),
            entry_time: Utc::now() - chrono::Duration::minutes(10),
            entry_commission: Money::from_f64(0.1),
            tm_value_at_entry: Money::from_f64(99.0),
            tm_color_at_entry: TrendColor::Blue,
            momentum_color_at_entry: MomentumColor::Lime,
            exit_price: Money::from_f64(100.0 + real_pnl),
            exit_time: Utc::now(),
            exit_commission: Money::from_f64(0.1),
            gross_pnl: Money::from_f64(real_pnl),
            real_pnl: Money::from_f64(real_pnl),
            total_commissions: Money::from_f64(0.2),
            close_reason: CloseReason::TakeProfit,
            is_winner: real_pnl > 0.0,
        }
    }

    #[tokio::test]
    async fn append_then_list_round_trips() {
        let store = TradeStore::new_in_memory().await.unwrap();
        store.append_trade(&sample_trade("BTCUSDT", Interval::H1, 10.0)).await.unwrap();
        let trades = store.list_trades_for_interval(Interval::H1, None).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol.as_str(), "BTCUSDT");
    }

    #[tokio::test]
    async fn interval_summary_computes_win_rate() {
        let store = TradeStore::new_in_memory().await.unwrap();
        store.append_trade(&sample_trade("BTCUSDT", Interval::H1, 10.0)).await.unwrap();
        store.append_trade(&sample_trade("ETHUSDT", Interval::H1, -5.0)).await.unwrap();
        let summary = store.interval_summary(Interval::H1).await.unwrap();
        assert_eq!(summary.total_trades, 2);
        assert_eq!(summary.wins, 1);
        assert!((summary.win_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cross_interval_summary_covers_all_intervals() {
        let store = TradeStore::new_in_memory().await.unwrap();
        store.append_trade(&sample_trade("BTCUSDT", Interval::H1, 10.0)).await.unwrap();
        store.append_trade(&sample_trade("BTCUSDT", Interval::M5, 3.0)).await.unwrap();
        let summaries = store.cross_interval_summary().await.unwrap();
        assert_eq!(summaries.len(), 2);
    }
}
