//! Integration tests for the trendsqueeze engine.
//!
//! Exercises the cross-module properties and literal end-to-end scenarios
//! from spec §8 (E1-E6 and the quantified invariants) by driving the public
//! API of the indicator engine, signal detector, simulator, cache, and
//! trade store together rather than any single module in isolation.

use approx::assert_relative_eq;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use trendsqueeze_engine::cache::CandleCache;
use trendsqueeze_engine::indicators::{
    self, IndicatorSnapshot, MomentumColor, SqueezeParams, SqueezeState, TrendColor, TrendLineParams,
};
use trendsqueeze_engine::oms::{size_order, CloseReason, Simulator};
use trendsqueeze_engine::signal;
use trendsqueeze_engine::store::TradeStore;
use trendsqueeze_engine::types::{Candle, CandleSeries, DataRequest, Interval, Side, Symbol};

fn candle(symbol: &str, interval: Interval, t: chrono::DateTime<Utc>, o: f64, h: f64, l: f64, c: f64) -> Candle {
    Candle::new(Symbol::new(symbol), interval, t, o, h, l, c, 100.0).unwrap()
}

fn snapshot_with(tm_value: f64, tm_color: TrendColor, momentum_color: MomentumColor, open: f64, close: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        tm_value,
        tm_color,
        cci: 10.0,
        atr: 1.0,
        buy_cross: false,
        sell_cross: false,
        momentum_value: 0.1,
        momentum_color,
        squeeze_state: SqueezeState::Off,
        current_price: close,
        open_price: open,
        timestamp: Utc::now(),
    }
}

// ---------------------------------------------------------------------
// E1. LONG entry on exact crossing.
// ---------------------------------------------------------------------
#[test]
fn e1_long_entry_on_exact_crossing() {
    let snap = snapshot_with(101.0, TrendColor::Blue, MomentumColor::Lime, 100.5, 101.5);
    let sig = signal::detect(&snap).expect("LONG signal should fire");
    assert_eq!(sig.side, Side::Long);

    let (qty, sl, tp) = size_order(Side::Long, snap.current_price, snap.tm_value, Interval::M1, 100.0, 2.0);

    assert_relative_eq!(qty, 0.9852, epsilon = 1e-3);
    assert_relative_eq!(sl, 100.697, epsilon = 1e-3);
    assert_relative_eq!(tp, 103.106, epsilon = 1e-3);
    assert!(sl < snap.current_price && snap.current_price < tp);
}

// ---------------------------------------------------------------------
// E2. SHORT bracket hit (TP), exact commission-adjusted PnL.
// ---------------------------------------------------------------------
#[tokio::test]
async fn e2_short_bracket_hit_take_profit_exact_pnl() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 5, 0.0004, 0.0005, store);
    let snap = snapshot_with(100.0, TrendColor::Red, MomentumColor::Red, 101.0, 99.0);

    assert!(
        sim.open_position(Symbol::new("BTCUSDT"), Side::Short, Interval::M5, 100.0, 1.0, 102.0, 98.0, &snap)
            .await
    );

    let mut prices = HashMap::new();
    prices.insert(Symbol::new("BTCUSDT"), 97.9);
    sim.update_positions(&prices).await;

    assert_eq!(sim.open_position_count().await, 0);
    let balance = sim.current_balance().await;
    // initial 10_000 + realPnL (2.01105, per spec E2 derivation)
    assert!((balance.to_f64() - (10_000.0 + 2.01105)).abs() < 1e-3, "balance = {balance}");
}

// ---------------------------------------------------------------------
// E3. Bracket precedence: stop-loss checked first, but only fires when
// actually breached; otherwise take-profit closes normally.
// ---------------------------------------------------------------------
#[tokio::test]
async fn e3_take_profit_fires_when_stop_not_breached() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 5, 0.0, 0.0, store);
    let snap = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 100.0);

    sim.open_position(Symbol::new("ETHUSDT"), Side::Long, Interval::M5, 100.0, 1.0, 99.0, 101.0, &snap)
        .await;

    let mut prices = HashMap::new();
    prices.insert(Symbol::new("ETHUSDT"), 101.5);
    sim.update_positions(&prices).await;

    assert_eq!(sim.open_position_count().await, 0);
    let trades = sim.open_positions_snapshot().await;
    assert!(trades.is_empty());
}

#[tokio::test]
async fn stop_loss_precedence_on_simultaneous_touch() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 5, 0.0, 0.0, store.clone());
    let snap = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 100.0);

    // Degenerate bracket where sl == tp: whichever price arrives must close
    // as STOP_LOSS, per spec §9 Open Question 1.
    sim.open_position(Symbol::new("ETHUSDT"), Side::Long, Interval::M5, 100.0, 1.0, 100.0, 100.0, &snap)
        .await;
    let mut prices = HashMap::new();
    prices.insert(Symbol::new("ETHUSDT"), 100.0);
    sim.update_positions(&prices).await;

    let all_trades = store.list_all_trades().await.unwrap();
    assert_eq!(all_trades.len(), 1);
    assert_eq!(all_trades[0].close_reason, CloseReason::StopLoss);
}

// ---------------------------------------------------------------------
// E4. Signal invalidation: a latched direction stops being supported once
// the indicator context flips, independent of the open position itself.
// ---------------------------------------------------------------------
#[test]
fn e4_latched_signal_invalidated_when_trend_color_flips() {
    let snap_c1 = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 101.0);
    let sig = signal::detect(&snap_c1).unwrap();
    assert_eq!(sig.side, Side::Long);

    let snap_c2 = snapshot_with(100.0, TrendColor::Red, MomentumColor::Lime, 99.0, 101.0);
    assert!(!signal::still_supported(sig.side, &snap_c2));
}

// ---------------------------------------------------------------------
// §8 quantified invariants
// ---------------------------------------------------------------------
#[tokio::test]
async fn open_position_count_never_exceeds_max_positions() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 2, 0.0004, 0.0005, store);
    let snap = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 101.0);

    for (i, sym) in ["AAA", "BBB", "CCC", "DDD"].iter().enumerate() {
        let opened = sim
            .open_position(Symbol::new(*sym), Side::Long, Interval::M5, 100.0, 1.0, 90.0, 120.0, &snap)
            .await;
        if i < 2 {
            assert!(opened, "{sym} should have opened");
        } else {
            assert!(!opened, "{sym} should have been rejected beyond max_positions");
        }
    }
    assert!(sim.open_position_count().await <= 2);
}

#[tokio::test]
async fn closed_trade_real_pnl_equals_gross_minus_commissions() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 5, 0.0004, 0.0005, store);
    let snap = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 101.0);

    sim.open_position(Symbol::new("BTCUSDT"), Side::Long, Interval::M5, 100.0, 2.0, 90.0, 120.0, &snap)
        .await;
    let trade = sim
        .close_position(&Symbol::new("BTCUSDT"), 110.0, CloseReason::TakeProfit)
        .await
        .unwrap();

    let expected_real = trade.gross_pnl.to_f64() - trade.total_commissions.to_f64();
    assert!((trade.real_pnl.to_f64() - expected_real).abs() < 1e-6);
    assert_eq!(trade.is_winner, trade.real_pnl.to_f64() > 0.0);
    assert!(trade.exit_time >= trade.entry_time);
}

#[test]
fn long_and_short_conditions_are_mutually_exclusive_per_bar() {
    // open < tm_value < close (LONG shape) cannot simultaneously satisfy
    // open > tm_value > close (SHORT shape) on the same bar.
    let long_snap = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 101.0);
    assert_eq!(signal::detect(&long_snap), Some(signal::Signal { side: Side::Long }));

    let short_snap = snapshot_with(100.0, TrendColor::Red, MomentumColor::Red, 101.0, 99.0);
    assert_eq!(signal::detect(&short_snap), Some(signal::Signal { side: Side::Short }));
}

// ---------------------------------------------------------------------
// Cache soundness (§8): put-then-get within TTL hits; invalidate drops all
// matching entries.
// ---------------------------------------------------------------------
#[tokio::test]
async fn cache_put_then_get_hits_within_ttl_and_invalidate_clears() {
    let cache = CandleCache::new(100, 60);
    let req = DataRequest::new(Symbol::new("BTCUSDT"), Interval::M1, 100);
    let now = Utc::now();
    let series = CandleSeries::new(
        Symbol::new("BTCUSDT"),
        Interval::M1,
        vec![candle("BTCUSDT", Interval::M1, now, 100.0, 101.0, 99.0, 100.5)],
        "test",
    );

    cache.put(&req, series, None).await;
    assert!(cache.get(&req).await.is_some());

    cache.invalidate("BTCUSDT", None).await;
    assert!(cache.get(&req).await.is_none());
}

// ---------------------------------------------------------------------
// Store round-trip (§8): writing then reading a closed trade yields
// matching numeric fields within 3-decimal rounding.
// ---------------------------------------------------------------------
#[tokio::test]
async fn simulator_close_persists_trade_readable_from_store() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 5, 0.0004, 0.0005, store.clone());
    let snap = snapshot_with(99.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 101.0);

    sim.open_position(Symbol::new("SOLUSDT"), Side::Long, Interval::H1, 100.0, 1.0, 90.0, 120.0, &snap)
        .await;
    let trade = sim
        .close_position(&Symbol::new("SOLUSDT"), 115.0, CloseReason::TakeProfit)
        .await
        .unwrap();

    let stored = store.list_trades_for_interval(Interval::H1, None).await.unwrap();
    assert_eq!(stored.len(), 1);
    let round_trip = &stored[0];
    assert_eq!(round_trip.symbol, trade.symbol);
    assert!((round_trip.real_pnl.to_f64() - trade.real_pnl.to_f64()).abs() < 1e-3);
    assert!((round_trip.exit_price.to_f64() - trade.exit_price.to_f64()).abs() < 1e-3);
}

// ---------------------------------------------------------------------
// Idempotence (§8): calling update_positions twice with the same price
// map closes at most as many positions as the first call.
// ---------------------------------------------------------------------
#[tokio::test]
async fn update_positions_is_idempotent_on_repeated_calls() {
    let store = Arc::new(TradeStore::new_in_memory().await.unwrap());
    let sim = Simulator::new(10_000.0, 5, 0.0004, 0.0005, store);
    let snap = snapshot_with(100.0, TrendColor::Blue, MomentumColor::Lime, 99.0, 101.0);
    sim.open_position(Symbol::new("BTCUSDT"), Side::Long, Interval::M5, 100.0, 1.0, 90.0, 120.0, &snap)
        .await;

    let mut prices = HashMap::new();
    prices.insert(Symbol::new("BTCUSDT"), 121.0);
    sim.update_positions(&prices).await;
    assert_eq!(sim.open_position_count().await, 0);

    // A second call with the same map has nothing left to close.
    sim.update_positions(&prices).await;
    assert_eq!(sim.open_position_count().await, 0);
}

// ---------------------------------------------------------------------
// Boundary behaviour (§8): candlesLimit below the indicator's max window
// still returns a snapshot, momentum_value 0.0, no panic.
// ---------------------------------------------------------------------
#[test]
fn indicator_engine_handles_insufficient_candles_without_panicking() {
    let close = vec![100.0, 101.0, 99.5];
    let high = vec![101.0, 102.0, 100.5];
    let low = vec![99.0, 100.0, 98.5];
    let open = close.clone();

    let snap = indicators::compute_snapshot(
        &open,
        &high,
        &low,
        &close,
        Utc::now(),
        TrendLineParams::default(),
        SqueezeParams::default(),
    );
    assert_eq!(snap.momentum_value, 0.0);
}

// ---------------------------------------------------------------------
// Candle OHLC invariants (§3).
// ---------------------------------------------------------------------
#[test]
fn candle_series_stays_sorted_and_candles_validate() {
    let base = Utc::now();
    let candles: Vec<Candle> = (0..10)
        .map(|i| candle("BTCUSDT", Interval::M1, base + Duration::minutes(i), 100.0, 101.0, 99.0, 100.5))
        .collect();
    let series = CandleSeries::new(Symbol::new("BTCUSDT"), Interval::M1, candles, "test");
    assert!(series.is_sorted());
    for c in &series.candles {
        assert!(c.is_valid());
    }
}
