//! Paper-trading simulator (component D): position lifecycle, bracket
//! evaluation, commission-adjusted PnL.
//!
//! Guarded by a single `tokio::sync::Mutex` around [`SimulatorState`],
//! matching the cache's "one lock over the whole aggregate" shape.

use crate::indicators::IndicatorSnapshot;
use crate::oms::types::{CloseReason, ClosedTrade, Position, SimulatorState};
use crate::store::TradeStore;
use crate::types::{Interval, Money, Side, Symbol};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Default target notional per position, in quote currency.
pub const DEFAULT_POSITION_SIZE: f64 = 100.0;
/// Default risk-reward ratio (reward : risk).
pub const DEFAULT_RISK_REWARD: f64 = 2.0;

/// Derive `(quantity, stop_loss, take_profit)` from a signal direction, the
/// current price, the trend-line value, and the interval's stop multiplier.
///
/// `positionValue = entry * qty ~= positionSizeUsd`. Stop is placed at
/// `tmValue * (1 +- m(interval))`; target at the symmetric risk-reward
/// distance from entry.
pub fn size_order(
    side: Side,
    entry_price: f64,
    tm_value: f64,
    interval: Interval,
    position_size_usd: f64,
    risk_reward: f64,
) -> (f64, f64, f64) {
    let m = interval.stop_multiplier();
    let quantity = if entry_price.abs() < f64::EPSILON {
        0.0
    } else {
        position_size_usd / entry_price
    };

    let (stop_loss, take_profit) = match side {
        Side::Long => {
            let sl = tm_value * (1.0 - m);
            let risk = entry_price - sl;
            let tp = entry_price + risk * risk_reward;
            (sl, tp)
        }
        Side::Short => {
            let sl = tm_value * (1.0 + m);
            let risk = sl - entry_price;
            let tp = entry_price - risk * risk_reward;
            (sl, tp)
        }
    };

    (quantity, stop_loss, take_profit)
}

pub struct Simulator {
    state: Arc<Mutex<SimulatorState>>,
    store: Arc<TradeStore>,
    /// §6 `autoCloseOnTarget`: when false, [`Simulator::update_positions`]
    /// skips bracket evaluation entirely and positions are held until a
    /// `MANUAL` close. Defaults to true; toggle with
    /// [`Simulator::set_auto_close_on_target`].
    auto_close_on_target: AtomicBool,
}

impl Simulator {
    pub fn new(
        initial_balance: f64,
        max_positions: usize,
        maker_fee_rate: f64,
        taker_fee_rate: f64,
        store: Arc<TradeStore>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatorState {
                initial_balance: Money::from_f64(initial_balance),
                current_balance: Money::from_f64(initial_balance),
                open_positions: HashMap::new(),
                closed_trades: Vec::new(),
                total_commissions_paid: Money::ZERO,
                max_positions,
                maker_fee_rate,
                taker_fee_rate,
            })),
            store,
            auto_close_on_target: AtomicBool::new(true),
        }
    }

    /// §6 `autoCloseOnTarget`. When set to false, open positions are held
    /// until a `MANUAL` close regardless of bracket touches.
    pub fn set_auto_close_on_target(&self, enabled: bool) {
        self.auto_close_on_target.store(enabled, Ordering::SeqCst);
    }

    pub async fn can_open_position(&self) -> bool {
        let state = self.state.lock().await;
        state.open_positions.len() < state.max_positions
    }

    pub async fn is_open(&self, symbol: &Symbol) -> bool {
        self.state.lock().await.open_positions.contains_key(symbol)
    }

    /// Rejects (returns `false`) if `|open| >= maxPositions`, a position for
    /// `symbol` already exists, or `qty <= 0`.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_position(
        &self,
        symbol: Symbol,
        side: Side,
        interval: Interval,
        entry_price: f64,
        qty: f64,
        sl: f64,
        tp: f64,
        snapshot: &IndicatorSnapshot,
    ) -> bool {
        if qty <= 0.0 {
            return false;
        }
        let mut state = self.state.lock().await;
        if state.open_positions.len() >= state.max_positions {
            return false;
        }
        if state.open_positions.contains_key(&symbol) {
            return false;
        }

        let entry_commission =
            Money::from_f64(entry_price) * Money::from_f64(qty) * Money::from_f64(state.maker_fee_rate);

        let position = Position {
            symbol: symbol.clone(),
            side,
            interval,
            entry_price: Money::from_f64(entry_price),
            quantity: Money::from_f64(qty),
            stop_loss: Money::from_f64(sl),
            take_profit: Money::from_f64(tp),
            entry_time: snapshot.timestamp,
            entry_commission,
            tm_value_at_entry: Money::from_f64(snapshot.tm_value),
            tm_color_at_entry: snapshot.tm_color,
            momentum_color_at_entry: snapshot.momentum_color,
        };

        info!(symbol = %symbol, ?side, entry_price, qty, sl, tp, "opened position");
        state.open_positions.insert(symbol, position);
        true
    }

    /// Evaluate brackets for every open position against `price_map`.
    /// Stop-loss takes precedence over take-profit on simultaneous touch.
    /// A no-op when `autoCloseOnTarget` (§6) has been disabled.
    pub async fn update_positions(&self, price_map: &HashMap<Symbol, f64>) {
        if !self.auto_close_on_target.load(Ordering::SeqCst) {
            return;
        }
        let breaches: Vec<(Symbol, f64, CloseReason)> = {
            let state = self.state.lock().await;
            state
                .open_positions
                .values()
                .filter_map(|p| {
                    let price = *price_map.get(&p.symbol)?;
                    let sl = p.stop_loss.to_f64();
                    let tp = p.take_profit.to_f64();
                    let reason = match p.side {
                        Side::Long => {
                            if price <= sl {
                                Some(CloseReason::StopLoss)
                            } else if price >= tp {
                                Some(CloseReason::TakeProfit)
                            } else {
                                None
                            }
                        }
                        Side::Short => {
                            if price >= sl {
                                Some(CloseReason::StopLoss)
                            } else if price <= tp {
                                Some(CloseReason::TakeProfit)
                            } else {
                                None
                            }
                        }
                    };
                    reason.map(|r| (p.symbol.clone(), price, r))
                })
                .collect()
        };

        for (symbol, price, reason) in breaches {
            self.close_position(&symbol, price, reason).await;
        }
    }

    /// `exitCommission = exitPrice * qty * takerFee`.
    /// `grossPnL = (exitPrice - entry) * qty` for Long, negated for Short.
    /// `realPnL = grossPnL - entryCommission - exitCommission`.
    pub async fn close_position(
        &self,
        symbol: &Symbol,
        exit_price: f64,
        reason: CloseReason,
    ) -> Option<ClosedTrade> {
        let mut state = self.state.lock().await;
        let position = state.open_positions.remove(symbol)?;

        let exit = Money::from_f64(exit_price);
        let exit_commission = exit * position.quantity * Money::from_f64(state.taker_fee_rate);

        let gross_pnl = match position.side {
            Side::Long => (exit - position.entry_price) * position.quantity,
            Side::Short => (position.entry_price - exit) * position.quantity,
        };
        let real_pnl = gross_pnl - position.entry_commission - exit_commission;
        let total_commissions = position.entry_commission + exit_commission;

        let trade = ClosedTrade {
            symbol: position.symbol.clone(),
            side: position.side,
            interval: position.interval,
            entry_price: position.entry_price,
            quantity: position.quantity,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            entry_time: position.entry_time,
            entry_commission: position.entry_commission,
            tm_value_at_entry: position.tm_value_at_entry,
            tm_color_at_entry: position.tm_color_at_entry,
            momentum_color_at_entry: position.momentum_color_at_entry,
            exit_price: exit,
            exit_time: chrono::Utc::now(),
            exit_commission,
            gross_pnl,
            real_pnl,
            total_commissions,
            close_reason: reason,
            is_winner: real_pnl.is_positive(),
        };

        state.current_balance += real_pnl;
        state.total_commissions_paid += total_commissions;

        info!(
            symbol = %trade.symbol,
            ?reason,
            real_pnl = real_pnl.to_f64(),
            "closed position"
        );

        state.closed_trades.push(trade.clone());
        drop(state);

        if let Err(e) = self.store.append_trade(&trade).await {
            tracing::error!(symbol = %trade.symbol, error = %e, "failed to persist closed trade");
        }

        Some(trade)
    }

    pub async fn current_balance(&self) -> Money {
        self.state.lock().await.current_balance
    }

    pub async fn open_position_count(&self) -> usize {
        self.state.lock().await.open_positions.len()
    }

    pub async fn open_positions_snapshot(&self) -> Vec<Position> {
        self.state.lock().await.open_positions.values().cloned().collect()
    }
}
