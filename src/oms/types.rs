//! Position and closed-trade types for the paper-trading simulator.
//!
//! Uses [`Money`] for all monetary values to prevent floating-point drift
//! across thousands of simulated trades.

use crate::indicators::{MomentumColor, TrendColor};
use crate::types::{Interval, Money, Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Manual,
}

/// An open simulated trade. At most one per symbol at any time.
///
/// Invariant (side = Long): `stop_loss < entry_price < take_profit`;
/// reversed for Short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub interval: Interval,
    pub entry_price: Money,
    pub quantity: Money,
    pub stop_loss: Money,
    pub take_profit: Money,
    pub entry_time: DateTime<Utc>,
    pub entry_commission: Money,
    pub tm_value_at_entry: Money,
    pub tm_color_at_entry: TrendColor,
    pub momentum_color_at_entry: MomentumColor,
}

impl Position {
    pub fn position_value(&self) -> Money {
        self.entry_price * self.quantity
    }
}

/// Immutable record of a completed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub interval: Interval,
    pub entry_price: Money,
    pub quantity: Money,
    pub stop_loss: Money,
    pub take_profit: Money,
    pub entry_time: DateTime<Utc>,
    pub entry_commission: Money,
    pub tm_value_at_entry: Money,
    pub tm_color_at_entry: TrendColor,
    pub momentum_color_at_entry: MomentumColor,

    pub exit_price: Money,
    pub exit_time: DateTime<Utc>,
    pub exit_commission: Money,
    pub gross_pnl: Money,
    pub real_pnl: Money,
    pub total_commissions: Money,
    pub close_reason: CloseReason,
    pub is_winner: bool,
}

impl ClosedTrade {
    /// Duration held, entry to exit.
    pub fn duration(&self) -> chrono::Duration {
        self.exit_time - self.entry_time
    }

    /// Notional position size at entry.
    pub fn position_value(&self) -> Money {
        self.entry_price * self.quantity
    }

    /// PnL as a percentage of the position value at entry.
    pub fn pnl_percent(&self) -> f64 {
        let value = (self.entry_price * self.quantity).to_f64();
        if value.abs() < f64::EPSILON {
            0.0
        } else {
            self.real_pnl.to_f64() / value * 100.0
        }
    }

    /// Price change entry to exit, as a percentage of entry price.
    pub fn price_change_percent(&self) -> f64 {
        let entry = self.entry_price.to_f64();
        if entry.abs() < f64::EPSILON {
            0.0
        } else {
            (self.exit_price.to_f64() - entry) / entry * 100.0
        }
    }

    /// Configured risk-reward ratio implied by the bracket at entry.
    pub fn risk_reward_ratio(&self) -> f64 {
        let entry = self.entry_price.to_f64();
        let risk = (entry - self.stop_loss.to_f64()).abs();
        let reward = (self.take_profit.to_f64() - entry).abs();
        if risk.abs() < f64::EPSILON {
            0.0
        } else {
            reward / risk
        }
    }
}

/// Aggregate simulator state. Owned exclusively by [`crate::oms::Simulator`];
/// external callers observe via read-only getters.
#[derive(Debug, Clone)]
pub struct SimulatorState {
    pub initial_balance: Money,
    pub current_balance: Money,
    pub open_positions: std::collections::HashMap<Symbol, Position>,
    pub closed_trades: Vec<ClosedTrade>,
    pub total_commissions_paid: Money,
    pub max_positions: usize,
    pub maker_fee_rate: f64,
    pub taker_fee_rate: f64,
}
