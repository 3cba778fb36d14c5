//! Paper-trading order management: position lifecycle, bracket evaluation,
//! commission-adjusted PnL.

pub mod simulator;
pub mod types;

pub use simulator::{size_order, Simulator, DEFAULT_POSITION_SIZE, DEFAULT_RISK_REWARD};
pub use types::{CloseReason, ClosedTrade, Position, SimulatorState};
