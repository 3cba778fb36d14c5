//! Trendsqueeze engine
//!
//! Real-time, multi-symbol signal-detection and paper-trading core: a
//! rate-limited candle fetcher with a size-bounded cache, a deterministic
//! trend-line + squeeze-momentum indicator engine, a bounded-concurrency
//! monitoring scheduler, and a paper-trading simulator with durable trade
//! persistence.

pub mod cache;
pub mod common;
pub mod config;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod oms;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use types::*;
