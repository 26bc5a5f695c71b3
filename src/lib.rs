//! Tick-level futures backtesting engine
//!
//! Replays recorded level-1 ticks for a single instrument through a
//! simulated matching engine, keeps exchange-accurate today/yesterday
//! position accounting with offset conversion, and marks PnL to market
//! daily. One replay over one input always produces one output: every
//! component is single-threaded and allocation of ids is per-run.

pub mod config;
pub mod data;
pub mod event;
pub mod matching;
pub mod oms;
pub mod pnl;
pub mod replay;
pub mod strategy;
pub mod types;

pub use config::Config;
pub use types::*;
