//! Offline replay of a price history through a strategy.

pub mod runner;

pub use runner::{max_drawdown_pct, BacktestReport, Backtester, ValuePoint};
