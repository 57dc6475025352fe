//! End-to-end scenarios: the engine driven against the simulated exchange
//! and an in-memory SQLite repository.

mod backtest;
mod recovery;
mod rotation;
mod stop_loss;
mod support;
