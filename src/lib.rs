//! ROTOR: autonomous bridge-asset coin rotation agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod storage;
pub mod engine;
pub mod strategy;
pub mod backtest;
pub mod dashboard;
