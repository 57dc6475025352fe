//! Exchange connectivity.
//!
//! Defines the `MarketGateway` trait consumed by the engine and ships a
//! single implementation:
//! - `SimulatedMarket`: historical price replay with an in-process ledger,
//!   used for backtests and paper trading.
//!
//! Live exchange clients (REST/WebSocket, auth, retries) plug in behind the
//! same trait.

pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::OrderResult;

/// Abstraction over the exchange the agent trades on.
///
/// Every call is a single attempt: the engine never retries a failed leg,
/// so retry policy (if any) lives in the implementor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Exchange clock. Simulated gateways return replay time.
    fn now(&self) -> DateTime<Utc>;

    /// Last price of `coin` quoted in `bridge`. `None` if the market is unknown.
    async fn get_price(&self, coin: &str, bridge: &str) -> Result<Option<f64>>;

    /// Taker fee fraction for a leg on `coin`/`bridge`.
    async fn get_fee(&self, coin: &str, bridge: &str, is_buy: bool) -> Result<f64>;

    /// Smallest order notional (in bridge units) the exchange accepts.
    async fn get_min_notional(&self, coin: &str, bridge: &str) -> Result<f64>;

    /// Free balance of `coin`.
    async fn get_balance(&self, coin: &str) -> Result<f64>;

    /// Spend the whole bridge balance on `coin`.
    async fn buy(&self, coin: &str, bridge: &str) -> Result<OrderResult>;

    /// Sell the whole `coin` balance into the bridge.
    async fn sell(&self, coin: &str, bridge: &str) -> Result<OrderResult>;
}
