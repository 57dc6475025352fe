//! Persistence layer.
//!
//! The engine reads and writes the coin universe, the holding log, trade
//! records and price/scout history through the `Repository` trait. The
//! bundled implementation is SQLite via `sqlx`; every write is also pushed
//! to live subscribers as an `UpdateEvent`.

pub mod sqlite;
pub mod trade_log;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::{Coin, HoldingRecord, Interval, Pair, ScoutRecord, Trade, UpdateEvent};

pub use sqlite::SqliteRepository;
pub use trade_log::TradeLog;

/// Durable store of the trading universe and its history.
#[async_trait]
pub trait Repository: Send + Sync {
    // -- Coins and pairs ----------------------------------------------------

    /// Enable `symbols` (creating missing coins), disable every other coin
    /// and make sure a pair exists for each ordered pair of enabled coins.
    async fn set_coins(&self, symbols: &[String]) -> Result<()>;

    async fn get_coins(&self, only_enabled: bool) -> Result<Vec<Coin>>;

    async fn get_coin(&self, symbol: &str) -> Result<Option<Coin>>;

    async fn get_pair(&self, from: &str, to: &str) -> Result<Option<Pair>>;

    /// Pairs leaving `from`, in stable id order.
    async fn get_pairs_from(&self, from: &str, only_enabled: bool) -> Result<Vec<Pair>>;

    async fn get_pairs(&self, only_enabled: bool) -> Result<Vec<Pair>>;

    async fn set_pair_ratio(&self, pair_id: i64, ratio: f64) -> Result<()>;

    // -- Holding log --------------------------------------------------------

    /// Most recent holding record, if any.
    async fn current_holding(&self) -> Result<Option<HoldingRecord>>;

    /// Append a holding record unconditionally (bootstrap only).
    async fn set_current_coin(&self, symbol: &str, at: DateTime<Utc>) -> Result<HoldingRecord>;

    /// Append a holding record if the latest one is still `expected`.
    /// Fails with `RotorError::HoldingConflict` otherwise.
    async fn advance_holding(
        &self,
        symbol: &str,
        expected: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<HoldingRecord>;

    // -- Scout and price history -------------------------------------------

    async fn log_scout(
        &self,
        pair: &Pair,
        target_ratio: Option<f64>,
        current_coin_price: f64,
        other_coin_price: f64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_scout_history(&self, limit: i64) -> Result<Vec<ScoutRecord>>;

    /// Highest `current_coin_price` scouted from `symbol` within `hours` of `now`.
    async fn get_coin_recent_high_price(
        &self,
        symbol: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>>;

    async fn record_price_point(&self, symbol: &str, price: f64, at: DateTime<Utc>) -> Result<()>;

    /// Highest sampled price of `symbol` within `hours` of `now`.
    async fn get_coin_high_price_from_values(
        &self,
        symbol: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>>;

    // -- Trades -------------------------------------------------------------

    /// Insert a trade at `CREATED`.
    async fn insert_trade(
        &self,
        from: &str,
        to: &str,
        selling: bool,
        at: DateTime<Utc>,
    ) -> Result<Trade>;

    /// Persist state and amounts of an existing trade.
    async fn update_trade(&self, trade: &Trade) -> Result<()>;

    async fn get_trade(&self, id: i64) -> Result<Option<Trade>>;

    /// Latest completed rotation into `symbol`.
    async fn get_latest_buy_trade(&self, symbol: &str) -> Result<Option<Trade>>;

    /// Most recent trades, newest first.
    async fn get_trades(&self, limit: i64) -> Result<Vec<Trade>>;

    /// Trades that never reached `COMPLETE`.
    async fn get_open_trades(&self) -> Result<Vec<Trade>>;

    // -- Retention ----------------------------------------------------------

    async fn prune_scout_history(&self, before: DateTime<Utc>) -> Result<u64>;

    /// Downsample price points: minutely kept 24h, hourly 28 days,
    /// daily a year, weekly forever.
    async fn prune_value_history(&self, now: DateTime<Utc>) -> Result<()>;

    async fn clear_coin_values_before(
        &self,
        before: DateTime<Utc>,
        symbol: Option<&str>,
        interval: Option<Interval>,
    ) -> Result<u64>;

    // -- Live updates -------------------------------------------------------

    fn subscribe(&self) -> broadcast::Receiver<UpdateEvent>;
}
