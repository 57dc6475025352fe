//! Shared types for the ROTOR agent.
//!
//! These types form the data model used across all modules: the coin
//! universe, directed pairs with their rotation thresholds, the
//! append-only holding log, trade lifecycle records and the history
//! rows the stop-loss monitor reads back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Coin universe
// ---------------------------------------------------------------------------

/// A tradeable asset. Coins are disabled, never deleted, when they drop
/// out of the configured universe so trade history stays consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub enabled: bool,
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// A directed (from → to) rotation candidate.
///
/// `ratio` is the stored baseline the live cross ratio must beat before a
/// rotation is considered. `None` until thresholds have been initialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub id: i64,
    pub from_coin: String,
    pub to_coin: String,
    pub ratio: Option<f64>,
    /// Both endpoints enabled.
    pub enabled: bool,
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from_coin, self.to_coin)
    }
}

/// Exchange ticker symbol for a coin quoted in the bridge, e.g. `ETHUSDT`.
pub fn ticker(coin: &str, bridge: &str) -> String {
    format!("{coin}{bridge}")
}

/// One entry of the append-only holding log. The current holding is the
/// most recent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingRecord {
    pub id: i64,
    pub coin: String,
    pub datetime: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// Lifecycle of a single rotation attempt. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradeState {
    Created,
    Ordered,
    Complete,
}

impl TradeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeState::Created => "CREATED",
            TradeState::Ordered => "ORDERED",
            TradeState::Complete => "COMPLETE",
        }
    }

    /// The only state reachable from this one, if any.
    pub fn next(&self) -> Option<TradeState> {
        match self {
            TradeState::Created => Some(TradeState::Ordered),
            TradeState::Ordered => Some(TradeState::Complete),
            TradeState::Complete => None,
        }
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TradeState {
    type Err = RotorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(TradeState::Created),
            "ORDERED" => Ok(TradeState::Ordered),
            "COMPLETE" => Ok(TradeState::Complete),
            other => Err(RotorError::Storage(format!("unknown trade state: {other}"))),
        }
    }
}

/// A persisted rotation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub from_coin: String,
    pub to_coin: String,
    /// Liquidation into the stable asset rather than a coin-to-coin rotation.
    pub selling: bool,
    pub state: TradeState,
    /// Balance of `from_coin` observed when the sell leg confirmed.
    pub from_starting_balance: Option<f64>,
    /// Bridge balance observed before the sell leg.
    pub bridge_starting_balance: Option<f64>,
    /// Quantity of `from_coin` sold (0 for a bridge pass-through).
    pub traded_amount: Option<f64>,
    /// Quantity of `to_coin` acquired.
    pub final_amount: Option<f64>,
    pub datetime: DateTime<Utc>,
}

impl Trade {
    /// Whether funds may be parked mid-rotation (sold but not yet bought).
    pub fn is_stranded(&self) -> bool {
        self.state == TradeState::Ordered
    }
}

// ---------------------------------------------------------------------------
// History rows
// ---------------------------------------------------------------------------

/// Observation written for every evaluated pair during a scout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutRecord {
    pub id: i64,
    pub pair_id: i64,
    pub from_coin: String,
    pub to_coin: String,
    pub target_ratio: Option<f64>,
    pub current_coin_price: f64,
    pub other_coin_price: f64,
    pub datetime: DateTime<Utc>,
}

/// Retention class of a price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Minutely,
    Hourly,
    Daily,
    Weekly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minutely => "MINUTELY",
            Interval::Hourly => "HOURLY",
            Interval::Daily => "DAILY",
            Interval::Weekly => "WEEKLY",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = RotorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MINUTELY" => Ok(Interval::Minutely),
            "HOURLY" => Ok(Interval::Hourly),
            "DAILY" => Ok(Interval::Daily),
            "WEEKLY" => Ok(Interval::Weekly),
            other => Err(RotorError::Storage(format!("unknown interval: {other}"))),
        }
    }
}

/// A sampled coin price against the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub coin: String,
    pub price: f64,
    pub interval: Interval,
    pub datetime: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Exchange results and outcomes
// ---------------------------------------------------------------------------

/// A confirmed order leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Fill price in bridge units.
    pub price: f64,
    /// Quantity of the traded coin.
    pub amount: f64,
}

/// Result of scouting entries out of the bridge asset.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoutOutcome {
    NoOpportunity,
    Opportunity { coin: String, score: f64 },
}

/// What a single scout cycle ended up doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CycleOutcome {
    /// No candidate beat its threshold.
    NoOpportunity { holding: String },
    /// Rotation completed and the holding pointer advanced.
    Rotated { from: String, to: String, trade_id: i64 },
    /// Trailing stop fired and the position was moved to the stable asset.
    StopLossTriggered { from: String, to: String, trade_id: i64 },
    /// Nothing evaluated this cycle.
    Skipped { reason: String },
    /// An exchange leg failed; the trade stays at whatever state it reached.
    Aborted { trade_id: Option<i64>, reached: Option<TradeState>, reason: String },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::NoOpportunity { holding } => write!(f, "holding {holding}"),
            CycleOutcome::Rotated { from, to, trade_id } => {
                write!(f, "rotated {from} -> {to} (trade #{trade_id})")
            }
            CycleOutcome::StopLossTriggered { from, to, trade_id } => {
                write!(f, "stop-loss {from} -> {to} (trade #{trade_id})")
            }
            CycleOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            CycleOutcome::Aborted { trade_id, reached, reason } => write!(
                f,
                "aborted at {} (trade {}): {reason}",
                reached.map(|s| s.as_str()).unwrap_or("-"),
                trade_id.map(|id| format!("#{id}")).unwrap_or_else(|| "-".into()),
            ),
        }
    }
}

/// Row change pushed to live subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEvent {
    pub table: &'static str,
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for ROTOR.
#[derive(Debug, thiserror::Error)]
pub enum RotorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown coin: {0}")]
    UnknownCoin(String),

    #[error("Invalid trade transition for trade #{trade_id}: {from} -> {to}")]
    InvalidTransition {
        trade_id: i64,
        from: TradeState,
        to: TradeState,
    },

    #[error("Holding pointer moved concurrently: expected predecessor {expected:?}, found {found:?}")]
    HoldingConflict {
        expected: Option<i64>,
        found: Option<i64>,
    },

    #[error("Exchange {leg} leg failed: {message}")]
    Exchange { leg: &'static str, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
