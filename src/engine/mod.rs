//! Core engine: score rotations, watch the trailing stop, execute trades.

pub mod orchestrator;
pub mod ratios;
pub mod scheduler;
pub mod stop_loss;
pub mod trader;

pub use orchestrator::{LiquidationOutcome, RotationOutcome, TradeOrchestrator};
pub use ratios::{RatioEngine, ScoredPair, UniverseSnapshot};
pub use scheduler::{JobIntervals, Scheduler};
pub use stop_loss::{StopLossDecision, StopLossMonitor};
pub use trader::{Trader, TraderSettings};
