//! Scouting strategies.
//!
//! Each variant decides what one scout cycle does with the current
//! holding. They share the `Trader` context and differ only in how they
//! treat the bridge and whether the trailing stop is consulted:
//!
//! - `baseline`: always jump to the best positively scored pair.
//! - `bridge_aware`: when parked in the bridge, pick an entry by the best
//!   average of positive scores.
//! - `stop_loss`: bridge-aware, plus a trailing stop-loss checked before
//!   any rotation.

pub mod baseline;
pub mod bridge_aware;
pub mod stop_loss;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::config::{StopLossConfig, StrategyKind};
use crate::engine::ratios::UniverseSnapshot;
use crate::engine::trader::Trader;
use crate::types::{ticker, CycleOutcome, HoldingRecord};

pub use baseline::BaselineStrategy;
pub use bridge_aware::BridgeAwareStrategy;
pub use stop_loss::StopLossStrategy;

#[async_trait]
pub trait ScoutStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one scout cycle to completion.
    async fn evaluate_cycle(&self, trader: &Trader) -> Result<CycleOutcome>;
}

/// Instantiate the strategy selected in configuration.
pub fn build_strategy(
    kind: StrategyKind,
    stop_loss: &StopLossConfig,
    bridge: &str,
    stable: &str,
) -> Box<dyn ScoutStrategy> {
    match kind {
        StrategyKind::Default => Box::new(BaselineStrategy),
        StrategyKind::BridgeAware => Box::new(BridgeAwareStrategy),
        StrategyKind::StopLoss => Box::new(StopLossStrategy::new(stop_loss, bridge, stable)),
    }
}

// ---------------------------------------------------------------------------
// Shared cycle plumbing
// ---------------------------------------------------------------------------

/// What a cycle works from: the holding observed at the start, its price,
/// and the enabled universe captured once.
pub struct CycleContext {
    pub holding: HoldingRecord,
    pub price: f64,
    pub snapshot: UniverseSnapshot,
}

/// Load the cycle context, or the reason the cycle has nothing to do.
pub async fn begin_cycle(trader: &Trader) -> Result<Result<CycleContext, CycleOutcome>> {
    let Some(holding) = trader.repo().current_holding().await? else {
        return Ok(Err(CycleOutcome::Skipped {
            reason: "no current holding".into(),
        }));
    };

    let Some(price) = trader.bridge_price(&holding.coin).await? else {
        let symbol = ticker(&holding.coin, trader.bridge());
        warn!(symbol = %symbol, "Skipping scouting, current coin not found");
        return Ok(Err(CycleOutcome::Skipped {
            reason: format!("no price for {symbol}"),
        }));
    };

    let snapshot = UniverseSnapshot::capture(trader.repo()).await?;
    Ok(Ok(CycleContext {
        holding,
        price,
        snapshot,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_strategy_names() {
        let sl = StopLossConfig::default();
        assert_eq!(build_strategy(StrategyKind::Default, &sl, "USDT", "USDT").name(), "default");
        assert_eq!(
            build_strategy(StrategyKind::BridgeAware, &sl, "USDT", "USDT").name(),
            "bridge_aware"
        );
        assert_eq!(build_strategy(StrategyKind::StopLoss, &sl, "USDT", "USDT").name(), "stop_loss");
    }
}
