//! Bridge-aware strategy.
//!
//! Identical to the baseline except when the holding is the bridge itself:
//! every enabled coin is then scored from its own perspective and the one
//! with the best average of positive scores is bought.

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::trader::Trader;
use crate::strategy::{begin_cycle, ScoutStrategy};
use crate::types::CycleOutcome;

#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeAwareStrategy;

#[async_trait]
impl ScoutStrategy for BridgeAwareStrategy {
    fn name(&self) -> &'static str {
        "bridge_aware"
    }

    async fn evaluate_cycle(&self, trader: &Trader) -> Result<CycleOutcome> {
        let ctx = match begin_cycle(trader).await? {
            Ok(ctx) => ctx,
            Err(skipped) => return Ok(skipped),
        };
        if ctx.holding.coin == trader.bridge() {
            return trader.scout_from_bridge(&ctx.snapshot, &ctx.holding).await;
        }
        trader
            .jump_to_best_coin(&ctx.snapshot, &ctx.holding, ctx.price)
            .await
    }
}
