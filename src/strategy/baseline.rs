//! Baseline strategy: jump to the best positively scored pair.

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::trader::Trader;
use crate::strategy::{begin_cycle, ScoutStrategy};
use crate::types::CycleOutcome;

#[derive(Debug, Default, Clone, Copy)]
pub struct BaselineStrategy;

#[async_trait]
impl ScoutStrategy for BaselineStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn evaluate_cycle(&self, trader: &Trader) -> Result<CycleOutcome> {
        let ctx = match begin_cycle(trader).await? {
            Ok(ctx) => ctx,
            Err(skipped) => return Ok(skipped),
        };
        trader
            .jump_to_best_coin(&ctx.snapshot, &ctx.holding, ctx.price)
            .await
    }
}
