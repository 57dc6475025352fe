//! Stop-loss strategy.
//!
//! Bridge-aware scouting with a trailing stop in front of it. When the
//! stop fires and the liquidation completes, the cycle ends there; no
//! rotation is evaluated on the same tick.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::StopLossConfig;
use crate::engine::orchestrator::LiquidationOutcome;
use crate::engine::stop_loss::{StopLossDecision, StopLossMonitor};
use crate::engine::trader::Trader;
use crate::strategy::{begin_cycle, ScoutStrategy};
use crate::types::{CycleOutcome, TradeState};

#[derive(Debug, Clone)]
pub struct StopLossStrategy {
    enabled: bool,
    monitor: StopLossMonitor,
}

impl StopLossStrategy {
    pub fn new(config: &StopLossConfig, bridge: &str, stable: &str) -> Self {
        info!(
            enabled = config.enabled,
            percentage = config.percentage,
            trailing_hours = config.trailing_hours,
            "Trailing stop-loss configured"
        );
        Self {
            enabled: config.enabled,
            monitor: StopLossMonitor::new(config, bridge, stable),
        }
    }
}

#[async_trait]
impl ScoutStrategy for StopLossStrategy {
    fn name(&self) -> &'static str {
        "stop_loss"
    }

    async fn evaluate_cycle(&self, trader: &Trader) -> Result<CycleOutcome> {
        let ctx = match begin_cycle(trader).await? {
            Ok(ctx) => ctx,
            Err(skipped) => return Ok(skipped),
        };
        let coin = ctx.holding.coin.as_str();

        if coin == trader.bridge() {
            return trader.scout_from_bridge(&ctx.snapshot, &ctx.holding).await;
        }

        if self.enabled {
            let now = trader.market().now();
            let decision = self
                .monitor
                .evaluate(trader.repo(), coin, ctx.price, now)
                .await;

            if let StopLossDecision::Liquidate { recent_high, drop_pct } = decision {
                warn!(
                    coin,
                    recent_high,
                    price = ctx.price,
                    drop_pct,
                    threshold = self.monitor.percentage(),
                    "Trailing stop-loss triggered"
                );
                match trader
                    .orchestrator()
                    .liquidate(coin, ctx.price, Some(ctx.holding.id))
                    .await?
                {
                    LiquidationOutcome::Completed { trade_id, holding } => {
                        return Ok(CycleOutcome::StopLossTriggered {
                            from: coin.to_string(),
                            to: holding.coin,
                            trade_id,
                        });
                    }
                    LiquidationOutcome::Aborted {
                        trade_id,
                        reached,
                        reason,
                    } if reached >= TradeState::Ordered => {
                        // Sold but not settled: the position is gone, don't rotate on top of it.
                        return Ok(CycleOutcome::Aborted {
                            trade_id: Some(trade_id),
                            reached: Some(reached),
                            reason,
                        });
                    }
                    LiquidationOutcome::Aborted { reason, .. } => {
                        warn!(coin, reason = %reason, "Stop-loss sell failed, scouting as usual");
                    }
                    LiquidationOutcome::NothingToLiquidate => {
                        info!(coin, "Balance too small for stop-loss, scouting as usual");
                    }
                }
            }
        }

        trader
            .jump_to_best_coin(&ctx.snapshot, &ctx.holding, ctx.price)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
