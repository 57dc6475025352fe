//! Trade orchestrator.
//!
//! Sequences the exchange legs of a liquidation or a rotation through the
//! bridge and keeps the trade record and holding pointer in step:
//!
//! - the trade is `CREATED` before the first exchange call,
//! - `ORDERED` once the sell leg (or bridge pass-through) confirms,
//! - `COMPLETE` once the buy leg confirms,
//! - the holding pointer moves only after `COMPLETE`.
//!
//! A failed leg aborts the attempt and leaves the trade at the state it
//! reached. Nothing is rolled back.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::market::MarketGateway;
use crate::storage::{Repository, TradeLog};
use crate::types::{HoldingRecord, OrderResult, TradeState};

#[derive(Debug, Clone, PartialEq)]
pub enum LiquidationOutcome {
    /// Balance below the exchange's minimum notional. No trade recorded.
    NothingToLiquidate,
    Completed {
        trade_id: i64,
        holding: HoldingRecord,
    },
    Aborted {
        trade_id: i64,
        reached: TradeState,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RotationOutcome {
    Completed {
        trade_id: i64,
        holding: HoldingRecord,
        /// Fill price of the buy leg (1 when the target is the bridge).
        price: f64,
    },
    Aborted {
        trade_id: i64,
        reached: TradeState,
        reason: String,
    },
}

#[derive(Clone)]
pub struct TradeOrchestrator {
    repo: Arc<dyn Repository>,
    market: Arc<dyn MarketGateway>,
    bridge: String,
    stable: String,
}

impl TradeOrchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        market: Arc<dyn MarketGateway>,
        bridge: impl Into<String>,
        stable: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            market,
            bridge: bridge.into(),
            stable: stable.into(),
        }
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn stable(&self) -> &str {
        &self.stable
    }

    /// Move the whole `from` position into the stable asset.
    ///
    /// `expected_holding` is the holding record id the caller observed; the
    /// pointer is only advanced if it is still the latest.
    pub async fn liquidate(
        &self,
        from: &str,
        price: f64,
        expected_holding: Option<i64>,
    ) -> Result<LiquidationOutcome> {
        let balance = self.market.get_balance(from).await?;
        let min_notional = self.market.get_min_notional(from, &self.bridge).await?;
        if balance * price < min_notional {
            info!(coin = from, balance, price, min_notional, "Nothing to liquidate");
            return Ok(LiquidationOutcome::NothingToLiquidate);
        }
        let bridge_before = self.market.get_balance(&self.bridge).await?;

        let repo = self.repo.as_ref();
        let mut trade = TradeLog::start(repo, from, &self.stable, true, self.market.now()).await?;
        info!(trade_id = trade.id(), coin = from, balance, "Liquidating position");

        let sold = match self.market.sell(from, &self.bridge).await {
            Ok(fill) => fill,
            Err(e) => {
                error!(trade_id = trade.id(), coin = from, error = %e, "Stop-loss sell failed");
                return Ok(LiquidationOutcome::Aborted {
                    trade_id: trade.id(),
                    reached: trade.state(),
                    reason: e.to_string(),
                });
            }
        };
        trade.mark_ordered(balance, bridge_before, sold.amount).await?;

        let final_amount = if self.stable == self.bridge {
            bridge_proceeds(&sold)
        } else {
            match self.market.buy(&self.stable, &self.bridge).await {
                Ok(fill) => fill.amount,
                Err(e) => {
                    error!(
                        trade_id = trade.id(),
                        stable = %self.stable,
                        error = %e,
                        "Stable buy failed, funds parked in bridge"
                    );
                    return Ok(LiquidationOutcome::Aborted {
                        trade_id: trade.id(),
                        reached: trade.state(),
                        reason: e.to_string(),
                    });
                }
            }
        };
        trade.mark_complete(final_amount).await?;

        let holding = self
            .repo
            .advance_holding(&self.stable, expected_holding, self.market.now())
            .await?;
        info!(trade_id = trade.id(), from, to = %self.stable, "Liquidation complete");
        Ok(LiquidationOutcome::Completed {
            trade_id: trade.id(),
            holding,
        })
    }

    /// Rotate `from` into `to` through the bridge.
    ///
    /// The sell leg runs only when `from` is not the bridge and its notional
    /// clears the exchange minimum; otherwise the bridge balance is used as
    /// is. The buy leg is skipped when `to` is the bridge.
    pub async fn rotate(
        &self,
        from: &str,
        from_price: f64,
        to: &str,
        expected_holding: Option<i64>,
    ) -> Result<RotationOutcome> {
        let balance = self.market.get_balance(from).await?;
        let min_notional = self.market.get_min_notional(from, &self.bridge).await?;
        let can_sell = from != self.bridge && balance * from_price > min_notional;
        let bridge_before = self.market.get_balance(&self.bridge).await?;

        let repo = self.repo.as_ref();
        let mut trade = TradeLog::start(repo, from, to, false, self.market.now()).await?;

        let sold: Option<OrderResult> = if can_sell {
            match self.market.sell(from, &self.bridge).await {
                Ok(fill) => Some(fill),
                Err(e) => {
                    warn!(trade_id = trade.id(), coin = from, error = %e, "Couldn't sell, back to scouting");
                    return Ok(RotationOutcome::Aborted {
                        trade_id: trade.id(),
                        reached: trade.state(),
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            info!(trade_id = trade.id(), coin = from, balance, "Skipping sell");
            None
        };
        let traded = sold.map(|f| f.amount).unwrap_or(0.0);
        trade.mark_ordered(balance, bridge_before, traded).await?;

        let (price, final_amount) = if to == self.bridge {
            (1.0, sold.as_ref().map(bridge_proceeds).unwrap_or(0.0))
        } else {
            match self.market.buy(to, &self.bridge).await {
                Ok(fill) => (fill.price, fill.amount),
                Err(e) => {
                    error!(
                        trade_id = trade.id(),
                        from,
                        to,
                        error = %e,
                        "Couldn't buy, funds parked in bridge"
                    );
                    return Ok(RotationOutcome::Aborted {
                        trade_id: trade.id(),
                        reached: trade.state(),
                        reason: e.to_string(),
                    });
                }
            }
        };
        trade.mark_complete(final_amount).await?;

        let holding = self
            .repo
            .advance_holding(to, expected_holding, self.market.now())
            .await?;
        if let Err(e) = self.update_trade_threshold(to, price).await {
            warn!(coin = to, error = %e, "Threshold refresh failed");
        }

        info!(trade_id = trade.id(), from, to, price, "Rotation complete");
        Ok(RotationOutcome::Completed {
            trade_id: trade.id(),
            holding,
            price,
        })
    }

    /// Re-anchor every `X -> coin` threshold to the current price ratio.
    pub async fn update_trade_threshold(&self, coin: &str, coin_price: f64) -> Result<()> {
        if coin_price <= 0.0 {
            warn!(coin, coin_price, "Refusing to anchor thresholds to a non-positive price");
            return Ok(());
        }
        for pair in self.repo.get_pairs(false).await? {
            if pair.to_coin != coin {
                continue;
            }
            let from_price = if pair.from_coin == self.bridge {
                Some(1.0)
            } else {
                self.market.get_price(&pair.from_coin, &self.bridge).await?
            };
            match from_price {
                Some(p) => self.repo.set_pair_ratio(pair.id, p / coin_price).await?,
                None => warn!(pair = %pair, "No price, threshold not updated"),
            }
        }
        Ok(())
    }
}

/// Bridge units a sell leg brought in, recorded as the final amount of
/// trades that end in the bridge.
fn bridge_proceeds(fill: &OrderResult) -> f64 {
    fill.price * fill.amount
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MockMarketGateway;
    use crate::storage::SqliteRepository;
    use anyhow::anyhow;
    use chrono::Utc;
    use std::collections::HashMap;

    async fn repo() -> Arc<SqliteRepository> {
        let repo = SqliteRepository::in_memory().await.unwrap();
        let coins: Vec<String> = ["ETH", "BTC", "USDT"].iter().map(|s| s.to_string()).collect();
        repo.set_coins(&coins).await.unwrap();
        Arc::new(repo)
    }

    /// Gateway with fixed prices and balances; order legs set per test.
    fn gateway(prices: &[(&str, f64)], balances: &[(&str, f64)]) -> MockMarketGateway {
        let prices: HashMap<String, f64> =
            prices.iter().map(|(c, p)| (c.to_string(), *p)).collect();
        let balances: HashMap<String, f64> =
            balances.iter().map(|(c, b)| (c.to_string(), *b)).collect();
        let mut m = MockMarketGateway::new();
        m.expect_now().returning(Utc::now);
        m.expect_get_price()
            .returning(move |coin, _| Ok(prices.get(coin).copied()));
        m.expect_get_balance()
            .returning(move |coin| Ok(balances.get(coin).copied().unwrap_or(0.0)));
        m.expect_get_min_notional().returning(|_, _| Ok(10.0));
        m
    }

    fn orchestrator(
        repo: &Arc<SqliteRepository>,
        market: MockMarketGateway,
        stable: &str,
    ) -> TradeOrchestrator {
        TradeOrchestrator::new(repo.clone(), Arc::new(market), "USDT", stable)
    }

    #[tokio::test]
    async fn test_liquidation_below_min_notional_is_noop() {
        let repo = repo().await;
        let mut m = gateway(&[("ETH", 2000.0)], &[("ETH", 0.001)]);
        m.expect_sell().times(0);
        m.expect_buy().times(0);

        let outcome = orchestrator(&repo, m, "USDT")
            .liquidate("ETH", 2000.0, None)
            .await
            .unwrap();
        assert_eq!(outcome, LiquidationOutcome::NothingToLiquidate);
        assert!(repo.get_trades(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_liquidation_into_bridge_skips_buy() {
        let repo = repo().await;
        let held = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0)], &[("ETH", 1.0)]);
        m.expect_sell().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 1.0,
            })
        });
        m.expect_buy().times(0);

        let outcome = orchestrator(&repo, m, "USDT")
            .liquidate("ETH", 2000.0, Some(held.id))
            .await
            .unwrap();
        let LiquidationOutcome::Completed { trade_id, holding } = outcome else {
            panic!("expected completed liquidation");
        };
        assert_eq!(holding.coin, "USDT");
        let trade = repo.get_trade(trade_id).await.unwrap().unwrap();
        assert!(trade.selling);
        assert_eq!(trade.state, TradeState::Complete);
        assert_eq!(trade.final_amount, Some(2000.0));
    }

    #[tokio::test]
    async fn test_liquidation_buys_distinct_stable() {
        let repo = repo().await;
        let held = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0), ("BTC", 40000.0)], &[("ETH", 1.0)]);
        m.expect_sell().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 1.0,
            })
        });
        m.expect_buy()
            .withf(|coin: &str, bridge: &str| coin == "BTC" && bridge == "USDT")
            .times(1)
            .returning(|_, _| {
                Ok(OrderResult {
                    price: 40000.0,
                    amount: 0.05,
                })
            });

        let outcome = orchestrator(&repo, m, "BTC")
            .liquidate("ETH", 2000.0, Some(held.id))
            .await
            .unwrap();
        assert!(matches!(outcome, LiquidationOutcome::Completed { .. }));
        assert_eq!(repo.current_holding().await.unwrap().unwrap().coin, "BTC");
    }

    #[tokio::test]
    async fn test_liquidation_sell_failure_stays_created() {
        let repo = repo().await;
        let held = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0)], &[("ETH", 1.0)]);
        m.expect_sell()
            .times(1)
            .returning(|_, _| Err(anyhow!("exchange down")));

        let outcome = orchestrator(&repo, m, "USDT")
            .liquidate("ETH", 2000.0, Some(held.id))
            .await
            .unwrap();
        let LiquidationOutcome::Aborted { trade_id, reached, .. } = outcome else {
            panic!("expected abort");
        };
        assert_eq!(reached, TradeState::Created);
        let trade = repo.get_trade(trade_id).await.unwrap().unwrap();
        assert_eq!(trade.state, TradeState::Created);
        assert_eq!(repo.current_holding().await.unwrap().unwrap().coin, "ETH");
    }

    #[tokio::test]
    async fn test_rotation_buy_failure_leaves_trade_ordered() {
        let repo = repo().await;
        let held = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0), ("BTC", 40000.0)], &[("ETH", 1.0)]);
        m.expect_sell().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 1.0,
            })
        });
        m.expect_buy()
            .times(1)
            .returning(|_, _| Err(anyhow!("insufficient liquidity")));

        let outcome = orchestrator(&repo, m, "USDT")
            .rotate("ETH", 2000.0, "BTC", Some(held.id))
            .await
            .unwrap();
        let RotationOutcome::Aborted { trade_id, reached, reason } = outcome else {
            panic!("expected abort");
        };
        assert_eq!(reached, TradeState::Ordered);
        assert!(reason.contains("insufficient liquidity"));

        let trade = repo.get_trade(trade_id).await.unwrap().unwrap();
        assert_eq!(trade.state, TradeState::Ordered);
        assert_eq!(trade.traded_amount, Some(1.0));
        assert!(trade.is_stranded());
        assert_eq!(repo.current_holding().await.unwrap().unwrap().id, held.id);
        assert_eq!(repo.get_open_trades().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_completes_and_refreshes_thresholds() {
        let repo = repo().await;
        let held = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0), ("BTC", 40000.0)], &[("ETH", 1.0)]);
        m.expect_sell().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 1.0,
            })
        });
        m.expect_buy().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 40000.0,
                amount: 0.0499,
            })
        });

        let outcome = orchestrator(&repo, m, "USDT")
            .rotate("ETH", 2000.0, "BTC", Some(held.id))
            .await
            .unwrap();
        let RotationOutcome::Completed { trade_id, holding, price } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(holding.coin, "BTC");
        assert_eq!(price, 40000.0);
        assert_eq!(
            repo.get_trade(trade_id).await.unwrap().unwrap().state,
            TradeState::Complete
        );

        let eth_btc = repo.get_pair("ETH", "BTC").await.unwrap().unwrap();
        assert!((eth_btc.ratio.unwrap() - 0.05).abs() < 1e-12);
        let usdt_btc = repo.get_pair("USDT", "BTC").await.unwrap().unwrap();
        assert!((usdt_btc.ratio.unwrap() - 1.0 / 40000.0).abs() < 1e-15);
    }

    #[tokio::test]
    async fn test_rotation_from_bridge_skips_sell() {
        let repo = repo().await;
        let held = repo.set_current_coin("USDT", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0)], &[("USDT", 1000.0)]);
        m.expect_sell().times(0);
        m.expect_buy().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 0.4995,
            })
        });

        let outcome = orchestrator(&repo, m, "USDT")
            .rotate("USDT", 1.0, "ETH", Some(held.id))
            .await
            .unwrap();
        let RotationOutcome::Completed { trade_id, .. } = outcome else {
            panic!("expected completion");
        };
        let trade = repo.get_trade(trade_id).await.unwrap().unwrap();
        assert_eq!(trade.traded_amount, Some(0.0));
        assert_eq!(trade.bridge_starting_balance, Some(1000.0));
    }

    #[tokio::test]
    async fn test_rotation_into_bridge_skips_buy() {
        let repo = repo().await;
        let held = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0)], &[("ETH", 1.0)]);
        m.expect_sell().times(1).returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 1.0,
            })
        });
        m.expect_buy().times(0);

        let outcome = orchestrator(&repo, m, "USDT")
            .rotate("ETH", 2000.0, "USDT", Some(held.id))
            .await
            .unwrap();
        let RotationOutcome::Completed {
            trade_id,
            holding,
            price,
        } = outcome
        else {
            panic!("expected completion");
        };
        assert_eq!(holding.coin, "USDT");
        assert_eq!(price, 1.0);
        // Same meaning as a liquidation into the bridge: the sell proceeds,
        // not the whole bridge balance.
        let trade = repo.get_trade(trade_id).await.unwrap().unwrap();
        assert_eq!(trade.final_amount, Some(2000.0));
    }

    #[tokio::test]
    async fn test_stale_holding_is_not_overwritten() {
        let repo = repo().await;
        let stale = repo.set_current_coin("ETH", Utc::now()).await.unwrap();
        repo.set_current_coin("BTC", Utc::now()).await.unwrap();
        let mut m = gateway(&[("ETH", 2000.0)], &[("ETH", 1.0)]);
        m.expect_sell().returning(|_, _| {
            Ok(OrderResult {
                price: 2000.0,
                amount: 1.0,
            })
        });

        let result = orchestrator(&repo, m, "USDT")
            .rotate("ETH", 2000.0, "USDT", Some(stale.id))
            .await;
        assert!(result.is_err());
        assert_eq!(repo.current_holding().await.unwrap().unwrap().coin, "BTC");
    }
}
