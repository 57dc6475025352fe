//! Shared trading context.
//!
//! `Trader` bundles the repository, the market gateway, the ratio engine
//! and the orchestrator, and implements the behaviour every strategy
//! builds on: startup bootstrap, jumping to the best coin, entering from
//! the bridge, and the periodic housekeeping jobs.

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::engine::orchestrator::{RotationOutcome, TradeOrchestrator};
use crate::engine::ratios::{best_positive, RatioEngine, UniverseSnapshot};
use crate::market::MarketGateway;
use crate::storage::Repository;
use crate::types::{CycleOutcome, HoldingRecord, RotorError, ScoutOutcome, Trade, TradeState};

#[derive(Debug, Clone)]
pub struct TraderSettings {
    pub bridge: String,
    pub stable: String,
    pub supported_coins: Vec<String>,
    /// Coins synced into the repository (supported + bridge + stable).
    pub universe: Vec<String>,
    /// Initial holding; empty picks a supported coin at random.
    pub current_coin: String,
    pub scout_multiplier: f64,
    pub bridge_entry_boost: f64,
    pub scout_history_prune_hours: i64,
}

impl TraderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let t = &config.trading;
        Self {
            bridge: t.bridge.clone(),
            stable: t.stable_coin().to_string(),
            supported_coins: t.supported_coins.clone(),
            universe: t.universe(),
            current_coin: t.current_coin.trim().to_string(),
            scout_multiplier: t.scout_multiplier,
            bridge_entry_boost: t.bridge_entry_boost,
            scout_history_prune_hours: config.history.scout_history_prune_hours,
        }
    }
}

/// Uniform pick without pulling in an RNG crate: v4 UUIDs carry 122
/// random bits.
fn random_index(len: usize) -> usize {
    (Uuid::new_v4().as_u128() % len as u128) as usize
}

pub struct Trader {
    repo: Arc<dyn Repository>,
    market: Arc<dyn MarketGateway>,
    settings: TraderSettings,
    ratios: RatioEngine,
    orchestrator: TradeOrchestrator,
}

impl Trader {
    pub fn new(
        repo: Arc<dyn Repository>,
        market: Arc<dyn MarketGateway>,
        settings: TraderSettings,
    ) -> Self {
        let ratios = RatioEngine::new(
            settings.bridge.clone(),
            settings.scout_multiplier,
            settings.bridge_entry_boost,
        );
        let orchestrator = TradeOrchestrator::new(
            repo.clone(),
            market.clone(),
            settings.bridge.clone(),
            settings.stable.clone(),
        );
        Self {
            repo,
            market,
            settings,
            ratios,
            orchestrator,
        }
    }

    pub fn repo(&self) -> &dyn Repository {
        self.repo.as_ref()
    }

    pub fn market(&self) -> &dyn MarketGateway {
        self.market.as_ref()
    }

    pub fn settings(&self) -> &TraderSettings {
        &self.settings
    }

    pub fn bridge(&self) -> &str {
        &self.settings.bridge
    }

    pub fn ratios(&self) -> &RatioEngine {
        &self.ratios
    }

    pub fn orchestrator(&self) -> &TradeOrchestrator {
        &self.orchestrator
    }

    /// Price of `coin` in bridge units. The bridge itself is worth 1.
    pub async fn bridge_price(&self, coin: &str) -> Result<Option<f64>> {
        if coin == self.settings.bridge {
            return Ok(Some(1.0));
        }
        self.market.get_price(coin, &self.settings.bridge).await
    }

    // -- Startup ------------------------------------------------------------

    /// Sync the coin universe, seed thresholds and settle the initial holding.
    pub async fn initialize(&self) -> Result<HoldingRecord> {
        self.repo.set_coins(&self.settings.universe).await?;
        self.initialize_trade_thresholds().await?;
        self.initialize_current_coin().await
    }

    /// Settle the initial holding when the log is empty.
    ///
    /// A configured symbol outside `supported_coins` is fatal: the agent
    /// never guesses a financial default. A randomly picked coin is bought
    /// from the bridge so trading can start.
    pub async fn initialize_current_coin(&self) -> Result<HoldingRecord> {
        if let Some(holding) = self.repo.current_holding().await? {
            info!(coin = %holding.coin, "Resuming with existing holding");
            return Ok(holding);
        }

        let supported = &self.settings.supported_coins;
        let configured = self.settings.current_coin.as_str();
        let symbol = if configured.is_empty() {
            if supported.is_empty() {
                return Err(RotorError::Config("supported_coins is empty".into()).into());
            }
            supported[random_index(supported.len())].clone()
        } else {
            configured.to_string()
        };

        if !supported.iter().any(|c| *c == symbol) {
            return Err(RotorError::Config(format!(
                "initial coin {symbol} is not in supported_coins and no holding is recorded"
            ))
            .into());
        }

        info!(coin = %symbol, "Setting initial coin");
        let holding = self.repo.set_current_coin(&symbol, self.market.now()).await?;

        if configured.is_empty() && symbol != self.settings.bridge {
            info!(coin = %symbol, "Purchasing initial coin to begin trading");
            match self.market.buy(&symbol, &self.settings.bridge).await {
                Ok(fill) => info!(coin = %symbol, amount = fill.amount, price = fill.price, "Ready to start trading"),
                Err(e) => warn!(coin = %symbol, error = %e, "Initial purchase failed"),
            }
        }
        Ok(holding)
    }

    /// Give every enabled pair without a threshold `from_price / to_price`.
    pub async fn initialize_trade_thresholds(&self) -> Result<()> {
        let mut seeded = 0usize;
        for pair in self.repo.get_pairs(true).await? {
            if pair.ratio.is_some() {
                continue;
            }
            let from_price = self.bridge_price(&pair.from_coin).await?;
            let to_price = self.bridge_price(&pair.to_coin).await?;
            match (from_price, to_price) {
                (Some(f), Some(t)) if t > 0.0 => {
                    self.repo.set_pair_ratio(pair.id, f / t).await?;
                    seeded += 1;
                }
                _ => warn!(pair = %pair, "Skipping threshold init, price unavailable"),
            }
        }
        if seeded > 0 {
            info!(seeded, "Trade thresholds initialised");
        }
        Ok(())
    }

    // -- Scouting -----------------------------------------------------------

    /// Rotate into the best positively scored target, if any.
    pub async fn jump_to_best_coin(
        &self,
        snapshot: &UniverseSnapshot,
        holding: &HoldingRecord,
        held_price: f64,
    ) -> Result<CycleOutcome> {
        let scores = self
            .ratios
            .get_ratios(
                self.repo.as_ref(),
                self.market.as_ref(),
                snapshot,
                &holding.coin,
                held_price,
            )
            .await;

        let Some(best) = best_positive(&scores) else {
            return Ok(CycleOutcome::NoOpportunity {
                holding: holding.coin.clone(),
            });
        };

        info!(
            from = %holding.coin,
            to = %best.pair.to_coin,
            score = best.score,
            "Will be jumping"
        );
        let outcome = self
            .orchestrator
            .rotate(&holding.coin, held_price, &best.pair.to_coin, Some(holding.id))
            .await?;
        Ok(into_cycle_outcome(&holding.coin, &best.pair.to_coin, outcome))
    }

    /// Enter a coin from the bridge using the best-average heuristic.
    pub async fn scout_from_bridge(
        &self,
        snapshot: &UniverseSnapshot,
        holding: &HoldingRecord,
    ) -> Result<CycleOutcome> {
        let outcome = self
            .ratios
            .best_entry_from_bridge(self.repo.as_ref(), self.market.as_ref(), snapshot)
            .await;

        match outcome {
            ScoutOutcome::NoOpportunity => Ok(CycleOutcome::NoOpportunity {
                holding: holding.coin.clone(),
            }),
            ScoutOutcome::Opportunity { coin, score } => {
                info!(from = %self.settings.bridge, to = %coin, potential = score, "Entering from bridge");
                let rotation = self
                    .orchestrator
                    .rotate(&self.settings.bridge, 1.0, &coin, Some(holding.id))
                    .await?;
                Ok(into_cycle_outcome(&self.settings.bridge, &coin, rotation))
            }
        }
    }

    /// Buy back into the market when the current position is too small to
    /// trade but the bridge holds funds. The coin bought is the first whose
    /// outgoing pairs all score non-positive.
    pub async fn bridge_scout(&self) -> Result<Option<HoldingRecord>> {
        let Some(holding) = self.repo.current_holding().await? else {
            return Ok(None);
        };
        let bridge = self.settings.bridge.as_str();

        let held_balance = self.market.get_balance(&holding.coin).await?;
        let Some(held_price) = self.bridge_price(&holding.coin).await? else {
            warn!(coin = %holding.coin, "No price for current coin, skipping bridge scout");
            return Ok(None);
        };
        let min_notional = self.market.get_min_notional(&holding.coin, bridge).await?;
        if held_balance * held_price > min_notional {
            return Ok(None);
        }

        let bridge_balance = self.market.get_balance(bridge).await?;
        let snapshot = UniverseSnapshot::capture(self.repo.as_ref()).await?;

        for coin in snapshot.coins().iter().filter(|c| c.symbol != bridge) {
            let Some(price) = self.bridge_price(&coin.symbol).await? else {
                continue;
            };
            let scores = self
                .ratios
                .get_ratios(self.repo.as_ref(), self.market.as_ref(), &snapshot, &coin.symbol, price)
                .await;
            if scores.iter().any(|s| s.score > 0.0) {
                continue;
            }
            if bridge_balance <= self.market.get_min_notional(&coin.symbol, bridge).await? {
                return Ok(None);
            }

            info!(coin = %coin, bridge_balance, "Purchasing with bridge funds");
            return match self
                .orchestrator
                .rotate(bridge, 1.0, &coin.symbol, Some(holding.id))
                .await?
            {
                RotationOutcome::Completed { holding, .. } => Ok(Some(holding)),
                RotationOutcome::Aborted { .. } => Ok(None),
            };
        }
        Ok(None)
    }

    // -- Housekeeping -------------------------------------------------------

    /// Record a price point for every enabled coin other than the bridge.
    pub async fn update_values(&self) -> Result<usize> {
        let now = self.market.now();
        let mut recorded = 0usize;
        for coin in self.repo.get_coins(true).await? {
            if coin.symbol == self.settings.bridge {
                continue;
            }
            match self.market.get_price(&coin.symbol, &self.settings.bridge).await {
                Ok(Some(price)) => {
                    self.repo.record_price_point(&coin.symbol, price, now).await?;
                    recorded += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(coin = %coin, error = %e, "Price lookup failed"),
            }
        }
        Ok(recorded)
    }

    pub async fn prune_history(&self) -> Result<()> {
        let now = self.market.now();
        let cutoff = now - Duration::hours(self.settings.scout_history_prune_hours);
        let deleted = self.repo.prune_scout_history(cutoff).await?;
        self.repo.prune_value_history(now).await?;
        info!(scout_rows_deleted = deleted, "History pruned");
        Ok(())
    }

    /// Surface trades that never completed. A trade at `ORDERED` means the
    /// sell went through but the buy did not: funds sit in the bridge while
    /// the holding pointer still names the old coin.
    pub async fn report_open_trades(&self) -> Result<Vec<Trade>> {
        let open = self.repo.get_open_trades().await?;
        for trade in &open {
            match trade.state {
                TradeState::Ordered => error!(
                    trade_id = trade.id,
                    from = %trade.from_coin,
                    to = %trade.to_coin,
                    traded_amount = ?trade.traded_amount,
                    "Trade stranded at ORDERED, funds parked in bridge"
                ),
                _ => warn!(
                    trade_id = trade.id,
                    from = %trade.from_coin,
                    to = %trade.to_coin,
                    "Trade never left CREATED"
                ),
            }
        }
        Ok(open)
    }
}

fn into_cycle_outcome(from: &str, to: &str, outcome: RotationOutcome) -> CycleOutcome {
    match outcome {
        RotationOutcome::Completed { trade_id, .. } => CycleOutcome::Rotated {
            from: from.to_string(),
            to: to.to_string(),
            trade_id,
        },
        RotationOutcome::Aborted {
            trade_id,
            reached,
            reason,
        } => CycleOutcome::Aborted {
            trade_id: Some(trade_id),
            reached: Some(reached),
            reason,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
