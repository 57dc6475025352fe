//! Ratio engine.
//!
//! Scores every outgoing pair of the held coin against its stored
//! threshold, net of round-trip fees:
//!
//! ```text
//! score = (held_price / target_price) * (1 - fee * mt) - pair.ratio
//! ```
//!
//! `mt` is the configured scout multiplier, boosted when the held coin is
//! the bridge. Rotations *into* the bridge use `mt = -0.001 / fee`, a fixed
//! parking premium independent of the configured sensitivity.

use anyhow::Result;
use tracing::{debug, warn};

use crate::market::MarketGateway;
use crate::storage::Repository;
use crate::types::{Coin, Pair, ScoutOutcome};

/// `fee * mt` for rotations into the bridge (`mt = -0.001 / fee`).
pub const BRIDGE_PARKING_PREMIUM: f64 = 0.001;

// ---------------------------------------------------------------------------
// Per-cycle snapshot
// ---------------------------------------------------------------------------

/// Enabled coins and pairs captured once at the start of a cycle. Pairs
/// disabled mid-cycle stay in the comparison until the next capture.
#[derive(Debug, Clone, Default)]
pub struct UniverseSnapshot {
    coins: Vec<Coin>,
    pairs: Vec<Pair>,
}

impl UniverseSnapshot {
    pub async fn capture(repo: &dyn Repository) -> Result<Self> {
        Ok(Self {
            coins: repo.get_coins(true).await?,
            pairs: repo.get_pairs(true).await?,
        })
    }

    pub fn from_parts(coins: Vec<Coin>, pairs: Vec<Pair>) -> Self {
        Self { coins, pairs }
    }

    pub fn coins(&self) -> &[Coin] {
        &self.coins
    }

    /// Pairs leaving `from`, in id order.
    pub fn pairs_from<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a Pair> + 'a {
        self.pairs.iter().filter(move |p| p.from_coin == from)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// A pair with its comparative score. Positive means rotate-worthy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
    pub pair: Pair,
    pub score: f64,
}

/// `cross_ratio * fee_factor - baseline`.
pub fn rotation_score(held_price: f64, target_price: f64, fee_factor: f64, baseline: f64) -> f64 {
    (held_price / target_price) * fee_factor - baseline
}

/// Highest positive score; the first one seen wins ties.
pub fn best_positive(scores: &[ScoredPair]) -> Option<&ScoredPair> {
    let mut best: Option<&ScoredPair> = None;
    for candidate in scores.iter().filter(|s| s.score > 0.0) {
        match best {
            Some(b) if candidate.score <= b.score => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// Mean of the positive scores, if there are any.
pub fn positive_average(scores: &[ScoredPair]) -> Option<f64> {
    let positive: Vec<f64> = scores.iter().map(|s| s.score).filter(|s| *s > 0.0).collect();
    if positive.is_empty() {
        None
    } else {
        Some(positive.iter().sum::<f64>() / positive.len() as f64)
    }
}

#[derive(Debug, Clone)]
pub struct RatioEngine {
    bridge: String,
    scout_multiplier: f64,
    bridge_entry_boost: f64,
}

impl RatioEngine {
    pub fn new(bridge: impl Into<String>, scout_multiplier: f64, bridge_entry_boost: f64) -> Self {
        Self {
            bridge: bridge.into(),
            scout_multiplier,
            bridge_entry_boost,
        }
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    /// Sensitivity multiplier for rotations leaving `from`.
    pub fn multiplier_for(&self, from: &str) -> f64 {
        if from == self.bridge {
            self.scout_multiplier * self.bridge_entry_boost
        } else {
            self.scout_multiplier
        }
    }

    /// `1 - transaction_fee * mt` for a `from -> to` rotation.
    pub fn fee_factor(&self, from: &str, to: &str, transaction_fee: f64) -> f64 {
        if to == self.bridge {
            1.0 + BRIDGE_PARKING_PREMIUM
        } else {
            1.0 - transaction_fee * self.multiplier_for(from)
        }
    }

    /// Score one pair. `None` when the pair has no threshold yet.
    pub fn score(
        &self,
        pair: &Pair,
        held_price: f64,
        target_price: f64,
        transaction_fee: f64,
    ) -> Option<f64> {
        let baseline = pair.ratio?;
        let factor = self.fee_factor(&pair.from_coin, &pair.to_coin, transaction_fee);
        Some(rotation_score(held_price, target_price, factor, baseline))
    }

    /// Score every enabled pair leaving `held`, in pair order.
    ///
    /// Every pair whose target price resolves gets a scout record, whatever
    /// its score. Lookup misses skip the pair and never fail the cycle.
    pub async fn get_ratios(
        &self,
        repo: &dyn Repository,
        market: &dyn MarketGateway,
        snapshot: &UniverseSnapshot,
        held: &str,
        held_price: f64,
    ) -> Vec<ScoredPair> {
        let now = market.now();
        let mut scores = Vec::new();

        for pair in snapshot.pairs_from(held) {
            let (target_price, exit_fee) = if pair.to_coin == self.bridge {
                (1.0, 0.0)
            } else {
                match self.target_quote(market, &pair.to_coin).await {
                    Some(quote) => quote,
                    None => continue,
                }
            };

            if let Err(e) = repo
                .log_scout(pair, pair.ratio, held_price, target_price, now)
                .await
            {
                warn!(pair = %pair, error = %e, "Failed to record scout");
            }

            let entry_fee = match market.get_fee(&pair.from_coin, &self.bridge, true).await {
                Ok(fee) => fee,
                Err(e) => {
                    warn!(coin = %pair.from_coin, error = %e, "Fee lookup failed, skipping pair");
                    continue;
                }
            };

            match self.score(pair, held_price, target_price, entry_fee + exit_fee) {
                Some(score) => {
                    debug!(pair = %pair, score, "Pair scored");
                    scores.push(ScoredPair {
                        pair: pair.clone(),
                        score,
                    });
                }
                None => debug!(pair = %pair, "No threshold yet, skipping pair"),
            }
        }

        scores
    }

    /// Pick the coin to enter from the bridge: for each enabled coin, score
    /// its own outgoing pairs and keep the best average of positive scores.
    pub async fn best_entry_from_bridge(
        &self,
        repo: &dyn Repository,
        market: &dyn MarketGateway,
        snapshot: &UniverseSnapshot,
    ) -> ScoutOutcome {
        let mut best: Option<(String, f64)> = None;

        for coin in snapshot.coins().iter().filter(|c| c.symbol != self.bridge) {
            let price = match market.get_price(&coin.symbol, &self.bridge).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    debug!(coin = %coin, error = %e, "Price lookup failed");
                    continue;
                }
            };

            let scores = self
                .get_ratios(repo, market, snapshot, &coin.symbol, price)
                .await;
            if let Some(avg) = positive_average(&scores) {
                if best.as_ref().map_or(true, |(_, b)| avg > *b) {
                    best = Some((coin.symbol.clone(), avg));
                }
            }
        }

        match best {
            Some((coin, score)) => ScoutOutcome::Opportunity { coin, score },
            None => ScoutOutcome::NoOpportunity,
        }
    }

    async fn target_quote(&self, market: &dyn MarketGateway, coin: &str) -> Option<(f64, f64)> {
        let price = match market.get_price(coin, &self.bridge).await {
            Ok(Some(p)) if p > 0.0 => p,
            Ok(_) => {
                warn!(coin, bridge = %self.bridge, "No price for target, skipping pair");
                return None;
            }
            Err(e) => {
                warn!(coin, error = %e, "Price lookup failed, skipping pair");
                return None;
            }
        };
        match market.get_fee(coin, &self.bridge, false).await {
            Ok(fee) => Some((price, fee)),
            Err(e) => {
                warn!(coin, error = %e, "Fee lookup failed, skipping pair");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
