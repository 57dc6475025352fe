//! Trailing stop-loss monitor.
//!
//! Stateless between cycles: the trailing high is rebuilt every time from
//! sampled price points and scout history, so a restart picks up exactly
//! where the previous process left off.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::StopLossConfig;
use crate::storage::Repository;

#[derive(Debug, Clone, PartialEq)]
pub enum StopLossDecision {
    /// Held coin is the bridge or the stable asset.
    NotApplicable,
    Hold { recent_high: f64, drop_pct: f64 },
    Liquidate { recent_high: f64, drop_pct: f64 },
}

/// Percentage drop of `current` below `recent_high`.
pub fn drawdown_pct(recent_high: f64, current: f64) -> f64 {
    if recent_high <= 0.0 {
        return 0.0;
    }
    (recent_high - current) / recent_high * 100.0
}

#[derive(Debug, Clone)]
pub struct StopLossMonitor {
    percentage: f64,
    trailing_hours: i64,
    bridge: String,
    stable: String,
}

impl StopLossMonitor {
    pub fn new(config: &StopLossConfig, bridge: &str, stable: &str) -> Self {
        Self {
            percentage: config.percentage,
            trailing_hours: config.trailing_hours,
            bridge: bridge.to_string(),
            stable: stable.to_string(),
        }
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn trailing_hours(&self) -> i64 {
        self.trailing_hours
    }

    /// Price-point lookback, rounded up to whole days.
    pub fn values_window_hours(&self) -> i64 {
        (self.trailing_hours / 24 + 1) * 24
    }

    /// Max of the sampled-price high and the scout-history high.
    /// Lookup failures count as "no data".
    pub async fn recent_high(
        &self,
        repo: &dyn Repository,
        coin: &str,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let from_values = repo
            .get_coin_high_price_from_values(coin, self.values_window_hours(), now)
            .await
            .unwrap_or_else(|e| {
                warn!(coin, error = %e, "Price point high lookup failed");
                None
            });
        let from_scouts = repo
            .get_coin_recent_high_price(coin, self.trailing_hours, now)
            .await
            .unwrap_or_else(|e| {
                warn!(coin, error = %e, "Scout history high lookup failed");
                None
            });

        match (from_values, from_scouts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub async fn evaluate(
        &self,
        repo: &dyn Repository,
        coin: &str,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> StopLossDecision {
        if coin == self.bridge || coin == self.stable {
            return StopLossDecision::NotApplicable;
        }

        let recent_high = match self.recent_high(repo, coin, now).await {
            Some(high) => high,
            None => {
                debug!(coin, "No price history, using current price as the high");
                current_price
            }
        };
        let drop_pct = drawdown_pct(recent_high, current_price);
        debug!(coin, recent_high, current_price, drop_pct, "Trailing stop check");

        if drop_pct >= self.percentage {
            StopLossDecision::Liquidate {
                recent_high,
                drop_pct,
            }
        } else {
            StopLossDecision::Hold {
                recent_high,
                drop_pct,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
