//! Historical backtesting engine.
//!
//! Replays a price history through a strategy against the simulated
//! exchange and an in-memory repository, tracking the portfolio value in
//! bridge units at every step.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::engine::trader::{Trader, TraderSettings};
use crate::market::simulated::SimulatedMarket;
use crate::market::MarketGateway;
use crate::storage::SqliteRepository;
use crate::strategy::{build_strategy, ScoutStrategy};
use crate::types::CycleOutcome;

// ---------------------------------------------------------------------------
// Backtest results
// ---------------------------------------------------------------------------

/// Portfolio value at one replay step.
#[derive(Debug, Clone, Serialize)]
pub struct ValuePoint {
    pub time: DateTime<Utc>,
    pub value: Decimal,
    /// Change since the start, in percent.
    pub diff_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub strategy: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub steps: usize,
    pub initial_value: Decimal,
    pub final_value: Decimal,
    pub return_pct: f64,
    pub max_drawdown_pct: f64,
    pub trades: usize,
    pub rotations: usize,
    pub stop_losses: usize,
    pub failed_cycles: usize,
    pub history: Vec<ValuePoint>,
}

fn to_value(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or(Decimal::ZERO).round_dp(8)
}

fn pct_change(from: Decimal, to: Decimal) -> f64 {
    if from <= Decimal::ZERO {
        return 0.0;
    }
    ((to - from) / from * dec!(100)).to_f64().unwrap_or(0.0)
}

/// Largest peak-to-trough fall in `history`, in percent.
pub fn max_drawdown_pct(history: &[ValuePoint]) -> f64 {
    let mut peak = Decimal::ZERO;
    let mut max_dd = 0.0_f64;
    for point in history {
        if point.value > peak {
            peak = point.value;
        }
        if peak > Decimal::ZERO {
            let dd = ((peak - point.value) / peak * dec!(100)).to_f64().unwrap_or(0.0);
            max_dd = max_dd.max(dd);
        }
    }
    max_dd
}

// ---------------------------------------------------------------------------
// Backtester
// ---------------------------------------------------------------------------

pub struct Backtester {
    trader: Trader,
    market: Arc<SimulatedMarket>,
    strategy: Box<dyn ScoutStrategy>,
    step: Duration,
}

impl Backtester {
    pub fn new(
        trader: Trader,
        market: Arc<SimulatedMarket>,
        strategy: Box<dyn ScoutStrategy>,
        step_minutes: i64,
    ) -> Self {
        Self {
            trader,
            market,
            strategy,
            step: Duration::minutes(step_minutes.max(1)),
        }
    }

    /// Wire a backtest from configuration: price file, starting balance in
    /// the bridge, in-memory repository and the configured strategy.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let sim = &config.simulation;
        let market = Arc::new(SimulatedMarket::from_file(
            &sim.price_file,
            sim.fee,
            sim.min_notional,
        )?);
        market.deposit(&config.trading.bridge, sim.start_balance)?;

        let repo = Arc::new(SqliteRepository::in_memory().await?);
        let trader = Trader::new(repo, market.clone(), TraderSettings::from_config(config));
        let strategy = build_strategy(
            config.trading.strategy,
            &config.stop_loss,
            &config.trading.bridge,
            config.trading.stable_coin(),
        );
        Ok(Self::new(trader, market, strategy, sim.step_minutes))
    }

    pub fn market(&self) -> &SimulatedMarket {
        &self.market
    }

    pub fn trader(&self) -> &Trader {
        &self.trader
    }

    /// Replay the whole price history.
    pub async fn run_full(&self) -> Result<BacktestReport> {
        let Some((start, end)) = self.market.history_bounds() else {
            bail!("price history is empty");
        };
        self.run(start, end).await
    }

    /// Step from `start` to `end` (inclusive): snapshot values, scout,
    /// bridge-scout, then record the portfolio value.
    pub async fn run(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<BacktestReport> {
        if end < start {
            bail!("backtest end {end} is before start {start}");
        }
        let bridge = self.trader.bridge().to_string();

        self.market.set_time(start);
        self.trader.initialize().await?;

        let initial_value = to_value(self.market.collate_value(&bridge));
        info!(
            strategy = self.strategy.name(),
            %start,
            %end,
            initial_value = %initial_value,
            "Backtest starting"
        );

        let steps_per_day = (Duration::days(1).num_minutes() / self.step.num_minutes()).max(1) as usize;
        let mut history = Vec::new();
        let mut rotations = 0usize;
        let mut stop_losses = 0usize;
        let mut failed_cycles = 0usize;
        let mut step = 0usize;

        while self.market.now() <= end {
            if let Err(e) = self.trader.update_values().await {
                warn!(error = %e, "Value snapshot failed");
            }

            match self.strategy.evaluate_cycle(&self.trader).await {
                Ok(CycleOutcome::Rotated { .. }) => rotations += 1,
                Ok(CycleOutcome::StopLossTriggered { .. }) => stop_losses += 1,
                Ok(CycleOutcome::Aborted { .. }) => failed_cycles += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, at = %self.market.now(), "Scout cycle failed");
                    failed_cycles += 1;
                }
            }
            if let Err(e) = self.trader.bridge_scout().await {
                warn!(error = %e, "Bridge scout failed");
            }

            let value = to_value(self.market.collate_value(&bridge));
            let diff_pct = pct_change(initial_value, value);
            debug!(at = %self.market.now(), value = %value, diff_pct, "Backtest step");
            history.push(ValuePoint {
                time: self.market.now(),
                value,
                diff_pct,
            });

            step += 1;
            if step % steps_per_day == 0 {
                self.trader.prune_history().await?;
            }
            self.market.advance(self.step);
        }

        let final_value = history.last().map(|p| p.value).unwrap_or(initial_value);
        let trades = self.trader.repo().get_trades(i64::MAX).await?.len();
        let report = BacktestReport {
            strategy: self.strategy.name(),
            start,
            end,
            steps: history.len(),
            initial_value,
            final_value,
            return_pct: pct_change(initial_value, final_value),
            max_drawdown_pct: max_drawdown_pct(&history),
            trades,
            rotations,
            stop_losses,
            failed_cycles,
            history,
        };

        info!(
            steps = report.steps,
            trades = report.trades,
            final_value = %report.final_value,
            return_pct = format!("{:.2}%", report.return_pct),
            max_drawdown = format!("{:.2}%", report.max_drawdown_pct),
            "Backtest complete"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
