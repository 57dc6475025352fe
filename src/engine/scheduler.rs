//! Job scheduler.
//!
//! Drives the scout cycle and the housekeeping jobs from one `select!`
//! loop, so no two jobs ever overlap. Every job runs under a hard timeout;
//! a failed or timed-out job is logged and the next tick proceeds.
//!
//! Trading jobs run in their own task. A timeout only stops the scheduler
//! waiting: an exchange leg already in progress runs to completion and
//! gets its trade row updated, and later trading ticks are skipped until
//! it has finished.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::engine::trader::Trader;
use crate::strategy::ScoutStrategy;
use crate::types::{CycleOutcome, HoldingRecord};

#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub scout: Duration,
    pub bridge_scout: Duration,
    pub value_snapshot: Duration,
    pub prune: Duration,
    pub cycle_timeout: Duration,
}

impl JobIntervals {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            scout: Duration::from_secs(agent.scout_interval_secs.max(1)),
            bridge_scout: Duration::from_secs(agent.bridge_scout_interval_secs.max(1)),
            value_snapshot: Duration::from_secs(agent.value_snapshot_interval_secs.max(1)),
            prune: Duration::from_secs(agent.prune_interval_secs.max(1)),
            cycle_timeout: Duration::from_secs(agent.cycle_timeout_secs),
        }
    }
}

/// Await `job` for at most `limit`. Errors and timeouts are logged and
/// reported as `None`. Only for jobs that never touch the exchange.
async fn guarded<T>(
    name: &'static str,
    limit: Duration,
    job: impl Future<Output = Result<T>>,
) -> Option<T> {
    match tokio::time::timeout(limit, job).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(job = name, error = %e, "Job failed, continuing to next tick");
            None
        }
        Err(_) => {
            error!(job = name, timeout_ms = limit.as_millis() as u64, "Job timed out");
            None
        }
    }
}

fn log_cycle_outcome(cycle: u64, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Aborted { .. } => error!(cycle, outcome = %outcome, "Cycle aborted"),
        CycleOutcome::StopLossTriggered { .. } => warn!(cycle, outcome = %outcome, "Cycle complete"),
        _ => info!(cycle, outcome = %outcome, "Cycle complete"),
    }
}

pub struct Scheduler {
    trader: Arc<Trader>,
    strategy: Arc<dyn ScoutStrategy>,
    intervals: JobIntervals,
    cycles: u64,
    /// Trading job that outlived its timeout and is still placing orders.
    in_flight: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(trader: Arc<Trader>, strategy: Box<dyn ScoutStrategy>, intervals: JobIntervals) -> Self {
        Self {
            trader,
            strategy: Arc::from(strategy),
            intervals,
            cycles: 0,
            in_flight: None,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Whether a timed-out trading job is still running. Clears the slot
    /// once it has finished.
    pub fn trading_busy(&mut self) -> bool {
        match &self.in_flight {
            Some(handle) if !handle.is_finished() => true,
            _ => {
                self.in_flight = None;
                false
            }
        }
    }

    /// Spawn a trading job and wait for it for at most the cycle timeout.
    ///
    /// On timeout the task is left running and parked in `in_flight`; its
    /// late result is only logged.
    async fn run_trading_job<T>(
        &mut self,
        name: &'static str,
        job: impl Future<Output = Result<T>> + Send + 'static,
    ) -> Option<T>
    where
        T: Send + 'static,
    {
        let limit = self.intervals.cycle_timeout;
        let mut handle = tokio::spawn(job);

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(Ok(Ok(value))) => Some(value),
            Ok(Ok(Err(e))) => {
                error!(job = name, error = %e, "Job failed, continuing to next tick");
                None
            }
            Ok(Err(e)) => {
                error!(job = name, error = %e, "Job task aborted");
                None
            }
            Err(_) => {
                error!(
                    job = name,
                    timeout_ms = limit.as_millis() as u64,
                    "Job timed out, letting in-flight orders finish"
                );
                self.in_flight = Some(tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(_)) => warn!(job = name, "Timed-out job finished late"),
                        Ok(Err(e)) => error!(job = name, error = %e, "Timed-out job failed"),
                        Err(e) => error!(job = name, error = %e, "Timed-out job task aborted"),
                    }
                }));
                None
            }
        }
    }

    /// One scout cycle: surface stranded trades, then let the strategy decide.
    ///
    /// Skipped while an earlier trading job is still in flight.
    pub async fn run_scout_cycle(&mut self) -> Option<CycleOutcome> {
        if self.trading_busy() {
            warn!("Previous trading job still running, skipping scout tick");
            return None;
        }
        self.cycles += 1;
        let cycle = self.cycles;
        let trader = self.trader.clone();
        let strategy = self.strategy.clone();

        let outcome = self
            .run_trading_job("scout", async move {
                trader.report_open_trades().await?;
                strategy.evaluate_cycle(&trader).await
            })
            .await;

        if let Some(outcome) = &outcome {
            log_cycle_outcome(cycle, outcome);
        }
        outcome
    }

    /// Buy back out of a dust position, unless a trading job is in flight.
    pub async fn run_bridge_scout(&mut self) -> Option<HoldingRecord> {
        if self.trading_busy() {
            warn!("Previous trading job still running, skipping bridge scout tick");
            return None;
        }
        let trader = self.trader.clone();
        let bought = self
            .run_trading_job("bridge_scout", async move { trader.bridge_scout().await })
            .await
            .flatten();
        if let Some(holding) = &bought {
            info!(coin = %holding.coin, "Bridge scout bought back in");
        }
        bought
    }

    /// Run until `shutdown` resolves. Returns the number of scout cycles run.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<u64> {
        let mut scout = interval(self.intervals.scout);
        let mut bridge_scout = interval(self.intervals.bridge_scout);
        let mut snapshot = interval(self.intervals.value_snapshot);
        let mut prune = interval(self.intervals.prune);
        for timer in [&mut scout, &mut bridge_scout, &mut snapshot, &mut prune] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        tokio::pin!(shutdown);

        let limit = self.intervals.cycle_timeout;
        info!(
            strategy = self.strategy.name(),
            scout_secs = self.intervals.scout.as_secs(),
            "Entering main loop. Press Ctrl+C to stop."
        );

        loop {
            tokio::select! {
                _ = scout.tick() => {
                    self.run_scout_cycle().await;
                }
                _ = bridge_scout.tick() => {
                    self.run_bridge_scout().await;
                }
                _ = snapshot.tick() => {
                    guarded("value_snapshot", limit, self.trader.update_values()).await;
                }
                _ = prune.tick() => {
                    guarded("prune", limit, self.trader.prune_history()).await;
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }

        info!(cycles = self.cycles, "Scheduler stopped");
        Ok(self.cycles)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
