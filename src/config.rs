//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! A handful of trading options can be overridden from the environment
//! so the same file serves several sessions.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::RotorError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub scout_interval_secs: u64,
    /// Hard upper bound on a single scout cycle.
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_bridge_scout_interval")]
    pub bridge_scout_interval_secs: u64,
    #[serde(default = "default_value_snapshot_interval")]
    pub value_snapshot_interval_secs: u64,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    /// Quote asset every rotation passes through.
    pub bridge: String,
    pub supported_coins: Vec<String>,
    /// Initial holding. Empty means pick one of `supported_coins` at random.
    #[serde(default)]
    pub current_coin: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    pub scout_multiplier: f64,
    /// Multiplier boost applied when rotating out of the bridge asset.
    #[serde(default = "default_bridge_entry_boost")]
    pub bridge_entry_boost: f64,
    /// Liquidation target for the stop-loss. Defaults to the bridge.
    #[serde(default)]
    pub stable_coin: Option<String>,
}

impl TradingConfig {
    pub fn stable_coin(&self) -> &str {
        self.stable_coin.as_deref().unwrap_or(&self.bridge)
    }

    /// Coins tracked in the repository: the supported list plus the bridge
    /// and stable asset, so parking and liquidation targets have pairs too.
    pub fn universe(&self) -> Vec<String> {
        let mut coins = self.supported_coins.clone();
        for extra in [self.bridge.as_str(), self.stable_coin()] {
            if !coins.iter().any(|c| c == extra) {
                coins.push(extra.to_string());
            }
        }
        coins
    }
}

/// Scouting policy selected at startup.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Default,
    BridgeAware,
    StopLoss,
}

impl std::str::FromStr for StrategyKind {
    type Err = RotorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(StrategyKind::Default),
            "bridge_aware" | "usdt_aware" => Ok(StrategyKind::BridgeAware),
            "stop_loss" => Ok(StrategyKind::StopLoss),
            other => Err(RotorError::Config(format!("unknown strategy: {other}"))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StopLossConfig {
    pub enabled: bool,
    /// Drawdown from the trailing high, in percent, that forces liquidation.
    pub percentage: f64,
    pub trailing_hours: i64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: 10.0,
            trailing_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    pub scout_history_prune_hours: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            scout_history_prune_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    /// JSON price history: `{ "ETHUSDT": [["2021-06-10T20:00:00Z", 2500.0], ...] }`.
    pub price_file: String,
    pub start_balance: f64,
    pub fee: f64,
    pub min_notional: f64,
    #[serde(default = "default_step_minutes")]
    pub step_minutes: i64,
    /// Simulated seconds per wall-clock second in replay mode.
    #[serde(default = "default_replay_speed")]
    pub replay_speed: f64,
    /// Run the fast backtest instead of the real-time replay loop.
    #[serde(default)]
    pub backtest: bool,
}

fn default_bridge_scout_interval() -> u64 {
    60
}

fn default_value_snapshot_interval() -> u64 {
    60
}

fn default_prune_interval() -> u64 {
    3600
}

fn default_bridge_entry_boost() -> f64 {
    1.4
}

fn default_dashboard_port() -> u16 {
    5123
}

fn default_step_minutes() -> i64 {
    1
}

fn default_replay_speed() -> f64 {
    60.0
}

impl AppConfig {
    /// Load configuration from a TOML file, apply env overrides and validate.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// `ROTOR_BRIDGE`, `ROTOR_CURRENT_COIN` and `ROTOR_STRATEGY` win over the file.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(bridge) = std::env::var("ROTOR_BRIDGE") {
            self.trading.bridge = bridge;
        }
        if let Ok(coin) = std::env::var("ROTOR_CURRENT_COIN") {
            self.trading.current_coin = coin;
        }
        if let Ok(strategy) = std::env::var("ROTOR_STRATEGY") {
            self.trading.strategy = strategy.parse()?;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), RotorError> {
        let t = &self.trading;
        if t.bridge.trim().is_empty() {
            return Err(RotorError::Config("bridge symbol is empty".into()));
        }
        if t.supported_coins.is_empty() {
            return Err(RotorError::Config("supported_coins is empty".into()));
        }
        if t.scout_multiplier < 0.0 {
            return Err(RotorError::Config(format!(
                "scout_multiplier must be >= 0, got {}",
                t.scout_multiplier
            )));
        }
        if self.agent.cycle_timeout_secs == 0 {
            return Err(RotorError::Config("cycle_timeout_secs must be > 0".into()));
        }
        let sl = &self.stop_loss;
        if sl.enabled && !(sl.percentage > 0.0 && sl.percentage <= 100.0) {
            return Err(RotorError::Config(format!(
                "stop_loss.percentage must be in (0, 100], got {}",
                sl.percentage
            )));
        }
        if sl.trailing_hours <= 0 {
            return Err(RotorError::Config("stop_loss.trailing_hours must be > 0".into()));
        }
        if self.simulation.step_minutes <= 0 {
            return Err(RotorError::Config("simulation.step_minutes must be > 0".into()));
        }
        Ok(())
    }
}
