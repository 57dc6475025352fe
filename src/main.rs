//! ROTOR: autonomous bridge-asset coin rotation agent.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the repository and the simulated exchange, then either runs a fast
//! backtest over the whole price history or the real-time scout loop with
//! graceful shutdown.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{info, warn};

use rotor::backtest::Backtester;
use rotor::config::AppConfig;
use rotor::dashboard::{self, DashboardState};
use rotor::engine::{JobIntervals, Scheduler, Trader, TraderSettings};
use rotor::market::simulated::SimulatedMarket;
use rotor::storage::SqliteRepository;
use rotor::strategy::build_strategy;

const BANNER: &str = r#"
 ____   ___ _____ ___  ____
|  _ \ / _ \_   _/ _ \|  _ \
| |_) | | | || || | | | |_) |
|  _ <| |_| || || |_| |  _ <
|_| \_\\___/ |_| \___/|_| \_\

  Bridge-asset coin rotation
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let path = std::env::var("ROTOR_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let cfg = AppConfig::load(&path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        bridge = %cfg.trading.bridge,
        strategy = ?cfg.trading.strategy,
        coins = cfg.trading.supported_coins.len(),
        "ROTOR starting up"
    );

    if cfg.simulation.backtest {
        return run_backtest(&cfg).await;
    }
    run_live(&cfg).await
}

async fn run_backtest(cfg: &AppConfig) -> Result<()> {
    let backtester = Backtester::from_config(cfg).await?;
    let report = backtester.run_full().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Replay the price history against the wall clock and run the scheduler
/// until Ctrl+C.
async fn run_live(cfg: &AppConfig) -> Result<()> {
    let sim = &cfg.simulation;
    let market = SimulatedMarket::from_file(&sim.price_file, sim.fee, sim.min_notional)?;
    let Some((start, _)) = market.history_bounds() else {
        bail!("price file {} has no samples", sim.price_file);
    };
    let market = Arc::new(market.into_replay(start, sim.replay_speed));
    market.deposit(&cfg.trading.bridge, sim.start_balance)?;

    let repo = Arc::new(SqliteRepository::connect(&cfg.agent.database_url).await?);
    let trader = Arc::new(Trader::new(
        repo.clone(),
        market.clone(),
        TraderSettings::from_config(cfg),
    ));
    let holding = trader.initialize().await?;
    info!(coin = %holding.coin, "Holding");

    let strategy = build_strategy(
        cfg.trading.strategy,
        &cfg.stop_loss,
        &cfg.trading.bridge,
        cfg.trading.stable_coin(),
    );

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            repo.clone(),
            strategy.name(),
            cfg.trading.bridge.clone(),
        ));
        if let Err(e) = dashboard::spawn_dashboard(state, cfg.dashboard.port).await {
            warn!(error = %e, "Dashboard unavailable, continuing without it");
        }
    }

    let scheduler = Scheduler::new(trader, strategy, JobIntervals::from_config(&cfg.agent));
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let cycles = scheduler.run(shutdown).await?;

    info!(
        cycles,
        value = format!("{:.2}", market.collate_value(&cfg.trading.bridge)),
        "ROTOR shut down cleanly."
    );
    Ok(())
}

/// Initialise the `tracing` subscriber. `ROTOR_LOG_JSON` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rotor=info"));

    if std::env::var("ROTOR_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
