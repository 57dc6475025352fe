//! Whole-history replays.

use rotor::backtest::Backtester;
use rotor::config::AppConfig;
use rotor::storage::Repository;
use rotor::strategy::BaselineStrategy;
use rotor::types::TradeState;

use crate::support::{at, Harness, HarnessBuilder};

async fn assert_holding_log_matches_trades(repo: &dyn Repository) {
    let trades = repo.get_trades(i64::MAX).await.unwrap();
    let completed = trades
        .iter()
        .filter(|t| t.state == TradeState::Complete)
        .count() as i64;
    // Ids are sequential in the append-only log: one initial record plus
    // one per completed trade.
    let holding = repo.current_holding().await.unwrap().unwrap();
    assert_eq!(holding.id, completed + 1);
}

#[tokio::test]
async fn test_every_holding_change_follows_a_completed_trade() {
    let Harness {
        repo,
        market,
        trader,
    } = HarnessBuilder::new()
        .coin("ETH", &[2000.0, 2100.0, 1900.0, 2200.0, 1800.0, 2050.0, 1950.0])
        .coin("BTC", &[40000.0, 39000.0, 41000.0, 40500.0, 38000.0, 42000.0, 40000.0])
        .deposit("ETH", 1.0)
        .holding("ETH")
        .build()
        .await;

    let backtester = Backtester::new(trader, market, Box::new(BaselineStrategy), 60);
    let report = backtester.run(at(0), at(6)).await.unwrap();

    assert_eq!(report.steps, 7);
    assert!(report.trades >= report.rotations);
    assert!(report.final_value > rust_decimal::Decimal::ZERO);
    assert_holding_log_matches_trades(repo.as_ref()).await;
}

#[tokio::test]
async fn test_backtest_from_config_over_sample_prices() {
    let toml = r#"
[agent]
name = "ROTOR-BT"
scout_interval_secs = 5
cycle_timeout_secs = 30
database_url = "sqlite::memory:"

[trading]
bridge = "USDT"
supported_coins = ["BTC", "ETH", "ADA", "DOT"]
current_coin = "ETH"
strategy = "bridge_aware"
scout_multiplier = 5.0

[simulation]
price_file = "data/prices.json"
start_balance = 1000.0
fee = 0.001
min_notional = 10.0
step_minutes = 60
backtest = true
"#;
    let cfg = AppConfig::from_toml(toml).unwrap();
    cfg.validate().unwrap();

    let backtester = Backtester::from_config(&cfg).await.unwrap();
    let report = backtester.run_full().await.unwrap();

    assert_eq!(report.strategy, "bridge_aware");
    assert_eq!(report.steps, 72);
    assert_eq!(report.history.len(), 72);
    assert!(report.final_value > rust_decimal::Decimal::ZERO);
    assert_holding_log_matches_trades(backtester.trader().repo()).await;
}
