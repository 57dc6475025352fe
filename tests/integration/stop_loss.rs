//! Trailing stop-loss against recorded history.

use std::sync::Arc;

use rotor::backtest::Backtester;
use rotor::config::StopLossConfig;
use rotor::engine::{LiquidationOutcome, StopLossDecision, StopLossMonitor};
use rotor::market::MarketGateway;
use rotor::storage::Repository;
use rotor::strategy::{ScoutStrategy, StopLossStrategy};
use rotor::types::{CycleOutcome, TradeState};
use rust_decimal::prelude::ToPrimitive;

use crate::support::{at, Harness, HarnessBuilder, BRIDGE};

fn config() -> StopLossConfig {
    StopLossConfig {
        enabled: true,
        percentage: 15.0,
        trailing_hours: 24,
    }
}

async fn falling_eth() -> Harness {
    let h = HarnessBuilder::new()
        .coin("ETH", &[100.0, 95.0, 80.0, 80.0])
        .coin("BTC", &[40000.0])
        .deposit("ETH", 10.0)
        .holding("ETH")
        .build()
        .await;
    h.set_thresholds(&[]).await;
    h
}

#[tokio::test]
async fn test_backtest_liquidates_on_drawdown() {
    let Harness {
        repo,
        market,
        trader,
    } = falling_eth().await;
    let strategy = StopLossStrategy::new(&config(), BRIDGE, BRIDGE);
    let backtester = Backtester::new(trader, market.clone(), Box::new(strategy), 60);

    let report = backtester.run(at(0), at(3)).await.unwrap();
    assert_eq!(report.steps, 4);
    assert_eq!(report.stop_losses, 1);
    assert_eq!(report.rotations, 0);
    assert_eq!(report.trades, 1);

    let trade = &repo.get_trades(10).await.unwrap()[0];
    assert!(trade.selling);
    assert_eq!(trade.state, TradeState::Complete);
    assert_eq!(repo.current_holding().await.unwrap().unwrap().coin, BRIDGE);

    // Sold 10 ETH at 80 with a 0.1% fee.
    let final_value = report.final_value.to_f64().unwrap();
    assert!((final_value - 799.2).abs() < 1e-6);
    assert!(report.max_drawdown_pct > 15.0);
}

#[tokio::test]
async fn test_scout_history_alone_sets_the_high() {
    let h = falling_eth().await;
    let strategy = StopLossStrategy::new(&config(), BRIDGE, BRIDGE);

    // No value snapshots: the only record of the 100 high is the scout trail.
    let outcome = strategy.evaluate_cycle(&h.trader).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NoOpportunity { .. }));

    h.market.set_time(at(2));
    let outcome = strategy.evaluate_cycle(&h.trader).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::StopLossTriggered { .. }));
}

#[tokio::test]
async fn test_no_history_never_trips() {
    let h = falling_eth().await;
    h.market.set_time(at(2));
    let monitor = StopLossMonitor::new(&config(), BRIDGE, BRIDGE);

    let decision = monitor.evaluate(h.trader.repo(), "ETH", 80.0, h.market.now()).await;
    assert!(matches!(decision, StopLossDecision::Hold { drop_pct, .. } if drop_pct == 0.0));
    assert_eq!(
        monitor.evaluate(h.trader.repo(), BRIDGE, 1.0, h.market.now()).await,
        StopLossDecision::NotApplicable
    );
}

#[tokio::test]
async fn test_empty_bridge_liquidation_is_a_noop() {
    let h = HarnessBuilder::new()
        .coin("ETH", &[2000.0])
        .holding("USDT")
        .build()
        .await;
    assert_eq!(h.market.get_balance(BRIDGE).await.unwrap(), 0.0);

    let outcome = h
        .trader
        .orchestrator()
        .liquidate(BRIDGE, 1.0, None)
        .await
        .unwrap();
    assert!(matches!(outcome, LiquidationOutcome::NothingToLiquidate));
    assert!(h.repo.get_trades(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dust_position_skips_the_sell() {
    let h = HarnessBuilder::new()
        .coin("ETH", &[100.0, 80.0])
        .deposit("ETH", 0.05)
        .holding("ETH")
        .build()
        .await;
    let market = Arc::clone(&h.market);
    market.set_time(at(1));

    let outcome = h
        .trader
        .orchestrator()
        .liquidate("ETH", 80.0, None)
        .await
        .unwrap();
    assert!(matches!(outcome, LiquidationOutcome::NothingToLiquidate));
    assert_eq!(market.get_balance("ETH").await.unwrap(), 0.05);
}
