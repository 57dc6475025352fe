//! Rotation through the bridge: thresholds, partial execution and the
//! append-only holding log.

use std::collections::HashMap;

use rotor::engine::UniverseSnapshot;
use rotor::market::MarketGateway;
use rotor::storage::Repository;
use rotor::strategy::{BaselineStrategy, ScoutStrategy};
use rotor::types::{CycleOutcome, TradeState};

use crate::support::{at, HarnessBuilder};

fn eth_btc() -> HarnessBuilder {
    HarnessBuilder::new()
        .coin("ETH", &[2000.0, 2000.0])
        .coin("BTC", &[40000.0, 36000.0])
        .deposit("ETH", 1.0)
        .holding("ETH")
}

#[tokio::test]
async fn test_rotates_once_threshold_is_cleared() {
    let h = eth_btc().build().await;
    h.set_thresholds(&[("ETH", "BTC", 0.05)]).await;

    // 2000/40000 * (1 - 0.002 * 5) - 0.05 = -0.0005
    let outcome = BaselineStrategy.evaluate_cycle(&h.trader).await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::NoOpportunity {
            holding: "ETH".into()
        }
    );
    assert!(!h.repo.get_scout_history(10).await.unwrap().is_empty());
    let before = h.holding_id().await;

    h.market.set_time(at(1));
    let outcome = BaselineStrategy.evaluate_cycle(&h.trader).await.unwrap();
    let CycleOutcome::Rotated { from, to, trade_id } = outcome else {
        panic!("expected a rotation");
    };
    assert_eq!((from.as_str(), to.as_str()), ("ETH", "BTC"));

    let trade = h.repo.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(trade.state, TradeState::Complete);
    assert!(!trade.selling);
    assert_eq!(trade.traded_amount, Some(1.0));
    let expected_btc = 2000.0 * 0.999 * 0.999 / 36000.0;
    assert!((trade.final_amount.unwrap() - expected_btc).abs() < 1e-9);

    // Exactly one new holding record, written after the trade completed.
    assert_eq!(h.holding().await, "BTC");
    assert_eq!(h.holding_id().await, before + 1);
    assert_eq!(h.market.get_balance("ETH").await.unwrap(), 0.0);

    // Threshold re-based on the prices the rotation traded at.
    let pair = h.repo.get_pair("ETH", "BTC").await.unwrap().unwrap();
    assert!((pair.ratio.unwrap() - 2000.0 / 36000.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_failed_buy_leaves_trade_ordered_and_holding_stale() {
    let h = eth_btc().build().await;
    h.set_thresholds(&[("ETH", "BTC", 0.05)]).await;
    h.market.set_time(at(1));
    h.market.fail_next_buys(1);
    let before = h.holding_id().await;

    let outcome = BaselineStrategy.evaluate_cycle(&h.trader).await.unwrap();
    let CycleOutcome::Aborted {
        trade_id: Some(stranded_id),
        reached,
        ..
    } = outcome
    else {
        panic!("expected an aborted rotation");
    };
    assert_eq!(reached, Some(TradeState::Ordered));
    assert_eq!(h.holding().await, "ETH");
    assert_eq!(h.holding_id().await, before);

    // Funds sit in the bridge and the stranded trade is reported.
    assert_eq!(h.market.get_balance("ETH").await.unwrap(), 0.0);
    assert!(h.market.get_balance("USDT").await.unwrap() > 1990.0);
    let open = h.trader.report_open_trades().await.unwrap();
    assert_eq!(open.len(), 1);
    assert!(open[0].is_stranded());

    // The next cycle proceeds from the stale pointer: no sell, buy with the
    // parked bridge funds.
    let outcome = BaselineStrategy.evaluate_cycle(&h.trader).await.unwrap();
    let CycleOutcome::Rotated { trade_id, .. } = outcome else {
        panic!("expected the retry cycle to rotate");
    };
    let retry = h.repo.get_trade(trade_id).await.unwrap().unwrap();
    assert_eq!(retry.state, TradeState::Complete);
    assert_eq!(retry.traded_amount, Some(0.0));
    assert_eq!(h.holding().await, "BTC");

    // Never silently resolved.
    let stranded = h.repo.get_trade(stranded_id).await.unwrap().unwrap();
    assert_eq!(stranded.state, TradeState::Ordered);
}

#[tokio::test]
async fn test_failed_sell_records_created_only() {
    let h = eth_btc().build().await;
    h.set_thresholds(&[("ETH", "BTC", 0.05)]).await;
    h.market.set_time(at(1));
    h.market.fail_next_sells(1);

    let outcome = BaselineStrategy.evaluate_cycle(&h.trader).await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Aborted {
            reached: Some(TradeState::Created),
            ..
        }
    ));
    let trades = h.repo.get_trades(10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].state, TradeState::Created);
    assert_eq!(trades[0].traded_amount, None);
    assert_eq!(h.market.get_balance("ETH").await.unwrap(), 1.0);
    assert_eq!(h.holding().await, "ETH");
}

async fn scores_for(order: &[&str]) -> HashMap<String, f64> {
    let mut builder = HarnessBuilder::new();
    for coin in order {
        let price = match *coin {
            "ETH" => 2000.0,
            "BTC" => 40000.0,
            _ => 1.5,
        };
        builder = builder.coin(coin, &[price, price * 0.97]);
    }
    let h = builder.holding("ETH").deposit("ETH", 1.0).build().await;
    h.market.set_time(at(1));

    let snapshot = UniverseSnapshot::capture(h.trader.repo()).await.unwrap();
    let price = h.market.get_price("ETH", "USDT").await.unwrap().unwrap();
    let first = h
        .trader
        .ratios()
        .get_ratios(h.trader.repo(), h.trader.market(), &snapshot, "ETH", price)
        .await;
    let second = h
        .trader
        .ratios()
        .get_ratios(h.trader.repo(), h.trader.market(), &snapshot, "ETH", price)
        .await;
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.pair.to_coin, b.pair.to_coin);
        assert_eq!(a.score, b.score);
    }

    first
        .into_iter()
        .map(|s| (s.pair.to_coin, s.score))
        .collect()
}

#[tokio::test]
async fn test_scores_do_not_depend_on_pair_order() {
    let forward = scores_for(&["ETH", "BTC", "ADA"]).await;
    let reverse = scores_for(&["ADA", "BTC", "ETH"]).await;
    assert_eq!(forward.len(), 3);
    assert_eq!(forward, reverse);
}
