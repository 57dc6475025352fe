//! Startup and restart behaviour of the holding log.

use rotor::engine::Trader;
use rotor::market::MarketGateway;
use rotor::storage::Repository;
use rotor::types::RotorError;
use tokio_test::{assert_err, assert_ok};

use crate::support::{HarnessBuilder, BRIDGE};

#[tokio::test]
async fn test_restart_resumes_recorded_holding() {
    let builder = HarnessBuilder::new()
        .coin("ETH", &[2000.0])
        .coin("BTC", &[40000.0])
        .deposit("USDT", 500.0)
        .holding("ETH");
    let mut restart_settings = builder.settings();
    restart_settings.current_coin = "BTC".into();
    let h = builder.build().await;

    // Same repository, different configured coin: the log wins.
    let restarted = Trader::new(h.repo.clone(), h.market.clone(), restart_settings);
    let holding = assert_ok!(restarted.initialize().await);
    assert_eq!(holding.coin, "ETH");
    assert_eq!(h.holding_id().await, 1);
    assert_eq!(h.market.get_balance(BRIDGE).await.unwrap(), 500.0);
}

#[tokio::test]
async fn test_unsupported_initial_coin_is_fatal() {
    let h = HarnessBuilder::new()
        .coin("ETH", &[2000.0])
        .holding("XRP")
        .build_raw()
        .await;

    let err = assert_err!(h.trader.initialize().await);
    assert!(matches!(
        err.downcast_ref::<RotorError>(),
        Some(RotorError::Config(_))
    ));
    assert!(h.repo.current_holding().await.unwrap().is_none());
}

#[tokio::test]
async fn test_random_pick_is_bought_from_bridge() {
    let h = HarnessBuilder::new()
        .coin("ETH", &[2000.0])
        .coin("BTC", &[40000.0])
        .deposit("USDT", 1000.0)
        .build()
        .await;

    let coin = h.holding().await;
    assert!(["ETH", "BTC", "USDT"].contains(&coin.as_str()));
    if coin != BRIDGE {
        assert!(h.market.get_balance(&coin).await.unwrap() > 0.0);
        assert_eq!(h.market.get_balance(BRIDGE).await.unwrap(), 0.0);
    }
}

#[tokio::test]
async fn test_thresholds_seeded_once() {
    let h = HarnessBuilder::new()
        .coin("ETH", &[2000.0])
        .coin("BTC", &[40000.0])
        .holding("ETH")
        .build()
        .await;

    let pair = h.repo.get_pair("ETH", "BTC").await.unwrap().unwrap();
    assert!((pair.ratio.unwrap() - 0.05).abs() < 1e-12);

    // A restart leaves existing thresholds alone.
    h.repo.set_pair_ratio(pair.id, 0.07).await.unwrap();
    h.trader.initialize().await.unwrap();
    let pair = h.repo.get_pair("ETH", "BTC").await.unwrap().unwrap();
    assert_eq!(pair.ratio, Some(0.07));
}
