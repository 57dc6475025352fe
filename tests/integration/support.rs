//! Shared harness for the integration scenarios.
//!
//! Builds a `Trader` over a `SimulatedMarket` and an in-memory repository
//! with hourly price series, so every scenario controls time explicitly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use rotor::engine::{Trader, TraderSettings};
use rotor::market::simulated::{PriceHistory, SimulatedMarket};
use rotor::storage::{Repository, SqliteRepository};

pub const BRIDGE: &str = "USDT";

/// `h` hours after the start of every price series.
pub fn at(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 10, 0, 0, 0).unwrap() + Duration::hours(h)
}

pub struct Harness {
    pub repo: Arc<SqliteRepository>,
    pub market: Arc<SimulatedMarket>,
    pub trader: Trader,
}

pub struct HarnessBuilder {
    prices: PriceHistory,
    deposits: Vec<(String, f64)>,
    supported: Vec<String>,
    current_coin: String,
    fee: f64,
    min_notional: f64,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            prices: PriceHistory::new(),
            deposits: Vec::new(),
            supported: Vec::new(),
            current_coin: String::new(),
            fee: 0.001,
            min_notional: 10.0,
        }
    }

    /// Hourly series for `coin` against the bridge, starting at `at(0)`.
    pub fn coin(mut self, coin: &str, hourly: &[f64]) -> Self {
        let series: BTreeMap<_, _> = hourly
            .iter()
            .enumerate()
            .map(|(h, price)| (at(h as i64), *price))
            .collect();
        self.prices.insert(format!("{coin}{BRIDGE}"), series);
        self.supported.push(coin.to_string());
        self
    }

    pub fn deposit(mut self, coin: &str, amount: f64) -> Self {
        self.deposits.push((coin.to_string(), amount));
        self
    }

    pub fn holding(mut self, coin: &str) -> Self {
        self.current_coin = coin.to_string();
        self
    }

    pub fn settings(&self) -> TraderSettings {
        let mut universe = self.supported.clone();
        universe.push(BRIDGE.to_string());
        let mut supported = self.supported.clone();
        supported.push(BRIDGE.to_string());
        TraderSettings {
            bridge: BRIDGE.into(),
            stable: BRIDGE.into(),
            supported_coins: supported,
            universe,
            current_coin: self.current_coin.clone(),
            scout_multiplier: 5.0,
            bridge_entry_boost: 1.4,
            scout_history_prune_hours: 24,
        }
    }

    /// Build without initialising, for startup scenarios.
    pub async fn build_raw(self) -> Harness {
        let settings = self.settings();
        let market = Arc::new(SimulatedMarket::new(self.prices, self.fee, self.min_notional));
        for (coin, amount) in &self.deposits {
            market.deposit(coin, *amount).unwrap();
        }
        let repo = Arc::new(SqliteRepository::in_memory().await.unwrap());
        let trader = Trader::new(repo.clone(), market.clone(), settings);
        Harness {
            repo,
            market,
            trader,
        }
    }

    pub async fn build(self) -> Harness {
        let harness = self.build_raw().await;
        harness.trader.initialize().await.unwrap();
        harness
    }
}

impl Harness {
    /// Push every threshold out of reach, then lower the ones listed.
    pub async fn set_thresholds(&self, open: &[(&str, &str, f64)]) {
        for pair in self.repo.get_pairs(false).await.unwrap() {
            let ratio = open
                .iter()
                .find(|(from, to, _)| pair.from_coin == *from && pair.to_coin == *to)
                .map(|(_, _, ratio)| *ratio)
                .unwrap_or(1e9);
            self.repo.set_pair_ratio(pair.id, ratio).await.unwrap();
        }
    }

    pub async fn holding(&self) -> String {
        self.repo.current_holding().await.unwrap().unwrap().coin
    }

    pub async fn holding_id(&self) -> i64 {
        self.repo.current_holding().await.unwrap().map(|h| h.id).unwrap_or(0)
    }
}
