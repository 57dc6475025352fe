//! Simulated exchange.
//!
//! Replays a historical price file and settles market orders against an
//! in-process ledger. Balances are kept as `Decimal` so repeated full
//! sells/buys don't accumulate float drift; the gateway boundary speaks f64.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::market::MarketGateway;
use crate::types::{ticker, OrderResult, RotorError};

/// Price history keyed by ticker symbol (`ETHUSDT`).
pub type PriceHistory = HashMap<String, BTreeMap<DateTime<Utc>, f64>>;

/// Where simulated time comes from.
enum SimClock {
    /// Advanced explicitly (backtests, tests).
    Manual(Mutex<DateTime<Utc>>),
    /// Follows the wall clock from `origin`, scaled by `speed`.
    Replay {
        origin: DateTime<Utc>,
        wall_origin: DateTime<Utc>,
        speed: f64,
    },
}

/// Injected failures for exercising partial-execution paths.
#[derive(Debug, Default)]
struct FailurePlan {
    buys: u32,
    sells: u32,
}

pub struct SimulatedMarket {
    prices: PriceHistory,
    clock: SimClock,
    ledger: Mutex<HashMap<String, Decimal>>,
    fee: f64,
    min_notional: f64,
    failures: Mutex<FailurePlan>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| anyhow!("value not representable as decimal: {value}"))
}

impl SimulatedMarket {
    /// Create a market over `prices`, starting at the earliest sample.
    pub fn new(prices: PriceHistory, fee: f64, min_notional: f64) -> Self {
        let start = prices
            .values()
            .filter_map(|series| series.keys().next().copied())
            .min()
            .unwrap_or_else(Utc::now);
        Self {
            prices,
            clock: SimClock::Manual(Mutex::new(start)),
            ledger: Mutex::new(HashMap::new()),
            fee,
            min_notional,
            failures: Mutex::new(FailurePlan::default()),
        }
    }

    /// Load a JSON price file: `{ "ETHUSDT": [["2021-06-10T20:00:00Z", 2500.0], ...] }`.
    pub fn from_file(path: &str, fee: f64, min_notional: f64) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read price file: {path}"))?;
        let raw: HashMap<String, Vec<(DateTime<Utc>, f64)>> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse price file: {path}"))?;
        let prices: PriceHistory = raw
            .into_iter()
            .map(|(symbol, series)| (symbol, series.into_iter().collect()))
            .collect();
        info!(path, symbols = prices.len(), "Price history loaded");
        Ok(Self::new(prices, fee, min_notional))
    }

    /// Switch to wall-clock replay starting at `origin`.
    pub fn into_replay(mut self, origin: DateTime<Utc>, speed: f64) -> Self {
        self.clock = SimClock::Replay {
            origin,
            wall_origin: Utc::now(),
            speed,
        };
        self
    }

    /// First and last sample time across all symbols.
    pub fn history_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.prices.values().filter_map(|s| s.keys().next()).min()?;
        let end = self.prices.values().filter_map(|s| s.keys().next_back()).max()?;
        Some((*start, *end))
    }

    /// Jump the manual clock. No-op in replay mode.
    pub fn set_time(&self, at: DateTime<Utc>) {
        if let SimClock::Manual(now) = &self.clock {
            *guard(now) = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let SimClock::Manual(now) = &self.clock {
            let mut now = guard(now);
            *now += by;
        }
    }

    /// Credit `amount` of `coin` to the ledger.
    pub fn deposit(&self, coin: &str, amount: f64) -> Result<()> {
        let amount = to_decimal(amount)?;
        *guard(&self.ledger).entry(coin.to_string()).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    /// Make the next `n` buy orders fail.
    pub fn fail_next_buys(&self, n: u32) {
        guard(&self.failures).buys = n;
    }

    /// Make the next `n` sell orders fail.
    pub fn fail_next_sells(&self, n: u32) {
        guard(&self.failures).sells = n;
    }

    /// Snapshot of all non-zero balances.
    pub fn balances(&self) -> HashMap<String, f64> {
        guard(&self.ledger)
            .iter()
            .filter(|(_, v)| !v.is_zero())
            .map(|(k, v)| (k.clone(), v.to_f64().unwrap_or(0.0)))
            .collect()
    }

    /// Total portfolio value expressed in `bridge`.
    pub fn collate_value(&self, bridge: &str) -> f64 {
        let now = self.now();
        guard(&self.ledger)
            .iter()
            .map(|(coin, balance)| {
                let balance = balance.to_f64().unwrap_or(0.0);
                if coin == bridge {
                    balance
                } else {
                    self.price_at(&ticker(coin, bridge), now)
                        .map(|p| p * balance)
                        .unwrap_or(0.0)
                }
            })
            .sum()
    }

    fn price_at(&self, symbol: &str, at: DateTime<Utc>) -> Option<f64> {
        self.prices
            .get(symbol)?
            .range(..=at)
            .next_back()
            .map(|(_, price)| *price)
    }

    fn take_failure(&self, buy: bool) -> bool {
        let mut plan = guard(&self.failures);
        let slot = if buy { &mut plan.buys } else { &mut plan.sells };
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }

    fn quote(&self, coin: &str, bridge: &str) -> Result<f64> {
        let symbol = ticker(coin, bridge);
        match self.price_at(&symbol, self.now()) {
            Some(p) if p > 0.0 => Ok(p),
            _ => bail!("no price for {symbol} at {}", self.now()),
        }
    }
}

#[async_trait]
impl MarketGateway for SimulatedMarket {
    fn now(&self) -> DateTime<Utc> {
        match &self.clock {
            SimClock::Manual(now) => *guard(now),
            SimClock::Replay {
                origin,
                wall_origin,
                speed,
            } => {
                let elapsed_ms = (Utc::now() - *wall_origin).num_milliseconds() as f64;
                *origin + Duration::milliseconds((elapsed_ms * speed) as i64)
            }
        }
    }

    async fn get_price(&self, coin: &str, bridge: &str) -> Result<Option<f64>> {
        Ok(self.price_at(&ticker(coin, bridge), self.now()))
    }

    async fn get_fee(&self, _coin: &str, _bridge: &str, _is_buy: bool) -> Result<f64> {
        Ok(self.fee)
    }

    async fn get_min_notional(&self, _coin: &str, _bridge: &str) -> Result<f64> {
        Ok(self.min_notional)
    }

    async fn get_balance(&self, coin: &str) -> Result<f64> {
        Ok(guard(&self.ledger)
            .get(coin)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0))
    }

    async fn buy(&self, coin: &str, bridge: &str) -> Result<OrderResult> {
        if self.take_failure(true) {
            return Err(RotorError::Exchange {
                leg: "buy",
                message: format!("injected failure buying {coin}"),
            }
            .into());
        }
        let price = self.quote(coin, bridge)?;
        let price_dec = to_decimal(price)?;
        let keep = Decimal::ONE - to_decimal(self.fee)?;

        let mut ledger = guard(&self.ledger);
        let spend = ledger.get(bridge).copied().unwrap_or(Decimal::ZERO);
        if spend.to_f64().unwrap_or(0.0) < self.min_notional {
            bail!("buy {coin}: {bridge} balance {spend} below min notional {}", self.min_notional);
        }
        let qty = spend
            .checked_div(price_dec)
            .ok_or_else(|| anyhow!("buy {coin}: price overflow"))?
            * keep;
        ledger.insert(bridge.to_string(), Decimal::ZERO);
        *ledger.entry(coin.to_string()).or_insert(Decimal::ZERO) += qty;

        debug!(coin, bridge, price, qty = %qty, "Simulated buy filled");
        Ok(OrderResult {
            price,
            amount: qty.to_f64().unwrap_or(0.0),
        })
    }

    async fn sell(&self, coin: &str, bridge: &str) -> Result<OrderResult> {
        if self.take_failure(false) {
            return Err(RotorError::Exchange {
                leg: "sell",
                message: format!("injected failure selling {coin}"),
            }
            .into());
        }
        let price = self.quote(coin, bridge)?;
        let price_dec = to_decimal(price)?;
        let keep = Decimal::ONE - to_decimal(self.fee)?;

        let mut ledger = guard(&self.ledger);
        let qty = ledger.get(coin).copied().unwrap_or(Decimal::ZERO);
        let notional = qty * price_dec;
        if notional.to_f64().unwrap_or(0.0) < self.min_notional {
            bail!("sell {coin}: notional {notional} below min notional {}", self.min_notional);
        }
        ledger.insert(coin.to_string(), Decimal::ZERO);
        *ledger.entry(bridge.to_string()).or_insert(Decimal::ZERO) += notional * keep;

        debug!(coin, bridge, price, qty = %qty, "Simulated sell filled");
        Ok(OrderResult {
            price,
            amount: qty.to_f64().unwrap_or(0.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
