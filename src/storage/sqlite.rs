//! SQLite repository.
//!
//! Timestamps are stored as unix milliseconds so window queries and
//! hour/day/week bucketing stay plain integer arithmetic.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::storage::Repository;
use crate::types::{
    Coin, HoldingRecord, Interval, Pair, RotorError, ScoutRecord, Trade, TradeState, UpdateEvent,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS coins (
        symbol  TEXT PRIMARY KEY,
        enabled INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS pairs (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        from_coin TEXT NOT NULL REFERENCES coins(symbol),
        to_coin   TEXT NOT NULL REFERENCES coins(symbol),
        ratio     REAL,
        UNIQUE (from_coin, to_coin)
    )",
    "CREATE TABLE IF NOT EXISTS current_coin_history (
        id       INTEGER PRIMARY KEY AUTOINCREMENT,
        coin     TEXT NOT NULL REFERENCES coins(symbol),
        datetime INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS trade_history (
        id                      INTEGER PRIMARY KEY AUTOINCREMENT,
        from_coin               TEXT NOT NULL REFERENCES coins(symbol),
        to_coin                 TEXT NOT NULL REFERENCES coins(symbol),
        selling                 INTEGER NOT NULL,
        state                   TEXT NOT NULL,
        from_starting_balance   REAL,
        bridge_starting_balance REAL,
        traded_amount           REAL,
        final_amount            REAL,
        datetime                INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scout_history (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        pair_id            INTEGER NOT NULL REFERENCES pairs(id),
        target_ratio       REAL,
        current_coin_price REAL NOT NULL,
        other_coin_price   REAL NOT NULL,
        datetime           INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coin_value (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        coin          TEXT NOT NULL REFERENCES coins(symbol),
        price         REAL NOT NULL,
        interval_kind TEXT NOT NULL,
        datetime      INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_scout_history_pair_time ON scout_history (pair_id, datetime)",
    "CREATE INDEX IF NOT EXISTS idx_coin_value_coin_time ON coin_value (coin, datetime)",
];

const PAIR_SELECT: &str = "SELECT p.id, p.from_coin, p.to_coin, p.ratio, \
     (fc.enabled = 1 AND tc.enabled = 1) AS enabled \
     FROM pairs p \
     JOIN coins fc ON fc.symbol = p.from_coin \
     JOIN coins tc ON tc.symbol = p.to_coin";

const ENABLED_FILTER: &str = "fc.enabled = 1 AND tc.enabled = 1";

const TRADE_SELECT: &str = "SELECT id, from_coin, to_coin, selling, state, \
     from_starting_balance, bridge_starting_balance, traded_amount, final_amount, datetime \
     FROM trade_history";

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 86_400_000;

fn ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_ms(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or_default()
}

fn pair_from_row(row: &SqliteRow) -> Result<Pair> {
    Ok(Pair {
        id: row.try_get("id")?,
        from_coin: row.try_get("from_coin")?,
        to_coin: row.try_get("to_coin")?,
        ratio: row.try_get("ratio")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let state: String = row.try_get("state")?;
    Ok(Trade {
        id: row.try_get("id")?,
        from_coin: row.try_get("from_coin")?,
        to_coin: row.try_get("to_coin")?,
        selling: row.try_get::<i64, _>("selling")? != 0,
        state: TradeState::from_str(&state)?,
        from_starting_balance: row.try_get("from_starting_balance")?,
        bridge_starting_balance: row.try_get("bridge_starting_balance")?,
        traded_amount: row.try_get("traded_amount")?,
        final_amount: row.try_get("final_amount")?,
        datetime: from_ms(row.try_get("datetime")?),
    })
}

/// `Repository` backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    events: broadcast::Sender<UpdateEvent>,
}

impl SqliteRepository {
    /// Open (or create) the database at `url` and ensure the schema exists.
    ///
    /// `sqlite::memory:` is supported; the pool is then pinned to a single
    /// long-lived connection so the database survives between queries.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .min_connections(if in_memory { 1 } else { 0 })
            .idle_timeout(None::<std::time::Duration>)
            .max_lifetime(None::<std::time::Duration>)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("Failed to create schema")?;
        }

        let (events, _) = broadcast::channel(256);
        info!(url, "Database ready");
        Ok(Self { pool, events })
    }

    /// Fresh private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    fn publish<T: Serialize>(&self, table: &'static str, row: &T) {
        if let Ok(data) = serde_json::to_value(row) {
            // No subscribers is not an error.
            let _ = self.events.send(UpdateEvent { table, data });
        }
    }

    async fn require_coin(&self, symbol: &str) -> Result<()> {
        if self.get_coin(symbol).await?.is_none() {
            return Err(RotorError::UnknownCoin(symbol.to_string()).into());
        }
        Ok(())
    }

    async fn insert_holding(&self, symbol: &str, at: DateTime<Utc>) -> Result<HoldingRecord> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO current_coin_history (coin, datetime) VALUES (?, ?) RETURNING id",
        )
        .bind(symbol)
        .bind(ms(at))
        .fetch_one(&self.pool)
        .await
        .context("Failed to append holding")?;
        let record = HoldingRecord {
            id,
            coin: symbol.to_string(),
            datetime: at,
        };
        self.publish("current_coin_history", &record);
        Ok(record)
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn set_coins(&self, symbols: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE coins SET enabled = 0")
            .execute(&mut *tx)
            .await?;
        for symbol in symbols {
            sqlx::query(
                "INSERT INTO coins (symbol, enabled) VALUES (?, 1) \
                 ON CONFLICT (symbol) DO UPDATE SET enabled = 1",
            )
            .bind(symbol)
            .execute(&mut *tx)
            .await?;
        }
        let created = sqlx::query(
            "INSERT OR IGNORE INTO pairs (from_coin, to_coin) \
             SELECT a.symbol, b.symbol FROM coins a JOIN coins b ON a.symbol <> b.symbol \
             WHERE a.enabled = 1 AND b.enabled = 1 \
             ORDER BY a.rowid, b.rowid",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await.context("Failed to sync coin universe")?;
        info!(coins = symbols.len(), new_pairs = created, "Coin universe synced");
        Ok(())
    }

    async fn get_coins(&self, only_enabled: bool) -> Result<Vec<Coin>> {
        let sql = if only_enabled {
            "SELECT symbol, enabled FROM coins WHERE enabled = 1 ORDER BY rowid"
        } else {
            "SELECT symbol, enabled FROM coins ORDER BY rowid"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(Coin {
                    symbol: row.try_get("symbol")?,
                    enabled: row.try_get::<i64, _>("enabled")? != 0,
                })
            })
            .collect()
    }

    async fn get_coin(&self, symbol: &str) -> Result<Option<Coin>> {
        let row = sqlx::query("SELECT symbol, enabled FROM coins WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Coin {
                symbol: row.try_get("symbol")?,
                enabled: row.try_get::<i64, _>("enabled")? != 0,
            })
        })
        .transpose()
    }

    async fn get_pair(&self, from: &str, to: &str) -> Result<Option<Pair>> {
        let sql = format!("{PAIR_SELECT} WHERE p.from_coin = ? AND p.to_coin = ?");
        let row = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn get_pairs_from(&self, from: &str, only_enabled: bool) -> Result<Vec<Pair>> {
        let sql = if only_enabled {
            format!("{PAIR_SELECT} WHERE p.from_coin = ? AND {ENABLED_FILTER} ORDER BY p.id")
        } else {
            format!("{PAIR_SELECT} WHERE p.from_coin = ? ORDER BY p.id")
        };
        let rows = sqlx::query(&sql).bind(from).fetch_all(&self.pool).await?;
        rows.iter().map(pair_from_row).collect()
    }

    async fn get_pairs(&self, only_enabled: bool) -> Result<Vec<Pair>> {
        let sql = if only_enabled {
            format!("{PAIR_SELECT} WHERE {ENABLED_FILTER} ORDER BY p.id")
        } else {
            format!("{PAIR_SELECT} ORDER BY p.id")
        };
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(pair_from_row).collect()
    }

    async fn set_pair_ratio(&self, pair_id: i64, ratio: f64) -> Result<()> {
        sqlx::query("UPDATE pairs SET ratio = ? WHERE id = ?")
            .bind(ratio)
            .bind(pair_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn current_holding(&self) -> Result<Option<HoldingRecord>> {
        let row = sqlx::query(
            "SELECT id, coin, datetime FROM current_coin_history ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(HoldingRecord {
                id: row.try_get("id")?,
                coin: row.try_get("coin")?,
                datetime: from_ms(row.try_get("datetime")?),
            })
        })
        .transpose()
    }

    async fn set_current_coin(&self, symbol: &str, at: DateTime<Utc>) -> Result<HoldingRecord> {
        self.require_coin(symbol).await?;
        self.insert_holding(symbol, at).await
    }

    async fn advance_holding(
        &self,
        symbol: &str,
        expected: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<HoldingRecord> {
        self.require_coin(symbol).await?;
        let found = self.current_holding().await?.map(|h| h.id);
        if found != expected {
            return Err(RotorError::HoldingConflict { expected, found }.into());
        }
        self.insert_holding(symbol, at).await
    }

    async fn log_scout(
        &self,
        pair: &Pair,
        target_ratio: Option<f64>,
        current_coin_price: f64,
        other_coin_price: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO scout_history (pair_id, target_ratio, current_coin_price, other_coin_price, datetime) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(pair.id)
        .bind(target_ratio)
        .bind(current_coin_price)
        .bind(other_coin_price)
        .bind(ms(at))
        .fetch_one(&self.pool)
        .await?;

        self.publish(
            "scout_history",
            &ScoutRecord {
                id,
                pair_id: pair.id,
                from_coin: pair.from_coin.clone(),
                to_coin: pair.to_coin.clone(),
                target_ratio,
                current_coin_price,
                other_coin_price,
                datetime: at,
            },
        );
        Ok(())
    }

    async fn get_scout_history(&self, limit: i64) -> Result<Vec<ScoutRecord>> {
        let rows = sqlx::query(
            "SELECT sh.id, sh.pair_id, p.from_coin, p.to_coin, sh.target_ratio, \
             sh.current_coin_price, sh.other_coin_price, sh.datetime \
             FROM scout_history sh JOIN pairs p ON p.id = sh.pair_id \
             ORDER BY sh.id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ScoutRecord {
                    id: row.try_get("id")?,
                    pair_id: row.try_get("pair_id")?,
                    from_coin: row.try_get("from_coin")?,
                    to_coin: row.try_get("to_coin")?,
                    target_ratio: row.try_get("target_ratio")?,
                    current_coin_price: row.try_get("current_coin_price")?,
                    other_coin_price: row.try_get("other_coin_price")?,
                    datetime: from_ms(row.try_get("datetime")?),
                })
            })
            .collect()
    }

    async fn get_coin_recent_high_price(
        &self,
        symbol: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let since = now - Duration::hours(hours);
        let high: Option<f64> = sqlx::query_scalar(
            "SELECT MAX(sh.current_coin_price) FROM scout_history sh \
             JOIN pairs p ON p.id = sh.pair_id \
             WHERE p.from_coin = ? AND sh.datetime >= ? AND sh.datetime <= ?",
        )
        .bind(symbol)
        .bind(ms(since))
        .bind(ms(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(high.filter(|p| *p > 0.0))
    }

    async fn record_price_point(&self, symbol: &str, price: f64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO coin_value (coin, price, interval_kind, datetime) VALUES (?, ?, ?, ?)",
        )
        .bind(symbol)
        .bind(price)
        .bind(Interval::Minutely.as_str())
        .bind(ms(at))
        .execute(&self.pool)
        .await?;

        self.publish(
            "coin_value",
            &crate::types::PricePoint {
                coin: symbol.to_string(),
                price,
                interval: Interval::Minutely,
                datetime: at,
            },
        );
        Ok(())
    }

    async fn get_coin_high_price_from_values(
        &self,
        symbol: &str,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let since = now - Duration::hours(hours);
        let high: Option<f64> = sqlx::query_scalar(
            "SELECT MAX(price) FROM coin_value WHERE coin = ? AND datetime >= ? AND datetime <= ?",
        )
        .bind(symbol)
        .bind(ms(since))
        .bind(ms(now))
        .fetch_one(&self.pool)
        .await?;
        Ok(high.filter(|p| *p > 0.0))
    }

    async fn insert_trade(
        &self,
        from: &str,
        to: &str,
        selling: bool,
        at: DateTime<Utc>,
    ) -> Result<Trade> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO trade_history (from_coin, to_coin, selling, state, datetime) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(from)
        .bind(to)
        .bind(selling as i64)
        .bind(TradeState::Created.as_str())
        .bind(ms(at))
        .fetch_one(&self.pool)
        .await
        .context("Failed to record trade")?;

        let trade = Trade {
            id,
            from_coin: from.to_string(),
            to_coin: to.to_string(),
            selling,
            state: TradeState::Created,
            from_starting_balance: None,
            bridge_starting_balance: None,
            traded_amount: None,
            final_amount: None,
            datetime: at,
        };
        self.publish("trade_history", &trade);
        Ok(trade)
    }

    async fn update_trade(&self, trade: &Trade) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE trade_history SET state = ?, from_starting_balance = ?, \
             bridge_starting_balance = ?, traded_amount = ?, final_amount = ? WHERE id = ?",
        )
        .bind(trade.state.as_str())
        .bind(trade.from_starting_balance)
        .bind(trade.bridge_starting_balance)
        .bind(trade.traded_amount)
        .bind(trade.final_amount)
        .bind(trade.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected != 1 {
            return Err(RotorError::Storage(format!("trade #{} not found", trade.id)).into());
        }
        debug!(trade_id = trade.id, state = %trade.state, "Trade updated");
        self.publish("trade_history", trade);
        Ok(())
    }

    async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let sql = format!("{TRADE_SELECT} WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn get_latest_buy_trade(&self, symbol: &str) -> Result<Option<Trade>> {
        let sql = format!(
            "{TRADE_SELECT} WHERE to_coin = ? AND selling = 0 AND state = 'COMPLETE' \
             ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(trade_from_row).transpose()
    }

    async fn get_trades(&self, limit: i64) -> Result<Vec<Trade>> {
        let sql = format!("{TRADE_SELECT} ORDER BY id DESC LIMIT ?");
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn get_open_trades(&self) -> Result<Vec<Trade>> {
        let sql = format!("{TRADE_SELECT} WHERE state <> 'COMPLETE' ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    async fn prune_scout_history(&self, before: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM scout_history WHERE datetime < ?")
            .bind(ms(before))
            .execute(&self.pool)
            .await?
            .rows_affected();
        debug!(deleted, "Scout history pruned");
        Ok(deleted)
    }

    async fn prune_value_history(&self, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // First sample of each hour / day / Monday-based week is promoted.
        sqlx::query(
            "UPDATE coin_value SET interval_kind = 'HOURLY' \
             WHERE interval_kind = 'MINUTELY' AND datetime = ( \
               SELECT MIN(x.datetime) FROM coin_value x \
               WHERE x.coin = coin_value.coin AND x.datetime / ?1 = coin_value.datetime / ?1)",
        )
        .bind(HOUR_MS)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE coin_value SET interval_kind = 'DAILY' \
             WHERE interval_kind IN ('MINUTELY', 'HOURLY') AND datetime = ( \
               SELECT MIN(x.datetime) FROM coin_value x \
               WHERE x.coin = coin_value.coin AND x.datetime / ?1 = coin_value.datetime / ?1)",
        )
        .bind(DAY_MS)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE coin_value SET interval_kind = 'WEEKLY' \
             WHERE interval_kind <> 'WEEKLY' AND datetime = ( \
               SELECT MIN(x.datetime) FROM coin_value x \
               WHERE x.coin = coin_value.coin \
                 AND (x.datetime / ?1 + 3) / 7 = (coin_value.datetime / ?1 + 3) / 7)",
        )
        .bind(DAY_MS)
        .execute(&mut *tx)
        .await?;

        let retention = [
            (Interval::Minutely, Duration::hours(24)),
            (Interval::Hourly, Duration::days(28)),
            (Interval::Daily, Duration::days(365)),
        ];
        for (interval, keep) in retention {
            sqlx::query("DELETE FROM coin_value WHERE interval_kind = ? AND datetime < ?")
                .bind(interval.as_str())
                .bind(ms(now - keep))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.context("Failed to prune value history")?;
        Ok(())
    }

    async fn clear_coin_values_before(
        &self,
        before: DateTime<Utc>,
        symbol: Option<&str>,
        interval: Option<Interval>,
    ) -> Result<u64> {
        let interval = interval.map(|i| i.as_str());
        let deleted = sqlx::query(
            "DELETE FROM coin_value WHERE datetime < ?1 \
             AND (?2 IS NULL OR coin = ?2) \
             AND (?3 IS NULL OR interval_kind = ?3)",
        )
        .bind(ms(before))
        .bind(symbol)
        .bind(interval)
        .execute(&self.pool)
        .await?
        .rows_affected();
        info!(deleted, before = %before, "Cleared coin values");
        Ok(deleted)
    }

    fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
