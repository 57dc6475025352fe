//! Handle over a single persisted trade.
//!
//! A `TradeLog` is created at `CREATED` before any exchange call and can
//! only be pushed forward one state at a time. Each stage's amounts are
//! written together with the state change, exactly once.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::storage::Repository;
use crate::types::{RotorError, Trade, TradeState};

pub struct TradeLog<'a> {
    repo: &'a dyn Repository,
    trade: Trade,
}

impl<'a> TradeLog<'a> {
    /// Persist a new trade at `CREATED`.
    pub async fn start(
        repo: &'a dyn Repository,
        from: &str,
        to: &str,
        selling: bool,
        at: DateTime<Utc>,
    ) -> Result<TradeLog<'a>> {
        let trade = repo.insert_trade(from, to, selling, at).await?;
        info!(trade_id = trade.id, from, to, selling, "Trade created");
        Ok(Self { repo, trade })
    }

    pub fn id(&self) -> i64 {
        self.trade.id
    }

    pub fn state(&self) -> TradeState {
        self.trade.state
    }

    pub fn trade(&self) -> &Trade {
        &self.trade
    }

    /// Sell leg (or bridge pass-through) confirmed.
    pub async fn mark_ordered(
        &mut self,
        from_starting_balance: f64,
        bridge_starting_balance: f64,
        traded_amount: f64,
    ) -> Result<()> {
        self.ensure_next(TradeState::Ordered)?;

        let mut next = self.trade.clone();
        next.state = TradeState::Ordered;
        next.from_starting_balance = Some(from_starting_balance);
        next.bridge_starting_balance = Some(bridge_starting_balance);
        next.traded_amount = Some(traded_amount);
        self.repo.update_trade(&next).await?;
        self.trade = next;

        debug!(trade_id = self.trade.id, traded_amount, "Trade ordered");
        Ok(())
    }

    /// Buy leg confirmed.
    pub async fn mark_complete(&mut self, final_amount: f64) -> Result<()> {
        self.ensure_next(TradeState::Complete)?;

        let mut next = self.trade.clone();
        next.state = TradeState::Complete;
        next.final_amount = Some(final_amount);
        self.repo.update_trade(&next).await?;
        self.trade = next;

        info!(
            trade_id = self.trade.id,
            from = %self.trade.from_coin,
            to = %self.trade.to_coin,
            final_amount,
            "Trade complete"
        );
        Ok(())
    }

    fn ensure_next(&self, to: TradeState) -> Result<(), RotorError> {
        if self.trade.state.next() == Some(to) {
            Ok(())
        } else {
            Err(RotorError::InvalidTransition {
                trade_id: self.trade.id,
                from: self.trade.state,
                to,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
