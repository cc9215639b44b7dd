use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::market::{Outcome, Side};
use super::signal::SignalKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Settled,
    /// Abandoned without a result; carries no P&L.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Pending,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub side: Side,
    pub token_id: String,
    pub entry_price: f64,
    pub size_usd: f64,
    pub signal_kind: SignalKind,
    pub status: TradeStatus,
    pub outcome: TradeOutcome,
    pub pnl: Option<f64>,
    /// Exchange order id, live trades only.
    pub order_id: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn open(
        id: String,
        side: Side,
        token_id: String,
        entry_price: f64,
        size_usd: f64,
        signal_kind: SignalKind,
    ) -> Self {
        Self {
            id,
            side,
            token_id,
            entry_price,
            size_usd,
            signal_kind,
            status: TradeStatus::Open,
            outcome: TradeOutcome::Pending,
            pnl: None,
            order_id: None,
            opened_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Contracts bought: each pays $1 if its side wins.
    pub fn shares(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.size_usd / self.entry_price
    }
}

/// P&L of a binary position held to resolution.
///
/// A win pays one dollar per share, less `fee_rate` of the payout; a loss
/// forfeits the stake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PayoutModel {
    pub fee_rate: f64,
}

impl Default for PayoutModel {
    fn default() -> Self {
        Self { fee_rate: 0.0 }
    }
}

impl PayoutModel {
    pub fn pnl(&self, trade: &TradeRecord, won: bool) -> f64 {
        if won {
            trade.shares() * (1.0 - self.fee_rate) - trade.size_usd
        } else {
            -trade.size_usd
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AccountError {
    #[error("a {0} position is already open")]
    PositionOpen(Side),
}

/// Append-only trade ledger with derived counters.
///
/// At most one trade is open at a time. Records are never removed.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Account {
    pub trades: Vec<TradeRecord>,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_trade(&self) -> Option<&TradeRecord> {
        self.trades.iter().rev().find(|t| t.is_open())
    }

    fn open_trade_mut(&mut self) -> Option<&mut TradeRecord> {
        self.trades.iter_mut().rev().find(|t| t.is_open())
    }

    /// Side of the still-open trade, if any.
    pub fn current_side(&self) -> Option<Side> {
        self.open_trade().map(|t| t.side)
    }

    pub fn record_open(&mut self, trade: TradeRecord) -> Result<&TradeRecord, AccountError> {
        if let Some(side) = self.current_side() {
            return Err(AccountError::PositionOpen(side));
        }
        self.trades.push(trade);
        Ok(&self.trades[self.trades.len() - 1])
    }

    /// Resolve the open trade. No-op (returns None) when nothing is open.
    pub fn settle(&mut self, outcome: Outcome, payout: &PayoutModel) -> Option<TradeRecord> {
        let trade = self.open_trade_mut()?;
        let won = trade.side == outcome.winning_side();
        let pnl = payout.pnl(trade, won);

        trade.status = TradeStatus::Settled;
        trade.outcome = if won { TradeOutcome::Won } else { TradeOutcome::Lost };
        trade.pnl = Some(pnl);
        let settled = trade.clone();

        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.total_pnl += pnl;
        Some(settled)
    }

    /// Abandon the open trade without P&L. No-op when nothing is open.
    pub fn cancel(&mut self) -> Option<TradeRecord> {
        let trade = self.open_trade_mut()?;
        trade.status = TradeStatus::Cancelled;
        Some(trade.clone())
    }

    /// Settled trades only.
    pub fn total_trades(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.total_trades();
        if total == 0 {
            return 0.0;
        }
        self.wins as f64 / total as f64
    }

    pub fn open_count(&self) -> usize {
        self.trades.iter().filter(|t| t.is_open()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(side: Side, price: f64) -> TradeRecord {
        TradeRecord::open("t".into(), side, "tok".into(), price, 10.0, SignalKind::TrendConfirm)
    }

    #[test]
    fn test_payout_win_positive_loss_is_stake() {
        let model = PayoutModel::default();
        let t = trade(Side::Up, 0.70);
        assert!(model.pnl(&t, true) > 0.0);
        assert_eq!(model.pnl(&t, false), -10.0);

        let with_fee = PayoutModel { fee_rate: 0.02 };
        assert!(with_fee.pnl(&t, true) < model.pnl(&t, true));
        assert_eq!(with_fee.pnl(&t, false), -10.0);
    }

    #[test]
    fn test_second_open_rejected() {
        let mut acct = Account::new();
        acct.record_open(trade(Side::Up, 0.6)).unwrap();
        let err = acct.record_open(trade(Side::Down, 0.4)).unwrap_err();
        assert_eq!(err, AccountError::PositionOpen(Side::Up));
        assert_eq!(acct.open_count(), 1);
    }

    #[test]
    fn test_settle_is_idempotent() {
        let mut acct = Account::new();
        acct.record_open(trade(Side::Down, 0.5)).unwrap();

        let settled = acct.settle(Outcome::Down, &PayoutModel::default()).unwrap();
        assert_eq!(settled.outcome, TradeOutcome::Won);
        assert_eq!(settled.pnl, Some(10.0));

        assert!(acct.settle(Outcome::Down, &PayoutModel::default()).is_none());
        assert_eq!(acct.wins, 1);
        assert_eq!(acct.total_pnl, 10.0);
        assert_eq!(acct.current_side(), None);
    }

    #[test]
    fn test_cancel_keeps_record_without_outcome() {
        let mut acct = Account::new();
        acct.record_open(trade(Side::Up, 0.6)).unwrap();
        acct.cancel().unwrap();

        assert_eq!(acct.trades.len(), 1);
        assert_eq!(acct.trades[0].status, TradeStatus::Cancelled);
        assert_eq!(acct.trades[0].outcome, TradeOutcome::Pending);
        assert_eq!(acct.trades[0].pnl, None);
        assert_eq!(acct.total_trades(), 0);
        assert!(acct.cancel().is_none());
        assert!(acct.record_open(trade(Side::Down, 0.4)).is_ok());
    }
}
