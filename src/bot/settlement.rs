use crate::execution::Executor;
use crate::feeds::oracle::SettlementOracle;
use crate::models::market::{Asset, Outcome, PERIOD_SECS};
use crate::models::position::TradeRecord;

/// Result of one settlement poll.
#[derive(Debug, Clone)]
pub enum SettlementStep {
    /// Nothing pending.
    Idle,
    /// Pending; inside the grace period or the oracle has not published.
    Waiting,
    Resolved {
        period_start: i64,
        outcome: Outcome,
        trade: Option<TradeRecord>,
    },
    /// No result within the timeout; the open trade was cancelled.
    Abandoned {
        period_start: i64,
        trade: Option<TradeRecord>,
    },
}

/// Tracks the one period whose position awaits resolution.
///
/// `none → pending → resolved | abandoned`. The first oracle query happens
/// once `now > end + grace`; after `now > end + timeout` the position is
/// cancelled instead of being left open.
#[derive(Debug, Clone)]
pub struct Settlement {
    pending: Option<i64>,
    grace_secs: i64,
    timeout_secs: i64,
}

impl Settlement {
    pub fn new(grace_secs: i64, timeout_secs: i64) -> Self {
        Self {
            pending: None,
            grace_secs,
            timeout_secs,
        }
    }

    /// Start waiting on the period that began at `period_start`.
    pub fn begin(&mut self, period_start: i64) {
        self.pending = Some(period_start);
    }

    pub fn pending(&self) -> Option<i64> {
        self.pending
    }

    pub async fn poll(
        &mut self,
        now: f64,
        asset: Asset,
        oracle: &dyn SettlementOracle,
        executor: &mut dyn Executor,
    ) -> SettlementStep {
        let Some(period_start) = self.pending else {
            return SettlementStep::Idle;
        };
        let end = (period_start + PERIOD_SECS) as f64;

        if now <= end + self.grace_secs as f64 {
            return SettlementStep::Waiting;
        }

        if let Some(outcome) = oracle.period_outcome(asset, period_start).await {
            self.pending = None;
            let trade = executor.settle(outcome).await;
            return SettlementStep::Resolved {
                period_start,
                outcome,
                trade,
            };
        }

        if now > end + self.timeout_secs as f64 {
            self.pending = None;
            let trade = executor.cancel().await;
            return SettlementStep::Abandoned { period_start, trade };
        }

        SettlementStep::Waiting
    }
}
