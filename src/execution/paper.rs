use crate::execution::{token_for, ExecutionError, Executor};
use crate::models::market::Outcome;
use crate::models::position::{Account, AccountError, PayoutModel, TradeRecord};
use crate::models::signal::Signal;
use async_trait::async_trait;
use tracing::info;

/// Bookkeeping-only executor: every signal is assumed filled at its entry
/// price.
pub struct PaperExecutor {
    account: Account,
    size_usd: f64,
    payout: PayoutModel,
}

impl PaperExecutor {
    pub fn new(size_usd: f64, payout: PayoutModel) -> Self {
        Self {
            account: Account::new(),
            size_usd,
            payout,
        }
    }
}

#[async_trait]
impl Executor for PaperExecutor {
    fn mode(&self) -> &'static str {
        "PAPER"
    }

    async fn execute(
        &mut self,
        signal: &Signal,
        up_id: &str,
        down_id: &str,
    ) -> Result<TradeRecord, ExecutionError> {
        if let Some(side) = self.account.current_side() {
            return Err(AccountError::PositionOpen(side).into());
        }
        let token_id = token_for(signal, up_id, down_id)?;

        let trade = TradeRecord::open(
            uuid::Uuid::new_v4().to_string(),
            signal.side,
            token_id,
            signal.entry_price,
            self.size_usd,
            signal.kind,
        );
        let recorded = self.account.record_open(trade)?.clone();
        info!(
            "[PAPER] {} {} @ {:.3} | ${:.2}",
            recorded.signal_kind, recorded.side, recorded.entry_price, recorded.size_usd
        );
        Ok(recorded)
    }

    async fn settle(&mut self, outcome: Outcome) -> Option<TradeRecord> {
        self.account.settle(outcome, &self.payout)
    }

    async fn cancel(&mut self) -> Option<TradeRecord> {
        self.account.cancel()
    }

    fn account(&self) -> &Account {
        &self.account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;
    use crate::models::position::{TradeOutcome, TradeStatus};
    use crate::models::signal::{Confidence, SignalKind};

    fn signal(side: Side, price: f64) -> Signal {
        Signal {
            kind: SignalKind::TrendConfirm,
            side,
            entry_price: price,
            confidence: Confidence::High,
        }
    }

    #[tokio::test]
    async fn test_execute_picks_side_token() {
        let mut ex = PaperExecutor::new(10.0, PayoutModel::default());
        let rec = ex.execute(&signal(Side::Down, 0.62), "UP", "DN").await.unwrap();
        assert_eq!(rec.token_id, "DN");
        assert_eq!(rec.status, TradeStatus::Open);
        assert_eq!(ex.account().current_side(), Some(Side::Down));
    }

    #[tokio::test]
    async fn test_second_execute_rejected_while_open() {
        let mut ex = PaperExecutor::new(10.0, PayoutModel::default());
        ex.execute(&signal(Side::Up, 0.7), "UP", "DN").await.unwrap();
        let err = ex.execute(&signal(Side::Down, 0.6), "UP", "DN").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Account(_)));
        assert_eq!(ex.account().open_count(), 1);
    }

    #[tokio::test]
    async fn test_settle_and_cancel_are_noops_when_flat() {
        let mut ex = PaperExecutor::new(10.0, PayoutModel::default());
        assert!(ex.settle(Outcome::Up).await.is_none());
        assert!(ex.cancel().await.is_none());

        ex.execute(&signal(Side::Up, 0.7), "UP", "DN").await.unwrap();
        let done = ex.settle(Outcome::Down).await.unwrap();
        assert_eq!(done.outcome, TradeOutcome::Lost);
        assert_eq!(done.pnl, Some(-10.0));
        assert!(ex.settle(Outcome::Down).await.is_none());
        assert_eq!(ex.account().losses, 1);
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let mut ex = PaperExecutor::new(10.0, PayoutModel::default());
        let err = ex.execute(&signal(Side::Up, 0.7), "", "DN").await.unwrap_err();
        assert!(matches!(err, ExecutionError::MissingToken(Side::Up)));
        assert!(ex.account().trades.is_empty());
    }
}
