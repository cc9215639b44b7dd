pub mod clob_auth;
pub mod clob_client;
pub mod live;
pub mod order_builder;
pub mod paper;

use crate::models::market::{Outcome, Side};
use crate::models::position::{Account, AccountError, TradeRecord};
use crate::models::signal::Signal;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Account(#[from] AccountError),

    #[error("no contract id for the {0} side")]
    MissingToken(Side),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<alloy_signer::Error> for ExecutionError {
    fn from(e: alloy_signer::Error) -> Self {
        ExecutionError::Signing(e.to_string())
    }
}

/// Turns signals into trades and resolves them.
///
/// Paper and live variants share the same [`TradeRecord`] lifecycle so the
/// bot loop never branches on which one it holds. At most one trade is
/// open at a time; `settle` and `cancel` are no-ops (returning `None`)
/// when nothing is open.
#[async_trait]
pub trait Executor: Send + Sync {
    fn mode(&self) -> &'static str;

    async fn execute(
        &mut self,
        signal: &Signal,
        up_id: &str,
        down_id: &str,
    ) -> Result<TradeRecord, ExecutionError>;

    async fn settle(&mut self, outcome: Outcome) -> Option<TradeRecord>;

    async fn cancel(&mut self) -> Option<TradeRecord>;

    fn account(&self) -> &Account;
}

/// Contract id for the signal's side.
pub(crate) fn token_for(signal: &Signal, up_id: &str, down_id: &str) -> Result<String, ExecutionError> {
    let id = match signal.side {
        Side::Up => up_id,
        Side::Down => down_id,
    };
    if id.is_empty() {
        return Err(ExecutionError::MissingToken(signal.side));
    }
    Ok(id.to_string())
}
