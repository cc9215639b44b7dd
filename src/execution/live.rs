use crate::config::PolymarketConfig;
use crate::execution::clob_auth::{ApiCredentials, ClobAuth};
use crate::execution::clob_client::ClobClient;
use crate::execution::order_builder::OrderBuilder;
use crate::execution::{token_for, ExecutionError, Executor};
use crate::models::market::Outcome;
use crate::models::order::OrderIntent;
use crate::models::position::{Account, AccountError, PayoutModel, TradeRecord};
use crate::models::signal::Signal;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

/// Places a post-only limit BUY for every signal and keeps the same ledger
/// as the paper executor.
///
/// The trade is recorded once the exchange accepts the order; a rejected
/// order leaves the ledger untouched. Resting orders are cancelled along
/// with the trade.
pub struct LiveExecutor {
    account: Account,
    size_usd: f64,
    payout: PayoutModel,
    builder: OrderBuilder,
    client: ClobClient,
}

impl LiveExecutor {
    pub async fn connect(
        config: &PolymarketConfig,
        size_usd: f64,
        payout: PayoutModel,
    ) -> Result<Self, ExecutionError> {
        let key = config
            .private_key
            .strip_prefix("0x")
            .unwrap_or(&config.private_key);
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|_| ExecutionError::Auth("invalid POLYMARKET_PRIVATE_KEY".into()))?;

        let builder = OrderBuilder::new(
            config.chain_id,
            signer.clone(),
            config.funder_address.as_deref(),
            config.signature_type,
        );
        let mut client = ClobClient::new(config.clob_host.clone(), ClobAuth::new(signer, config.chain_id));

        let creds = match (&config.api_key, &config.api_secret, &config.api_passphrase) {
            (Some(key), Some(secret), Some(pass)) => Some(ApiCredentials {
                api_key: key.clone(),
                api_secret: secret.clone(),
                api_passphrase: pass.clone(),
            }),
            _ => None,
        };
        client.init_auth(creds).await?;

        info!("[LIVE] trading from {:?}", builder.funder());
        Ok(Self {
            account: Account::new(),
            size_usd,
            payout,
            builder,
            client,
        })
    }
}

#[async_trait]
impl Executor for LiveExecutor {
    fn mode(&self) -> &'static str {
        "LIVE"
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

        let intent = OrderIntent::maker_buy(&token_id, signal.side, signal.entry_price, self.size_usd)
            .ok_or_else(|| {
                ExecutionError::InvalidOrder(format!(
                    "${:.2} at {:.3} is not a valid order",
                    self.size_usd, signal.entry_price
                ))
            })?;
        let signed = self.builder.build(&intent).await?;
        let order_id = self
            .client
            .post_order(&signed, intent.order_type, intent.post_only)
            .await?;

        let mut trade = TradeRecord::open(
            uuid::Uuid::new_v4().to_string(),
            signal.side,
            token_id,
            intent.price.to_f64().unwrap_or(signal.entry_price),
            intent.notional().to_f64().unwrap_or(self.size_usd),
            signal.kind,
        );
        trade.order_id = Some(order_id);

        let recorded = self.account.record_open(trade)?.clone();
        info!(
            "[LIVE] {} {} @ {} x {} | order {}",
            recorded.signal_kind,
            recorded.side,
            intent.price,
            intent.size,
            recorded.order_id.as_deref().unwrap_or("?")
        );
        Ok(recorded)
    }

    async fn settle(&mut self, outcome: Outcome) -> Option<TradeRecord> {
        self.account.settle(outcome, &self.payout)
    }

    async fn cancel(&mut self) -> Option<TradeRecord> {
        let cancelled = self.account.cancel()?;
        if let Some(order_id) = &cancelled.order_id {
            if let Err(e) = self.client.cancel_order(order_id).await {
                warn!("[LIVE] could not cancel resting order {order_id}: {e}");
            }
        }
        Some(cancelled)
    }

    fn account(&self) -> &Account {
        &self.account
    }
}
