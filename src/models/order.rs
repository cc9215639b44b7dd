use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use super::market::Side;

/// Price grid of the 15m markets.
pub const TICK_DP: u32 = 2;
/// Share quantities are quoted to two decimals.
pub const SIZE_DP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    GTC, // Good-Til-Cancelled: standard limit
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::GTC => "GTC",
        }
    }
}

/// A resting limit BUY for one outcome contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub token_id: String,
    pub market_side: Side,
    pub price: Decimal,
    /// Shares to buy.
    pub size: Decimal,
    pub order_type: OrderType,
    pub post_only: bool,
}

impl OrderIntent {
    /// Post-only GTC buy spending at most `usd` at `price`.
    ///
    /// Price is rounded to the tick, size floored to whole cents of a share.
    /// `None` when the price is off the (0, 1) grid or the stake buys nothing.
    pub fn maker_buy(token_id: &str, side: Side, price: f64, usd: f64) -> Option<Self> {
        let price = Decimal::from_f64(price)?.round_dp(TICK_DP);
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return None;
        }
        let usd = Decimal::from_f64(usd)?;
        let size = (usd / price).round_dp_with_strategy(SIZE_DP, RoundingStrategy::ToZero);
        if size <= Decimal::ZERO {
            return None;
        }

        Some(Self {
            token_id: token_id.to_string(),
            market_side: side,
            price,
            size,
            order_type: OrderType::GTC,
            post_only: true,
        })
    }

    /// USDC committed: price × size.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}
