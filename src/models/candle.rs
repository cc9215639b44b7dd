use serde::{Deserialize, Serialize};

/// One OHLCV candle from the spot exchange.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, epoch seconds.
    pub open_time: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One executed spot trade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade time, epoch seconds.
    pub time: f64,
    pub price: f64,
    pub quantity: f64,
    /// True when the taker was the buyer.
    pub is_buy: bool,
}
