pub mod binance;
pub mod market_discovery;
pub mod oracle;
pub mod period;
pub mod polymarket;
pub mod ws;
