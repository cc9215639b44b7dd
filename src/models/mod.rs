pub mod candle;
pub mod market;
pub mod order;
pub mod position;
pub mod signal;
pub mod state;
