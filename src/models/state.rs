use crate::models::candle::{Candle, Trade};
use crate::models::market::{TokenPair, PERIOD_SECS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The hub every producer writes into and the bot loop reads from.
///
/// One lock covers the whole record. Writers hold it only for a single
/// replace/append and never across a network await.
pub type SharedState = Arc<RwLock<MarketState>>;

pub fn shared(state: MarketState) -> SharedState {
    Arc::new(RwLock::new(state))
}

/// Open interval `(low, high)` used to judge whether a contract price is
/// trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    pub low: f64,
    pub high: f64,
}

impl PriceBand {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, price: f64) -> bool {
        price > self.low && price < self.high
    }
}

/// Latest known value of every feed.
#[derive(Debug, Clone, Default)]
pub struct MarketState {
    /// (price, quantity), best first.
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    /// Best bid/ask midpoint, 0 until both sides are known.
    pub mid: f64,

    pub trades: Vec<Trade>,

    pub klines: VecDeque<Candle>,
    pub current_candle: Option<Candle>,

    pub pm_up_id: Option<String>,
    pub pm_down_id: Option<String>,
    pub pm_up_price: Option<f64>,
    pub pm_down_price: Option<f64>,

    pub period_start_ts: i64,
    pub period_end_ts: i64,
    pub strike: Option<f64>,
    pub strike_is_oracle: bool,
}

impl MarketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace both book sides and recompute the midpoint.
    pub fn apply_book(&mut self, bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) {
        self.bids = bids;
        self.asks = asks;
        if let (Some(&(bid, _)), Some(&(ask, _))) = (self.bids.first(), self.asks.first()) {
            self.mid = (bid + ask) / 2.0;
        }
    }

    /// Append a trade. Once the buffer grows past `prune_above`, drop
    /// everything older than `ttl_secs`.
    pub fn push_trade(&mut self, trade: Trade, now: f64, prune_above: usize, ttl_secs: f64) {
        self.trades.push(trade);
        if self.trades.len() > prune_above {
            let cutoff = now - ttl_secs;
            self.trades.retain(|t| t.time >= cutoff);
        }
    }

    /// Replace the in-progress candle; promote it into history when closed.
    pub fn apply_candle(&mut self, candle: Candle, closed: bool, max_klines: usize) {
        self.current_candle = Some(candle);
        if closed {
            self.klines.push_back(candle);
            while self.klines.len() > max_klines {
                self.klines.pop_front();
            }
        }
    }

    pub fn seed_klines(&mut self, candles: Vec<Candle>, max_klines: usize) {
        let skip = candles.len().saturating_sub(max_klines);
        self.klines = candles.into_iter().skip(skip).collect();
    }

    pub fn token_pair(&self) -> Option<TokenPair> {
        match (&self.pm_up_id, &self.pm_down_id) {
            (Some(up), Some(down)) => Some(TokenPair {
                up: up.clone(),
                down: down.clone(),
            }),
            _ => None,
        }
    }

    /// Install a new contract pair and forget prices quoted for the old one.
    pub fn set_tokens(&mut self, tokens: Option<TokenPair>) {
        match tokens {
            Some(pair) => {
                self.pm_up_id = Some(pair.up);
                self.pm_down_id = Some(pair.down);
            }
            None => {
                self.pm_up_id = None;
                self.pm_down_id = None;
            }
        }
        self.pm_up_price = None;
        self.pm_down_price = None;
    }

    /// Apply a streamed best ask. Returns false when `asset_id` matches
    /// neither current contract, in which case nothing changes.
    pub fn set_pm_price(&mut self, asset_id: &str, price: f64) -> bool {
        if self.pm_up_id.as_deref() == Some(asset_id) {
            self.pm_up_price = Some(price);
            true
        } else if self.pm_down_id.as_deref() == Some(asset_id) {
            self.pm_down_price = Some(price);
            true
        } else {
            false
        }
    }

    /// Apply polled outcome prices. In-band values always win; out-of-band
    /// values only seed an empty hub.
    pub fn apply_polled_prices(&mut self, up: f64, down: f64, band: PriceBand) -> bool {
        if band.contains(up) || self.pm_up_price.is_none() {
            self.pm_up_price = Some(up);
            self.pm_down_price = Some(down);
            true
        } else {
            false
        }
    }

    pub fn set_strike(&mut self, strike: Option<f64>, is_oracle: bool) {
        self.strike = strike;
        self.strike_is_oracle = is_oracle;
    }

    /// Re-anchor every per-period field on a new period.
    pub fn begin_period(
        &mut self,
        start: i64,
        strike: Option<f64>,
        strike_is_oracle: bool,
        tokens: Option<TokenPair>,
    ) {
        self.period_start_ts = start;
        self.period_end_ts = start + PERIOD_SECS;
        self.set_strike(strike, strike_is_oracle);
        self.set_tokens(tokens);
    }

    /// Minutes elapsed in the current period, if a period is being tracked.
    pub fn minute_into_period(&self, now: f64) -> Option<f64> {
        if self.period_start_ts <= 0 {
            return None;
        }
        Some((now - self.period_start_ts as f64) / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(up: &str, down: &str) -> Option<TokenPair> {
        Some(TokenPair {
            up: up.into(),
            down: down.into(),
        })
    }

    #[test]
    fn test_mid_waits_for_both_sides() {
        let mut s = MarketState::new();
        s.apply_book(vec![(100.0, 1.0)], vec![]);
        assert_eq!(s.mid, 0.0);
        s.apply_book(vec![(100.0, 1.0)], vec![(102.0, 2.0)]);
        assert_eq!(s.mid, 101.0);
    }

    #[test]
    fn test_trades_pruned_only_past_threshold() {
        let mut s = MarketState::new();
        for i in 0..5 {
            let t = Trade { time: i as f64, price: 1.0, quantity: 1.0, is_buy: true };
            s.push_trade(t, 100.0, 5, 10.0);
        }
        assert_eq!(s.trades.len(), 5, "burst under threshold is kept");

        let t = Trade { time: 95.0, price: 1.0, quantity: 1.0, is_buy: false };
        s.push_trade(t, 100.0, 5, 10.0);
        assert_eq!(s.trades.len(), 1);
        assert_eq!(s.trades[0].time, 95.0);
    }

    #[test]
    fn test_candle_promoted_only_when_closed() {
        let mut s = MarketState::new();
        let c = |t: f64| Candle { open_time: t, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 3.0 };

        s.apply_candle(c(0.0), false, 2);
        assert!(s.klines.is_empty());
        assert_eq!(s.current_candle, Some(c(0.0)));

        s.apply_candle(c(0.0), true, 2);
        s.apply_candle(c(60.0), true, 2);
        s.apply_candle(c(120.0), true, 2);
        assert_eq!(s.klines.len(), 2);
        assert_eq!(s.klines.front().map(|k| k.open_time), Some(60.0));
    }

    #[test]
    fn test_foreign_token_price_dropped() {
        let mut s = MarketState::new();
        s.set_tokens(tokens("up-new", "down-new"));

        assert!(!s.set_pm_price("up-old", 0.91));
        assert!(!s.set_pm_price("down-old", 0.09));
        assert_eq!(s.pm_up_price, None);
        assert_eq!(s.pm_down_price, None);

        assert!(s.set_pm_price("up-new", 0.55));
        assert!(s.set_pm_price("down-new", 0.46));
        assert_eq!(s.pm_up_price, Some(0.55));
        assert_eq!(s.pm_down_price, Some(0.46));
    }

    #[test]
    fn test_polled_prices_never_overwrite_sane_with_suspicious() {
        let band = PriceBand::new(0.01, 0.99);
        let mut s = MarketState::new();

        // Suspicious value seeds an empty hub.
        assert!(s.apply_polled_prices(0.995, 0.005, band));
        assert_eq!(s.pm_up_price, Some(0.995));

        // Sane overwrites.
        assert!(s.apply_polled_prices(0.6, 0.4, band));
        assert_eq!(s.pm_up_price, Some(0.6));

        // Suspicious does not overwrite.
        assert!(!s.apply_polled_prices(1.0, 0.0, band));
        assert_eq!(s.pm_up_price, Some(0.6));
        assert_eq!(s.pm_down_price, Some(0.4));
    }

    #[test]
    fn test_begin_period_reanchors() {
        let mut s = MarketState::new();
        s.set_tokens(tokens("a", "b"));
        s.set_pm_price("a", 0.7);

        for start in [900_i64, 1800, 2700, 1_768_502_700] {
            s.begin_period(start, Some(1.0), true, tokens("c", "d"));
            assert_eq!(s.period_end_ts, s.period_start_ts + PERIOD_SECS);
            assert_eq!(s.pm_up_price, None);
            assert_eq!(s.pm_down_price, None);
            assert_eq!(s.pm_up_id.as_deref(), Some("c"));
        }
    }

    #[test]
    fn test_minute_into_period() {
        let mut s = MarketState::new();
        assert_eq!(s.minute_into_period(1000.0), None);
        s.begin_period(900, None, false, None);
        assert_eq!(s.minute_into_period(900.0 + 90.0), Some(1.5));
    }
}
