use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of one trading period in seconds.
pub const PERIOD_SECS: i64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
    XRP,
}

impl Asset {
    /// Short prefix used in Polymarket `updown` slugs.
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            Asset::BTC => "btc",
            Asset::ETH => "eth",
            Asset::SOL => "sol",
            Asset::XRP => "xrp",
        }
    }

    /// Long name used in the hourly/daily `up-or-down` slugs.
    pub fn long_name(&self) -> &'static str {
        match self {
            Asset::BTC => "bitcoin",
            Asset::ETH => "ethereum",
            Asset::SOL => "solana",
            Asset::XRP => "xrp",
        }
    }

    pub fn binance_symbol(&self) -> &'static str {
        match self {
            Asset::BTC => "BTCUSDT",
            Asset::ETH => "ETHUSDT",
            Asset::SOL => "SOLUSDT",
            Asset::XRP => "XRPUSDT",
        }
    }

    /// Symbol as the settlement oracle reports it.
    pub fn oracle_symbol(&self) -> &'static str {
        match self {
            Asset::BTC => "BTC",
            Asset::ETH => "ETH",
            Asset::SOL => "SOL",
            Asset::XRP => "XRP",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.oracle_symbol())
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(Asset::BTC),
            "ETH" => Ok(Asset::ETH),
            "SOL" => Ok(Asset::SOL),
            "XRP" => Ok(Asset::XRP),
            other => Err(format!("unsupported coin: {other}")),
        }
    }
}

/// Market window. Only `FifteenMin` is traded; the rest exist for slug
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    FifteenMin,
    OneHour,
    FourHour,
    Daily,
}

impl Timeframe {
    /// Candle interval streamed from the spot exchange for this window.
    pub fn kline_interval(&self) -> &'static str {
        match self {
            Timeframe::FifteenMin => "1m",
            Timeframe::OneHour => "5m",
            Timeframe::FourHour => "15m",
            Timeframe::Daily => "1h",
        }
    }

    /// Variant name the past-results oracle uses. Only the 15m window is known.
    pub fn oracle_variant(&self) -> Option<&'static str> {
        match self {
            Timeframe::FifteenMin => Some("fifteen"),
            _ => None,
        }
    }
}

/// The two complementary outcome contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    /// Price of this side's contract given the Up contract's price.
    pub fn price_from_up(&self, price_up: f64) -> f64 {
        match self {
            Side::Up => price_up,
            Side::Down => 1.0 - price_up,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Up => f.write_str("Up"),
            Side::Down => f.write_str("Down"),
        }
    }
}

/// Resolved result of a period as reported by the settlement oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Up,
    Down,
}

impl Outcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "up" => Some(Outcome::Up),
            "down" => Some(Outcome::Down),
            _ => None,
        }
    }

    pub fn winning_side(&self) -> Side {
        match self {
            Outcome::Up => Side::Up,
            Outcome::Down => Side::Down,
        }
    }
}

/// The pair of contract identifiers for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub up: String,
    pub down: String,
}

/// Floor an epoch timestamp to the start of its 15-minute period.
pub fn period_start(epoch_secs: i64) -> i64 {
    epoch_secs.div_euclid(PERIOD_SECS) * PERIOD_SECS
}

/// Shorten a long token id for log lines.
pub fn short_id(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_start_floors_to_900() {
        assert_eq!(period_start(1_768_502_700), 1_768_502_700);
        assert_eq!(period_start(1_768_502_700 + 899), 1_768_502_700);
        assert_eq!(period_start(1_768_502_700 + 900), 1_768_503_600);
    }

    #[test]
    fn test_asset_parse() {
        assert_eq!("btc".parse::<Asset>(), Ok(Asset::BTC));
        assert_eq!(" Eth ".parse::<Asset>(), Ok(Asset::ETH));
        assert!("doge".parse::<Asset>().is_err());
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!(Outcome::parse("up"), Some(Outcome::Up));
        assert_eq!(Outcome::parse("Down"), Some(Outcome::Down));
        assert_eq!(Outcome::parse(""), None);
    }

    #[test]
    fn test_side_price_from_up() {
        assert!((Side::Down.price_from_up(0.35) - 0.65).abs() < 1e-12);
        assert_eq!(Side::Up.price_from_up(0.35), 0.35);
    }
}
