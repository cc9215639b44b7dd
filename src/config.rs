use anyhow::Context;
use crate::models::market::{Asset, Timeframe};
use crate::models::state::PriceBand;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub binance: BinanceConfig,
    pub polymarket: PolymarketConfig,
    pub bot: BotConfig,
    pub strategy: StrategyConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    pub rest_url: String,
    /// Combined-stream endpoint, streams are appended as `?streams=...`.
    pub ws_url: String,
    pub depth_limit: u32,
    pub depth_poll_secs: u64,
    pub reconnect_secs: u64,
    /// Trade buffer is pruned by age once it holds more than this many trades.
    pub trade_prune_above: usize,
    pub trade_ttl_secs: f64,
    pub kline_max: usize,
    pub kline_boot: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymarketConfig {
    pub gamma_events_url: String,
    pub clob_host: String,
    pub ws_url: String,
    pub past_results_url: String,
    pub chain_id: u64,
    pub private_key: String,
    pub funder_address: Option<String>,
    pub signature_type: u8, // 0 = EOA, 1 = Poly Proxy
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
    pub price_poll_secs: u64,
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub asset: Asset,
    pub timeframe: Timeframe,
    pub size_usd: f64,
    pub live: bool,
    pub tick_secs: u64,
    /// Delay before the first tick so feeds can populate.
    pub warmup_secs: u64,
    pub min_snapshot_minute: f64,
    pub max_snapshot_minute: f64,
    pub snapshot_spacing_minutes: f64,
    /// Prices outside this band are flagged as stale and never sampled.
    pub sane_band: PriceBand,
    /// Band within which a polled price may overwrite the hub.
    pub poll_band: PriceBand,
    pub settlement_grace_secs: i64,
    pub settlement_timeout_secs: i64,
    pub fee_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub decision_minute: f64,       // First minute a signal may fire (e.g. 7.0)
    pub last_entry_minute: f64,     // No entries after this minute (e.g. 10.0)
    pub reversal_anchor_minute: f64, // Leader is compared against this minute (e.g. 5.0)
    pub trend_anchor_minute: f64,   // Trend is measured from this minute (e.g. 4.0)
    pub anchor_tolerance: f64,      // Max distance from an anchor minute, in minutes
    pub confirm_min_price: f64,     // Leader must be at least this (e.g. 0.60)
    pub high_confidence_price: f64, // Leader at/above this → high confidence
    pub strong_swing: f64,          // Reversal swing in Up price for medium confidence
    pub max_entry_price: f64,       // Never buy above this
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub heartbeat_secs: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.binance.com/api/v3".into(),
            ws_url: "wss://stream.binance.com:9443/stream".into(),
            depth_limit: 20,
            depth_poll_secs: 2,
            reconnect_secs: 3,
            trade_prune_above: 5000,
            trade_ttl_secs: 300.0,
            kline_max: 150,
            kline_boot: 100,
        }
    }
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            gamma_events_url: "https://gamma-api.polymarket.com/events".into(),
            clob_host: "https://clob.polymarket.com".into(),
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".into(),
            past_results_url: "https://polymarket.com/api/past-results".into(),
            chain_id: 137,
            private_key: String::new(),
            funder_address: None,
            signature_type: 0,
            api_key: None,
            api_secret: None,
            api_passphrase: None,
            price_poll_secs: 5,
            reconnect_secs: 5,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            asset: Asset::BTC,
            timeframe: Timeframe::FifteenMin,
            size_usd: 10.0,
            live: false,
            tick_secs: 2,
            warmup_secs: 5,
            min_snapshot_minute: 3.5,
            max_snapshot_minute: 14.0,
            snapshot_spacing_minutes: 0.4,
            sane_band: PriceBand::new(0.02, 0.98),
            poll_band: PriceBand::new(0.01, 0.99),
            settlement_grace_secs: 30,
            settlement_timeout_secs: 120,
            fee_rate: 0.0,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            decision_minute: 7.0,
            last_entry_minute: 10.0,
            reversal_anchor_minute: 5.0,
            trend_anchor_minute: 4.0,
            anchor_tolerance: 1.5,
            confirm_min_price: 0.60,
            high_confidence_price: 0.70,
            strong_swing: 0.20,
            max_entry_price: 0.85,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json_logs: false,
            heartbeat_secs: 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance: BinanceConfig::default(),
            polymarket: PolymarketConfig::default(),
            bot: BotConfig::default(),
            strategy: StrategyConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Optional env vars:
    ///   COIN: BTC | ETH | SOL | XRP (default: BTC)
    ///   TRADE_SIZE_USD: stake per trade (default: 10)
    ///   LIVE_TRADING: "true" to place real orders (default: paper)
    ///   POLYMARKET_PRIVATE_KEY, POLYMARKET_FUNDER_ADDRESS, POLYMARKET_SIGNATURE_TYPE
    ///   POLYMARKET_API_KEY, POLYMARKET_API_SECRET, POLYMARKET_API_PASSPHRASE
    ///   PM_PRICE_POLL_SECS: REST price fallback cadence (default: 5)
    ///   RUST_LOG: log level (default: info)
    ///   LOG_FORMAT: "json" for JSON log lines
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        if let Some(coin) = env_non_empty("COIN") {
            match coin.parse::<Asset>() {
                Ok(asset) => config.bot.asset = asset,
                Err(e) => tracing::warn!("{e}, keeping {}", config.bot.asset),
            }
        }

        if let Some(size) = env_non_empty("TRADE_SIZE_USD").and_then(|s| s.parse().ok()) {
            config.bot.size_usd = size;
        }

        if let Some(live) = env_flag("LIVE_TRADING") {
            config.bot.live = live;
        }

        if let Some(key) = env_non_empty("POLYMARKET_PRIVATE_KEY") {
            config.polymarket.private_key = key;
        }
        config.polymarket.funder_address = env_non_empty("POLYMARKET_FUNDER_ADDRESS");
        if let Some(sig_type) = env_non_empty("POLYMARKET_SIGNATURE_TYPE") {
            config.polymarket.signature_type = sig_type.parse().unwrap_or(0);
        }
        config.polymarket.api_key = env_non_empty("POLYMARKET_API_KEY");
        config.polymarket.api_secret = env_non_empty("POLYMARKET_API_SECRET");
        config.polymarket.api_passphrase = env_non_empty("POLYMARKET_API_PASSPHRASE");

        if let Some(secs) = env_non_empty("PM_PRICE_POLL_SECS").and_then(|s| s.parse().ok()) {
            config.polymarket.price_poll_secs = secs;
        }

        if let Some(level) = env_non_empty("RUST_LOG") {
            config.telemetry.log_level = level;
        }
        config.telemetry.json_logs = env_non_empty("LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        config
    }

    pub fn mode_label(&self) -> &'static str {
        if self.bot.live {
            "LIVE"
        } else {
            "PAPER"
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bot.live {
            anyhow::ensure!(
                !self.polymarket.private_key.is_empty(),
                "POLYMARKET_PRIVATE_KEY must be set for live trading"
            );
        }
        anyhow::ensure!(
            self.bot.timeframe == Timeframe::FifteenMin,
            "only the 15m timeframe is traded"
        );
        anyhow::ensure!(self.bot.size_usd > 0.0, "TRADE_SIZE_USD must be positive");
        anyhow::ensure!(
            self.bot.settlement_timeout_secs > self.bot.settlement_grace_secs,
            "settlement timeout must exceed the grace period"
        );
        anyhow::ensure!(
            self.bot.min_snapshot_minute < self.bot.max_snapshot_minute,
            "snapshot window is empty"
        );
        anyhow::ensure!(
            (0.0..1.0).contains(&self.bot.fee_rate),
            "fee_rate must be in [0, 1)"
        );
        for endpoint in [
            &self.binance.rest_url,
            &self.binance.ws_url,
            &self.polymarket.gamma_events_url,
            &self.polymarket.clob_host,
            &self.polymarket.ws_url,
            &self.polymarket.past_results_url,
        ] {
            url::Url::parse(endpoint).with_context(|| format!("bad endpoint url: {endpoint}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_live_requires_key() {
        let mut config = Config::default();
        config.bot.live = true;
        assert!(config.validate().is_err());
        config.polymarket.private_key = "0xabc".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settlement_bounds_checked() {
        let mut config = Config::default();
        config.bot.settlement_timeout_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let mut config = Config::default();
        config.polymarket.clob_host = "clob.polymarket.com".into();
        assert!(config.validate().is_err());
    }
}
