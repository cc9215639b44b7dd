use crate::config::BinanceConfig;
use crate::error::{check_status, FeedError, FeedResult};
use crate::feeds::ws::{self, Reconnect};
use crate::models::candle::{Candle, Trade};
use crate::models::market::{Asset, Timeframe};
use crate::models::state::{MarketState, SharedState};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Spot exchange feeds for one symbol.
///
/// Runs two independent producers against the shared hub:
///   - order-book poller (REST, fixed interval, failures silently absorbed)
///   - trade + kline stream (WebSocket, fixed-delay reconnect forever)
pub struct BinanceFeed {
    config: BinanceConfig,
    symbol: String,
    interval: String,
    state: SharedState,
    http: reqwest::Client,
}

impl BinanceFeed {
    pub fn new(config: BinanceConfig, asset: Asset, timeframe: Timeframe, state: SharedState) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();

        Self {
            config,
            symbol: asset.binance_symbol().to_string(),
            interval: timeframe.kline_interval().to_string(),
            state,
            http,
        }
    }

    /// Seed candle history from REST before the stream starts.
    pub async fn bootstrap(&self) -> FeedResult<usize> {
        let url = format!("{}/klines", self.config.rest_url);
        let limit = self.config.kline_boot.to_string();
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", self.symbol.as_str()),
                ("interval", self.interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let rows: Vec<Vec<serde_json::Value>> = check_status(resp).await?.json().await?;

        let candles = rows
            .iter()
            .map(|row| parse_rest_kline(row))
            .collect::<FeedResult<Vec<_>>>()?;
        let count = candles.len();

        self.state.write().await.seed_klines(candles, self.config.kline_max);
        info!("[Binance] loaded {count} historical {} candles", self.interval);
        Ok(count)
    }

    /// Start both producers.
    pub fn start(&self, shutdown_tx: &broadcast::Sender<()>) {
        self.spawn_depth_poller(shutdown_tx.subscribe());
        self.spawn_stream(shutdown_tx.subscribe());
    }

    fn spawn_depth_poller(&self, mut shutdown: broadcast::Receiver<()>) {
        let http = self.http.clone();
        let url = format!("{}/depth", self.config.rest_url);
        let symbol = self.symbol.clone();
        let limit = self.config.depth_limit;
        let every = Duration::from_secs(self.config.depth_poll_secs);
        let state = self.state.clone();

        info!("[Binance OB] polling {symbol} every {}s", every.as_secs());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = poll_depth(&http, &url, &symbol, limit, &state).await {
                            debug!("[Binance OB] poll failed: {e}");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_stream(&self, mut shutdown: broadcast::Receiver<()>) {
        let sym = self.symbol.to_lowercase();
        let url = format!(
            "{}?streams={sym}@trade/{sym}@kline_{}",
            self.config.ws_url, self.interval
        );
        let config = self.config.clone();
        let state = self.state.clone();
        let symbol = self.symbol.clone();
        let reconnect = Reconnect::new("Binance WS", config.reconnect_secs);

        tokio::spawn(async move {
            loop {
                let result = tokio::select! {
                    r = run_stream_session(&url, &symbol, &config, &state) => r,
                    _ = shutdown.recv() => {
                        info!("Binance feed shutdown");
                        return;
                    }
                };

                // Prior state is kept; new data layers on top after reconnect.
                let reason = match result {
                    Ok(()) => FeedError::Closed,
                    Err(e) => e,
                };
                tokio::select! {
                    _ = reconnect.pause(reason) => {}
                    _ = shutdown.recv() => return,
                }
            }
        });
    }
}

async fn run_stream_session(
    url: &str,
    symbol: &str,
    config: &BinanceConfig,
    state: &SharedState,
) -> FeedResult<()> {
    let mut session = ws::connect(url).await?;
    info!("[Binance WS] connected – {symbol}");

    loop {
        let text = session.next_text().await?;
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut guard = state.write().await;
        if let Err(e) = handle_stream_message(&text, &mut guard, config, now) {
            warn!("[Binance WS] bad message: {e}");
            return Err(e);
        }
    }
}

/// Fetch one depth snapshot and replace the hub's book with it.
pub async fn poll_depth(
    http: &reqwest::Client,
    url: &str,
    symbol: &str,
    limit: u32,
    state: &SharedState,
) -> FeedResult<()> {
    let limit = limit.to_string();
    let resp = http
        .get(url)
        .query(&[("symbol", symbol), ("limit", limit.as_str())])
        .send()
        .await?;
    let body = check_status(resp).await?.text().await?;
    let mut guard = state.write().await;
    apply_depth(&mut guard, &body)
}

/// Parse a depth body fully before touching state, so a bad response leaves
/// the previous book intact.
pub fn apply_depth(state: &mut MarketState, body: &str) -> FeedResult<()> {
    let depth: DepthResponse = serde_json::from_str(body)?;
    let bids = parse_levels(&depth.bids)?;
    let asks = parse_levels(&depth.asks)?;
    state.apply_book(bids, asks);
    Ok(())
}

fn parse_levels(levels: &[[String; 2]]) -> FeedResult<Vec<(f64, f64)>> {
    levels
        .iter()
        .map(|[p, q]| Ok((parse_num(p)?, parse_num(q)?)))
        .collect()
}

fn parse_num(raw: &str) -> FeedResult<f64> {
    raw.parse::<f64>()
        .map_err(|_| FeedError::Malformed(format!("not a number: {raw:?}")))
}

/// Route one combined-stream message into the hub.
pub fn handle_stream_message(
    text: &str,
    state: &mut MarketState,
    config: &BinanceConfig,
    now: f64,
) -> FeedResult<()> {
    // Combined stream wraps in {"stream":"...", "data":{...}}
    let envelope: CombinedStreamMsg = serde_json::from_str(text)?;
    let stream = envelope.stream.as_str();

    if stream.contains("@trade") {
        let msg: TradeMsg = serde_json::from_value(envelope.data)?;
        let trade = Trade {
            time: msg.trade_time as f64 / 1000.0,
            price: parse_num(&msg.price)?,
            quantity: parse_num(&msg.quantity)?,
            is_buy: !msg.is_buyer_maker,
        };
        state.push_trade(trade, now, config.trade_prune_above, config.trade_ttl_secs);
    } else if stream.contains("@kline") {
        let msg: KlineWrapper = serde_json::from_value(envelope.data)?;
        let k = msg.k;
        let candle = Candle {
            open_time: k.open_time as f64 / 1000.0,
            open: parse_num(&k.open)?,
            high: parse_num(&k.high)?,
            low: parse_num(&k.low)?,
            close: parse_num(&k.close)?,
            volume: parse_num(&k.volume)?,
        };
        state.apply_candle(candle, k.closed, config.kline_max);
    }
    Ok(())
}

fn parse_rest_kline(row: &[serde_json::Value]) -> FeedResult<Candle> {
    let field = |i: usize| -> FeedResult<f64> {
        match row.get(i) {
            Some(serde_json::Value::String(s)) => parse_num(s),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| FeedError::Malformed(format!("kline field {i}: {v}"))),
            None => Err(FeedError::Malformed(format!("kline row too short: {}", row.len()))),
        }
    };

    Ok(Candle {
        open_time: field(0)? / 1000.0,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

// --- Binance message types ---

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct CombinedStreamMsg {
    stream: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TradeMsg {
    #[serde(rename = "T")]
    trade_time: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

#[derive(Debug, Deserialize)]
struct KlineWrapper {
    k: KlineMsg,
}

#[derive(Debug, Deserialize)]
struct KlineMsg {
    #[serde(rename = "t")]
    open_time: u64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_DEPTH: &str = r#"{"lastUpdateId":1,"bids":[["100.5","2.0"],["100.0","1.0"]],"asks":[["101.5","3.0"]]}"#;

    #[test]
    fn test_depth_replaces_book_and_mid() {
        let mut s = MarketState::new();
        apply_depth(&mut s, GOOD_DEPTH).unwrap();
        assert_eq!(s.bids, vec![(100.5, 2.0), (100.0, 1.0)]);
        assert_eq!(s.asks, vec![(101.5, 3.0)]);
        assert_eq!(s.mid, 101.0);
    }

    #[test]
    fn test_repeated_poll_failures_keep_last_good_book() {
        let mut s = MarketState::new();
        apply_depth(&mut s, GOOD_DEPTH).unwrap();
        let (bids, asks, mid) = (s.bids.clone(), s.asks.clone(), s.mid);

        let bad = [
            "",
            "<html>502</html>",
            r#"{"code":-1003,"msg":"Too many requests"}"#,
            r#"{"bids":[["abc","1"]],"asks":[["1","1"]]}"#,
            r#"{"bids":[["1","1"]]}"#,
        ];
        for i in 0..100 {
            assert!(apply_depth(&mut s, bad[i % bad.len()]).is_err());
        }
        assert_eq!(s.bids, bids);
        assert_eq!(s.asks, asks);
        assert_eq!(s.mid, mid);
    }

    #[test]
    fn test_trade_message_appends() {
        let mut s = MarketState::new();
        let cfg = BinanceConfig::default();
        let msg = r#"{"stream":"btcusdt@trade","data":{"e":"trade","T":1700000000500,"p":"42000.10","q":"0.5","m":true}}"#;
        handle_stream_message(msg, &mut s, &cfg, 1_700_000_001.0).unwrap();
        assert_eq!(s.trades.len(), 1);
        assert_eq!(s.trades[0].time, 1_700_000_000.5);
        assert!(!s.trades[0].is_buy);
    }

    #[test]
    fn test_kline_message_promotes_on_close() {
        let mut s = MarketState::new();
        let cfg = BinanceConfig::default();
        let open = r#"{"stream":"btcusdt@kline_1m","data":{"k":{"t":60000,"o":"1","h":"2","l":"0.5","c":"1.5","v":"10","x":false}}}"#;
        let closed = r#"{"stream":"btcusdt@kline_1m","data":{"k":{"t":60000,"o":"1","h":"2","l":"0.5","c":"1.8","v":"12","x":true}}}"#;

        handle_stream_message(open, &mut s, &cfg, 0.0).unwrap();
        assert!(s.klines.is_empty());
        assert_eq!(s.current_candle.map(|c| c.close), Some(1.5));

        handle_stream_message(closed, &mut s, &cfg, 0.0).unwrap();
        assert_eq!(s.klines.len(), 1);
        assert_eq!(s.klines[0].close, 1.8);
    }

    #[test]
    fn test_rest_kline_row() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1700000000000,"1.0","2.0","0.5","1.5","100.0",1700000059999,"0",10,"0","0","0"]"#,
        )
        .unwrap();
        let c = parse_rest_kline(&row).unwrap();
        assert_eq!(c.open_time, 1_700_000_000.0);
        assert_eq!(c.volume, 100.0);
    }
}
