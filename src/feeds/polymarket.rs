use crate::config::PolymarketConfig;
use crate::error::{FeedError, FeedResult};
use crate::feeds::market_discovery::{GammaClient, MarketDiscovery};
use crate::feeds::ws::{self, Reconnect};
use crate::models::market::{period_start, short_id, Asset, Timeframe, TokenPair};
use crate::models::state::{MarketState, PriceBand, SharedState};
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// How long the stream parks when no contract ids are known yet.
const PARK_SECS: u64 = 5;

/// Polymarket outcome-price feeds for the current period's contracts.
///
/// Spawns:
///   1. Market WebSocket, subscribed to whatever id pair the hub holds
///   2. Gamma REST poller, a corroborating fallback for the stream
pub struct PolymarketFeed {
    config: PolymarketConfig,
    asset: Asset,
    timeframe: Timeframe,
    poll_band: PriceBand,
    state: SharedState,
    gamma: GammaClient,
}

enum SessionEnd {
    /// The hub moved to a new contract pair; reconnect without delay.
    Resubscribe,
}

enum SessionEvent {
    Frame(FeedResult<String>),
    Watch,
}

impl PolymarketFeed {
    pub fn new(
        config: PolymarketConfig,
        asset: Asset,
        timeframe: Timeframe,
        poll_band: PriceBand,
        state: SharedState,
    ) -> Self {
        let gamma = GammaClient::new(config.gamma_events_url.clone());
        Self {
            config,
            asset,
            timeframe,
            poll_band,
            state,
            gamma,
        }
    }

    pub fn start(&self, shutdown_tx: &broadcast::Sender<()>) {
        info!("Starting Polymarket feed...");
        self.spawn_ws_feed(shutdown_tx.subscribe());
        self.spawn_price_poller(shutdown_tx.subscribe());
    }

    fn spawn_ws_feed(&self, mut shutdown: broadcast::Receiver<()>) {
        let url = self.config.ws_url.clone();
        let state = self.state.clone();
        let reconnect = Reconnect::new("PM", self.config.reconnect_secs);

        tokio::spawn(async move {
            let mut parked = false;
            loop {
                // Ids are re-read on every connect: a rollover may have
                // happened while we were away.
                let pair = session_pair(&*state.read().await);
                let Some(pair) = pair else {
                    if !parked {
                        info!("[PM] no contract ids yet, waiting");
                        parked = true;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(PARK_SECS)) => continue,
                        _ = shutdown.recv() => return,
                    }
                };
                parked = false;

                let result = tokio::select! {
                    r = run_ws_session(&url, &pair, &state) => r,
                    _ = shutdown.recv() => {
                        info!("Polymarket feed shutdown");
                        return;
                    }
                };

                match result {
                    Ok(SessionEnd::Resubscribe) => continue,
                    Err(e) => {
                        tokio::select! {
                            _ = reconnect.pause(e) => {}
                            _ = shutdown.recv() => return,
                        }
                    }
                }
            }
        });
    }

    fn spawn_price_poller(&self, mut shutdown: broadcast::Receiver<()>) {
        let gamma = self.gamma.clone();
        let asset = self.asset;
        let timeframe = self.timeframe;
        let band = self.poll_band;
        let state = self.state.clone();
        let every = Duration::from_secs(self.config.price_poll_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = poll_prices(&gamma, asset, timeframe, band, &state).await {
                            debug!("[PM poll] failed: {e}");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

async fn run_ws_session(url: &str, pair: &TokenPair, state: &SharedState) -> FeedResult<SessionEnd> {
    let mut session = ws::connect(url).await?;
    session
        .send_json(&serde_json::json!({
            "assets_ids": [pair.up, pair.down],
            "type": "market",
        }))
        .await?;
    info!(
        "[PM] connected – up={} down={}",
        short_id(&pair.up),
        short_id(&pair.down)
    );

    let mut watch = tokio::time::interval(Duration::from_secs(1));
    loop {
        let event = tokio::select! {
            frame = session.next_text() => SessionEvent::Frame(frame),
            _ = watch.tick() => SessionEvent::Watch,
        };

        match event {
            SessionEvent::Frame(frame) => {
                let text = frame?;
                let mut guard = state.write().await;
                match apply_ws_message(&text, &mut guard) {
                    Ok(_) => {}
                    Err(e) => debug!("[PM] skipped frame: {e}"),
                }
            }
            SessionEvent::Watch => {
                if pair_changed(&*state.read().await, pair) {
                    info!("[PM] contract ids changed, resubscribing");
                    session.close().await;
                    return Ok(SessionEnd::Resubscribe);
                }
            }
        }
    }
}

/// Pair the stream subscribes to on connect; `None` parks it.
pub fn session_pair(state: &MarketState) -> Option<TokenPair> {
    state.token_pair()
}

/// True once the hub no longer holds the pair a session subscribed to.
pub fn pair_changed(state: &MarketState, subscribed: &TokenPair) -> bool {
    state.token_pair().as_ref() != Some(subscribed)
}

/// Apply one market-channel frame. Returns how many prices were written;
/// updates for ids other than the hub's current pair are dropped.
pub fn apply_ws_message(text: &str, state: &mut MarketState) -> FeedResult<usize> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let mut applied = 0;

    match raw {
        serde_json::Value::Array(entries) => {
            for entry in entries {
                let book = match serde_json::from_value::<BookMsg>(entry) {
                    Ok(book) => book,
                    Err(e) => {
                        debug!("[PM] skipped book entry: {e}");
                        continue;
                    }
                };
                match apply_book(&book, state) {
                    Ok(changed) => applied += changed as usize,
                    Err(e) => debug!("[PM] skipped book entry: {e}"),
                }
            }
        }
        serde_json::Value::Object(_) => {
            let msg: EventMsg = serde_json::from_value(raw)?;
            match msg.event_type.as_deref() {
                Some("book") => {
                    let book: BookMsg = serde_json::from_value(msg.rest)?;
                    applied += apply_book(&book, state)? as usize;
                }
                Some("price_change") => {
                    let changes: PriceChangeMsg = serde_json::from_value(msg.rest)?;
                    for entry in changes.price_changes {
                        let Ok(change) = serde_json::from_value::<PriceChange>(entry) else {
                            continue;
                        };
                        let Some(best_ask) = change.best_ask.as_ref().and_then(price_value) else {
                            continue;
                        };
                        applied += state.set_pm_price(&change.asset_id, best_ask) as usize;
                    }
                }
                _ => {}
            }
        }
        _ => {}
    }
    Ok(applied)
}

fn apply_book(book: &BookMsg, state: &mut MarketState) -> FeedResult<bool> {
    let mut best: Option<f64> = None;
    for level in &book.asks {
        let price = price_value(&level.price)
            .ok_or_else(|| FeedError::Malformed(format!("ask price {}", level.price)))?;
        best = Some(best.map_or(price, |b| b.min(price)));
    }
    Ok(match best {
        Some(price) => state.set_pm_price(&book.asset_id, price),
        None => false,
    })
}

/// Prices arrive as strings ("0.55") but numbers are accepted too.
fn price_value(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::String(s) if !s.is_empty() => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Fetch the current period's quoted prices and apply them as a fallback.
pub async fn poll_prices(
    gamma: &GammaClient,
    asset: Asset,
    timeframe: Timeframe,
    band: PriceBand,
    state: &SharedState,
) -> FeedResult<()> {
    let now = Utc::now();
    let slug = MarketDiscovery::slug_at(asset, timeframe, now);
    let Some((up, down)) = gamma.outcome_prices(&slug).await? else {
        return Ok(());
    };

    let quoted_period = (timeframe == Timeframe::FifteenMin).then(|| period_start(now.timestamp()));
    match apply_poll(&mut *state.write().await, quoted_period, up, down, band) {
        PollApplied::Applied => {}
        PollApplied::OtherPeriod => debug!("[PM poll] {slug} not the tracked period, skipping"),
        PollApplied::OutOfBand => {
            debug!("[PM poll] ignoring suspicious quote up={up:.3} down={down:.3}")
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollApplied {
    Applied,
    /// The hub tracks a different period than the one quoted.
    OtherPeriod,
    OutOfBand,
}

/// Apply polled prices quoted for `quoted_period` (when known).
///
/// Quotes for a period the hub is not tracking are dropped: they would be
/// wiped on rollover, or kept into the wrong period.
pub fn apply_poll(
    state: &mut MarketState,
    quoted_period: Option<i64>,
    up: f64,
    down: f64,
    band: PriceBand,
) -> PollApplied {
    if quoted_period.is_some_and(|p| p != state.period_start_ts) {
        return PollApplied::OtherPeriod;
    }
    if state.apply_polled_prices(up, down, band) {
        PollApplied::Applied
    } else {
        PollApplied::OutOfBand
    }
}

// --- market channel message types ---

#[derive(Debug, Deserialize)]
struct EventMsg {
    event_type: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BookMsg {
    asset_id: String,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PriceChangeMsg {
    #[serde(default)]
    price_changes: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    asset_id: String,
    best_ask: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::PERIOD_SECS;

    const P0: i64 = 1_768_502_700;

    fn pair(up: &str, down: &str) -> TokenPair {
        TokenPair {
            up: up.into(),
            down: down.into(),
        }
    }

    fn hub(up: &str, down: &str) -> MarketState {
        let mut s = MarketState::new();
        s.set_tokens(Some(TokenPair {
            up: up.into(),
            down: down.into(),
        }));
        s
    }

    #[test]
    fn test_book_snapshot_takes_min_ask() {
        let mut s = hub("UP", "DN");
        let msg = r#"[
            {"asset_id":"UP","bids":[],"asks":[{"price":"0.58","size":"10"},{"price":"0.55","size":"5"}]},
            {"asset_id":"DN","asks":[{"price":"0.47","size":"3"}]}
        ]"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 2);
        assert_eq!(s.pm_up_price, Some(0.55));
        assert_eq!(s.pm_down_price, Some(0.47));
    }

    #[test]
    fn test_single_book_event() {
        let mut s = hub("UP", "DN");
        let msg = r#"{"event_type":"book","asset_id":"DN","asks":[{"price":"0.31","size":"1"}]}"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 1);
        assert_eq!(s.pm_down_price, Some(0.31));
    }

    #[test]
    fn test_price_change_best_ask() {
        let mut s = hub("UP", "DN");
        let msg = r#"{"event_type":"price_change","market":"0xabc","price_changes":[
            {"asset_id":"UP","price":"0.6","best_ask":"0.61"},
            {"asset_id":"DN","price":"0.4","best_ask":""}
        ]}"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 1);
        assert_eq!(s.pm_up_price, Some(0.61));
        assert_eq!(s.pm_down_price, None);
    }

    #[test]
    fn test_expired_contract_updates_dropped() {
        let mut s = hub("UP-NEW", "DN-NEW");
        let msg = r#"{"event_type":"price_change","price_changes":[
            {"asset_id":"UP-OLD","best_ask":"0.99"},
            {"asset_id":"DN-OLD","best_ask":"0.01"}
        ]}"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 0);
        let book = r#"[{"asset_id":"UP-OLD","asks":[{"price":"0.99"}]}]"#;
        assert_eq!(apply_ws_message(book, &mut s).unwrap(), 0);
        assert_eq!(s.pm_up_price, None);
        assert_eq!(s.pm_down_price, None);
    }

    #[test]
    fn test_empty_asks_leave_price() {
        let mut s = hub("UP", "DN");
        s.set_pm_price("UP", 0.5);
        let msg = r#"[{"asset_id":"UP","asks":[]}]"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 0);
        assert_eq!(s.pm_up_price, Some(0.5));
    }

    #[test]
    fn test_bad_entries_skipped_individually() {
        let mut s = hub("UP", "DN");
        let msg = r#"[
            {"bids":[],"asks":[{"price":"0.10"}]},
            {"asset_id":"DN","asks":[{"price":"oops"}]},
            {"asset_id":"UP","asks":[{"price":"0.57"}]}
        ]"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 1);
        assert_eq!(s.pm_up_price, Some(0.57));

        let msg = r#"{"event_type":"price_change","price_changes":[
            {"price":"0.4","best_ask":"0.41"},
            {"asset_id":"DN","best_ask":"0.44"}
        ]}"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 1);
        assert_eq!(s.pm_down_price, Some(0.44));
    }

    #[test]
    fn test_session_pair_read_from_hub() {
        let mut s = MarketState::new();
        assert_eq!(session_pair(&s), None);

        s.begin_period(P0, None, false, Some(pair("UP0", "DN0")));
        assert_eq!(session_pair(&s), Some(pair("UP0", "DN0")));
    }

    #[test]
    fn test_pair_change_triggers_resubscribe() {
        let mut s = MarketState::new();
        s.begin_period(P0, None, false, Some(pair("UP0", "DN0")));
        let subscribed = session_pair(&s).unwrap();
        assert!(!pair_changed(&s, &subscribed));

        s.begin_period(P0 + PERIOD_SECS, None, false, None);
        assert!(pair_changed(&s, &subscribed));

        s.set_tokens(Some(pair("UP1", "DN1")));
        assert!(pair_changed(&s, &subscribed));
    }

    #[test]
    fn test_poll_for_previous_period_dropped() {
        let band = PriceBand::new(0.05, 0.95);
        let mut s = MarketState::new();
        s.begin_period(P0 + PERIOD_SECS, None, false, Some(pair("UP1", "DN1")));
        s.set_pm_price("UP1", 0.52);

        let applied = apply_poll(&mut s, Some(P0), 0.9, 0.1, band);
        assert_eq!(applied, PollApplied::OtherPeriod);
        assert_eq!(s.pm_up_price, Some(0.52));
        assert_eq!(s.pm_down_price, None);

        let applied = apply_poll(&mut s, Some(P0 + PERIOD_SECS), 0.6, 0.4, band);
        assert_eq!(applied, PollApplied::Applied);
        assert_eq!(s.pm_up_price, Some(0.6));
        assert_eq!(s.pm_down_price, Some(0.4));
    }

    #[test]
    fn test_poll_out_of_band_keeps_sane_price() {
        let band = PriceBand::new(0.05, 0.95);
        let mut s = MarketState::new();
        s.begin_period(P0, None, false, Some(pair("UP0", "DN0")));
        s.set_pm_price("UP0", 0.52);

        assert_eq!(apply_poll(&mut s, Some(P0), 0.99, 0.01, band), PollApplied::OutOfBand);
        assert_eq!(s.pm_up_price, Some(0.52));
    }

    #[test]
    fn test_other_events_ignored() {
        let mut s = hub("UP", "DN");
        let msg = r#"{"event_type":"last_trade_price","asset_id":"UP","price":"0.7"}"#;
        assert_eq!(apply_ws_message(msg, &mut s).unwrap(), 0);
        assert!(apply_ws_message("PONG", &mut s).is_err());
    }
}
