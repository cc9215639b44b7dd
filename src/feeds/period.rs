use crate::feeds::market_discovery::{MarketDiscovery, TokenResolver};
use crate::feeds::oracle::StrikeOracle;
use crate::models::market::{period_start, short_id, Asset, Timeframe, TokenPair};
use crate::models::state::SharedState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Grace before the first period is anchored, so the spot mid can serve as
/// a strike fallback.
const STARTUP_DELAY: Duration = Duration::from_secs(2);

/// Keeps the hub anchored on the current period: boundaries, strike and
/// contract ids.
///
/// Uninitialized until [`initialize`](Self::initialize), then polled once a
/// second by [`check`](Self::check). Network lookups happen before the lock
/// is taken; the new period is then applied in one write.
pub struct PeriodTracker {
    asset: Asset,
    timeframe: Timeframe,
    state: SharedState,
    strikes: Arc<dyn StrikeOracle>,
    tokens: Arc<dyn TokenResolver>,
    token_retry_secs: i64,
    last_token_attempt: i64,
    initialized: bool,
}

impl PeriodTracker {
    pub fn new(
        asset: Asset,
        timeframe: Timeframe,
        state: SharedState,
        strikes: Arc<dyn StrikeOracle>,
        tokens: Arc<dyn TokenResolver>,
    ) -> Self {
        Self {
            asset,
            timeframe,
            state,
            strikes,
            tokens,
            token_retry_secs: 5,
            last_token_attempt: 0,
            initialized: false,
        }
    }

    /// Enter tracking on the period containing `now`.
    pub async fn initialize(&mut self, now: i64) -> i64 {
        let start = period_start(now);
        self.begin(start, now).await;
        self.initialized = true;
        start
    }

    /// Roll over if `now` has left the tracked period, and retry contract
    /// resolution while ids are missing. Returns the new start on rollover.
    pub async fn check(&mut self, now: i64) -> Option<i64> {
        if !self.initialized {
            return Some(self.initialize(now).await);
        }

        let current = period_start(now);
        let (tracked, has_tokens) = {
            let s = self.state.read().await;
            (s.period_start_ts, s.token_pair().is_some())
        };

        if current != tracked {
            self.begin(current, now).await;
            return Some(current);
        }

        if !has_tokens && now - self.last_token_attempt >= self.token_retry_secs {
            if let Some(pair) = self.resolve_tokens(current, now).await {
                let mut s = self.state.write().await;
                // The period may have moved on while we were fetching.
                if s.period_start_ts == current {
                    s.set_tokens(Some(pair));
                }
            }
        }
        None
    }

    async fn begin(&mut self, start: i64, now: i64) {
        let (strike, is_oracle) = self.resolve_strike(start).await;
        let tokens = self.resolve_tokens(start, now).await;

        let mut s = self.state.write().await;
        s.begin_period(start, strike, is_oracle, tokens);
        info!(
            "[Period] {} → {} | strike={} ({})",
            s.period_start_ts,
            s.period_end_ts,
            strike.map_or("?".to_string(), |k| format!("${k:.2}")),
            if is_oracle { "oracle" } else { "spot mid fallback" },
        );
    }

    async fn resolve_strike(&self, start: i64) -> (Option<f64>, bool) {
        match self.strikes.strike(self.asset, start).await {
            Ok(strike) => (Some(strike), true),
            Err(e) => {
                let mid = self.state.read().await.mid;
                warn!("[Period] oracle strike unavailable ({e}), falling back to mid={mid:.2}");
                ((mid > 0.0).then_some(mid), false)
            }
        }
    }

    async fn resolve_tokens(&mut self, start: i64, now: i64) -> Option<TokenPair> {
        self.last_token_attempt = now;
        let at = DateTime::<Utc>::from_timestamp(start, 0).unwrap_or_default();
        let slug = MarketDiscovery::slug_at(self.asset, self.timeframe, at);

        match self.tokens.resolve_tokens(self.asset, &slug).await {
            Ok(Some(pair)) => {
                info!(
                    "[Period] PM tokens for {slug}: {}… / {}…",
                    short_id(&pair.up),
                    short_id(&pair.down)
                );
                Some(pair)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("[Period] token resolution for {slug} failed: {e}");
                None
            }
        }
    }

    /// Run the 1s tracking loop until shutdown.
    pub fn spawn(mut self, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(STARTUP_DELAY) => {}
                _ = shutdown.recv() => return,
            }

            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.check(Utc::now().timestamp()).await;
                    }
                    _ = shutdown.recv() => {
                        info!("Period tracker shutdown");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FeedError, FeedResult};
    use crate::models::market::PERIOD_SECS;
    use crate::models::state::{shared, MarketState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const START: i64 = 1_768_502_700;

    struct FixedStrike(Option<f64>);

    #[async_trait]
    impl StrikeOracle for FixedStrike {
        async fn strike(&self, _asset: Asset, _period_start: i64) -> FeedResult<f64> {
            self.0.ok_or(FeedError::Timeout("oracle"))
        }
    }

    /// Lists a market only for the slugs it has been told about.
    #[derive(Default)]
    struct Listings {
        listed: Mutex<Vec<String>>,
        calls: Mutex<u32>,
    }

    impl Listings {
        fn list(&self, slug: &str) {
            self.listed.lock().unwrap().push(slug.to_string());
        }
    }

    #[async_trait]
    impl TokenResolver for Listings {
        async fn resolve_tokens(&self, _asset: Asset, slug: &str) -> FeedResult<Option<TokenPair>> {
            *self.calls.lock().unwrap() += 1;
            let listed = self.listed.lock().unwrap().iter().any(|s| s == slug);
            Ok(listed.then(|| TokenPair {
                up: format!("{slug}-up"),
                down: format!("{slug}-down"),
            }))
        }
    }

    fn slug(start: i64) -> String {
        format!("btc-updown-15m-{start}")
    }

    fn tracker(strike: Option<f64>, listings: Arc<Listings>) -> (PeriodTracker, SharedState) {
        let state = shared(MarketState::new());
        let t = PeriodTracker::new(
            Asset::BTC,
            Timeframe::FifteenMin,
            state.clone(),
            Arc::new(FixedStrike(strike)),
            listings,
        );
        (t, state)
    }

    #[tokio::test]
    async fn test_initialize_anchors_period_with_oracle_strike() {
        let listings = Arc::new(Listings::default());
        listings.list(&slug(START));
        let (mut t, state) = tracker(Some(97_000.0), listings);

        assert_eq!(t.initialize(START + 42).await, START);
        let s = state.read().await;
        assert_eq!(s.period_start_ts, START);
        assert_eq!(s.period_end_ts, START + PERIOD_SECS);
        assert_eq!(s.strike, Some(97_000.0));
        assert!(s.strike_is_oracle);
        assert_eq!(s.pm_up_id.as_deref(), Some("btc-updown-15m-1768502700-up"));
    }

    #[tokio::test]
    async fn test_strike_falls_back_to_mid_then_none() {
        let (mut t, state) = tracker(None, Arc::new(Listings::default()));
        state.write().await.apply_book(vec![(100.0, 1.0)], vec![(102.0, 1.0)]);
        t.initialize(START).await;
        {
            let s = state.read().await;
            assert_eq!(s.strike, Some(101.0));
            assert!(!s.strike_is_oracle);
        }

        let (mut t, state) = tracker(None, Arc::new(Listings::default()));
        t.initialize(START).await;
        assert_eq!(state.read().await.strike, None);
    }

    #[tokio::test]
    async fn test_rollover_clears_prices_and_swaps_tokens() {
        let listings = Arc::new(Listings::default());
        listings.list(&slug(START));
        listings.list(&slug(START + PERIOD_SECS));
        let (mut t, state) = tracker(Some(1.0), listings);

        t.initialize(START).await;
        {
            let mut s = state.write().await;
            let up = s.pm_up_id.clone().unwrap();
            s.set_pm_price(&up, 0.8);
        }

        assert_eq!(t.check(START + 899).await, None);
        assert_eq!(state.read().await.pm_up_price, Some(0.8));

        assert_eq!(t.check(START + 900).await, Some(START + PERIOD_SECS));
        let s = state.read().await;
        assert_eq!(s.period_end_ts, s.period_start_ts + PERIOD_SECS);
        assert_eq!(s.pm_up_price, None);
        assert_eq!(s.pm_down_price, None);
        assert_eq!(s.pm_up_id.as_deref(), Some("btc-updown-15m-1768503600-up"));
    }

    #[tokio::test]
    async fn test_unlisted_market_retried_every_five_seconds() {
        let listings = Arc::new(Listings::default());
        let (mut t, state) = tracker(Some(1.0), listings.clone());

        t.initialize(START).await;
        assert!(state.read().await.token_pair().is_none());
        assert_eq!(*listings.calls.lock().unwrap(), 1);

        t.check(START + 3).await;
        assert_eq!(*listings.calls.lock().unwrap(), 1, "too early to retry");

        listings.list(&slug(START));
        t.check(START + 5).await;
        assert_eq!(*listings.calls.lock().unwrap(), 2);
        assert!(state.read().await.token_pair().is_some());

        t.check(START + 20).await;
        assert_eq!(*listings.calls.lock().unwrap(), 2, "no lookups once ids are known");
    }
}
