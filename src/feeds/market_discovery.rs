use crate::error::{check_status, FeedError, FeedResult};
use crate::models::market::{Asset, Timeframe, TokenPair, PERIOD_SECS};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::Deserialize;
use tracing::{debug, info};

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Generates market slugs for the period containing a given instant.
///
/// Polymarket short-duration markets follow the pattern:
///   {asset}-updown-{window}-{unix_timestamp}
///
/// Hourly and daily markets are named after their US Eastern civil time:
///   {long_name}-up-or-down-{month}-{day}-{hour}-et
///   {long_name}-up-or-down-on-{month}-{day}
pub struct MarketDiscovery;

impl MarketDiscovery {
    pub fn current_slug(asset: Asset, timeframe: Timeframe) -> String {
        Self::slug_at(asset, timeframe, Utc::now())
    }

    pub fn slug_at(asset: Asset, timeframe: Timeframe, now: DateTime<Utc>) -> String {
        let ts = now.timestamp();
        match timeframe {
            Timeframe::FifteenMin => {
                let start = ts.div_euclid(PERIOD_SECS) * PERIOD_SECS;
                format!("{}-updown-15m-{start}", asset.slug_prefix())
            }
            Timeframe::FourHour => {
                // 4h windows are aligned to 01:00 UTC, not midnight.
                let start = (ts - 3600).div_euclid(14_400) * 14_400 + 3600;
                format!("{}-updown-4h-{start}", asset.slug_prefix())
            }
            Timeframe::OneHour => {
                let et = eastern_time(now);
                format!(
                    "{}-up-or-down-{}-{}-{}-et",
                    asset.long_name(),
                    month_name(et.month()),
                    et.day(),
                    to_12h(et.hour())
                )
            }
            Timeframe::Daily => {
                let et = eastern_time(now);
                // Daily markets resolve at noon ET; after that, the next day's is live.
                let target = if et.hour() < 12 { et } else { et + Duration::days(1) };
                format!(
                    "{}-up-or-down-on-{}-{}",
                    asset.long_name(),
                    month_name(target.month()),
                    target.day()
                )
            }
        }
    }
}

fn month_name(month: u32) -> &'static str {
    MONTHS[(month as usize).saturating_sub(1) % 12]
}

/// `0 -> 12am`, `13 -> 1pm`.
pub fn to_12h(hour24: u32) -> String {
    match hour24 {
        0 => "12am".to_string(),
        h if h < 12 => format!("{h}am"),
        12 => "12pm".to_string(),
        h => format!("{}pm", h - 12),
    }
}

fn first_sunday(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or_default();
    let weekday = first.weekday().num_days_from_monday();
    1 + (6 - weekday) % 7
}

fn utc_at(year: i32, month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
        .single()
        .unwrap_or_default()
}

/// US daylight-saving window for `year`, as UTC instants: second Sunday of
/// March 02:00 UTC up to the first Sunday of November 06:00 UTC.
pub fn dst_window(year: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = utc_at(year, 3, first_sunday(year, 3) + 7, 2);
    let end = utc_at(year, 11, first_sunday(year, 11), 6);
    (start, end)
}

/// Eastern civil time for `utc` (UTC-4 during DST, UTC-5 otherwise).
pub fn eastern_time(utc: DateTime<Utc>) -> NaiveDateTime {
    let (start, end) = dst_window(utc.year());
    let offset = if utc >= start && utc < end { -4 } else { -5 };
    (utc + Duration::hours(offset)).naive_utc()
}

/// Maps a period slug to its pair of outcome contract ids.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// `Ok(None)` when the market is not listed (yet).
    async fn resolve_tokens(&self, asset: Asset, slug: &str) -> FeedResult<Option<TokenPair>>;
}

/// Client for the Gamma events endpoint.
#[derive(Clone)]
pub struct GammaClient {
    http: reqwest::Client,
    events_url: String,
}

impl GammaClient {
    pub fn new(events_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            events_url: events_url.into(),
        }
    }

    /// First market of the event whose ticker equals `slug`.
    pub async fn fetch_market(&self, slug: &str) -> FeedResult<Option<GammaMarket>> {
        let resp = self
            .http
            .get(&self.events_url)
            .query(&[("slug", slug), ("limit", "1")])
            .send()
            .await?;
        let events: Vec<GammaEvent> = check_status(resp).await?.json().await?;
        Ok(first_market(events, slug))
    }

    /// Quoted (up, down) outcome prices for the market at `slug`.
    pub async fn outcome_prices(&self, slug: &str) -> FeedResult<Option<(f64, f64)>> {
        match self.fetch_market(slug).await? {
            Some(market) => market.outcome_prices().map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TokenResolver for GammaClient {
    async fn resolve_tokens(&self, asset: Asset, slug: &str) -> FeedResult<Option<TokenPair>> {
        let Some(market) = self.fetch_market(slug).await? else {
            info!("[PM] no active {asset} market for slug: {slug}");
            return Ok(None);
        };
        let pair = market.token_pair()?;
        debug!("[PM] {slug} -> up={} down={}", pair.up, pair.down);
        Ok(Some(pair))
    }
}

fn first_market(events: Vec<GammaEvent>, slug: &str) -> Option<GammaMarket> {
    events
        .into_iter()
        .next()
        .filter(|event| event.ticker.as_deref() == Some(slug))
        .and_then(|event| event.markets.into_iter().next())
}

// --- Gamma response types ---

#[derive(Debug, Deserialize)]
pub struct GammaEvent {
    pub ticker: Option<String>,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// Gamma encodes its list fields as JSON strings (`"[\"Up\", \"Down\"]"`).
#[derive(Debug, Deserialize)]
pub struct GammaMarket {
    #[serde(rename = "clobTokenIds", default)]
    pub clob_token_ids: serde_json::Value,
    #[serde(default)]
    pub outcomes: serde_json::Value,
    #[serde(rename = "outcomePrices", default)]
    pub outcome_prices: serde_json::Value,
}

impl GammaMarket {
    /// Indices of the Up and Down entries in a two-or-more element list,
    /// taken from `outcomes`; positional when outcomes are absent or unusable.
    fn up_down_indices(&self, len: usize) -> (usize, usize) {
        let outcomes = string_list(&self.outcomes).unwrap_or_default();
        let position = |name: &str| {
            outcomes
                .iter()
                .position(|o| o.eq_ignore_ascii_case(name))
                .filter(|&i| i < len)
        };

        match (position("up"), position("down")) {
            (Some(u), Some(d)) if u != d => (u, d),
            _ => (0, 1),
        }
    }

    /// Token ids mapped through `outcomes`.
    pub fn token_pair(&self) -> FeedResult<TokenPair> {
        let ids = string_list(&self.clob_token_ids)?;
        if ids.len() < 2 {
            return Err(FeedError::Malformed(format!("expected 2 token ids, got {}", ids.len())));
        }

        let (up, down) = self.up_down_indices(ids.len());
        Ok(TokenPair {
            up: ids[up].clone(),
            down: ids[down].clone(),
        })
    }

    /// `(up, down)` prices, ordered the same way as [`token_pair`](Self::token_pair).
    pub fn outcome_prices(&self) -> FeedResult<(f64, f64)> {
        let prices = string_list(&self.outcome_prices)?;
        if prices.len() < 2 {
            return Err(FeedError::Malformed(format!("expected 2 prices, got {}", prices.len())));
        }
        let parse = |s: &str| {
            s.parse::<f64>()
                .map_err(|_| FeedError::Malformed(format!("bad outcome price: {s:?}")))
        };

        let (up, down) = self.up_down_indices(prices.len());
        Ok((parse(&prices[up])?, parse(&prices[down])?))
    }
}

/// Accept a JSON array or a JSON string holding an array, of strings or numbers.
fn string_list(value: &serde_json::Value) -> FeedResult<Vec<String>> {
    let array = match value {
        serde_json::Value::String(s) => serde_json::from_str::<serde_json::Value>(s)?,
        other => other.clone(),
    };
    let items = array
        .as_array()
        .ok_or_else(|| FeedError::Malformed(format!("expected a list, got {array}")))?;
    Ok(items
        .iter()
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_slug_15m() {
        let now = Utc.timestamp_opt(1_768_502_700 + 123, 0).unwrap();
        assert_eq!(
            MarketDiscovery::slug_at(Asset::ETH, Timeframe::FifteenMin, now),
            "eth-updown-15m-1768502700"
        );
    }

    #[test]
    fn test_slug_4h_aligned_to_one_am() {
        // 2026-01-15 00:30 UTC belongs to the window starting 2026-01-14 21:00 UTC.
        let now = at(2026, 1, 15, 0, 30);
        let expected = at(2026, 1, 14, 21, 0).timestamp();
        assert_eq!(
            MarketDiscovery::slug_at(Asset::BTC, Timeframe::FourHour, now),
            format!("btc-updown-4h-{expected}")
        );
    }

    #[test]
    fn test_dst_window_2026() {
        let (start, end) = dst_window(2026);
        assert_eq!(start, at(2026, 3, 8, 2, 0));
        assert_eq!(end, at(2026, 11, 1, 6, 0));
    }

    #[test]
    fn test_eastern_offset_switches() {
        // Winter: UTC-5.
        assert_eq!(eastern_time(at(2026, 1, 10, 17, 0)).hour(), 12);
        // Summer: UTC-4.
        assert_eq!(eastern_time(at(2026, 7, 10, 17, 0)).hour(), 13);
        // Boundary instant belongs to DST.
        assert_eq!(eastern_time(at(2026, 3, 8, 2, 0)).hour(), 22);
        assert_eq!(eastern_time(at(2026, 3, 8, 1, 59)).hour(), 20);
    }

    #[test]
    fn test_slug_1h() {
        // 2026-07-10 17:20 UTC = 1pm ET
        let now = at(2026, 7, 10, 17, 20);
        assert_eq!(
            MarketDiscovery::slug_at(Asset::BTC, Timeframe::OneHour, now),
            "bitcoin-up-or-down-july-10-1pm-et"
        );
    }

    #[test]
    fn test_slug_daily_rolls_after_noon() {
        // 15:00 UTC in January = 10am ET, still today's market.
        let morning = at(2026, 1, 31, 15, 0);
        assert_eq!(
            MarketDiscovery::slug_at(Asset::SOL, Timeframe::Daily, morning),
            "solana-up-or-down-on-january-31"
        );
        // 18:00 UTC = 1pm ET, tomorrow's market (and the month rolls).
        let afternoon = at(2026, 1, 31, 18, 0);
        assert_eq!(
            MarketDiscovery::slug_at(Asset::SOL, Timeframe::Daily, afternoon),
            "solana-up-or-down-on-february-1"
        );
    }

    #[test]
    fn test_to_12h() {
        assert_eq!(to_12h(0), "12am");
        assert_eq!(to_12h(9), "9am");
        assert_eq!(to_12h(12), "12pm");
        assert_eq!(to_12h(23), "11pm");
    }

    #[test]
    fn test_token_pair_follows_outcomes() {
        let market: GammaMarket = serde_json::from_str(
            r#"{"clobTokenIds":"[\"111\", \"222\"]","outcomes":"[\"Down\", \"Up\"]","outcomePrices":"[\"0.4\", \"0.6\"]"}"#,
        )
        .unwrap();
        let pair = market.token_pair().unwrap();
        assert_eq!(pair.up, "222");
        assert_eq!(pair.down, "111");
    }

    #[test]
    fn test_outcome_prices_follow_outcomes() {
        let market: GammaMarket = serde_json::from_str(
            r#"{"clobTokenIds":"[\"111\", \"222\"]","outcomes":"[\"Down\", \"Up\"]","outcomePrices":"[\"0.4\", \"0.6\"]"}"#,
        )
        .unwrap();
        let pair = market.token_pair().unwrap();
        let (up, down) = market.outcome_prices().unwrap();
        assert_eq!(pair.up, "222");
        assert_eq!(up, 0.6);
        assert_eq!(down, 0.4);
    }

    #[test]
    fn test_token_pair_positional_without_outcomes() {
        let market: GammaMarket =
            serde_json::from_str(r#"{"clobTokenIds":["111","222"]}"#).unwrap();
        let pair = market.token_pair().unwrap();
        assert_eq!((pair.up.as_str(), pair.down.as_str()), ("111", "222"));
    }

    #[test]
    fn test_outcome_prices_parsed_from_string() {
        let market: GammaMarket =
            serde_json::from_str(r#"{"outcomePrices":"[\"0.535\", \"0.465\"]"}"#).unwrap();
        assert_eq!(market.outcome_prices().unwrap(), (0.535, 0.465));
    }

    #[test]
    fn test_event_ticker_must_match_slug() {
        let events: Vec<GammaEvent> = serde_json::from_str(
            r#"[{"ticker":"btc-updown-15m-900","markets":[{"clobTokenIds":"[\"1\",\"2\"]"}]}]"#,
        )
        .unwrap();
        assert!(first_market(events, "btc-updown-15m-1800").is_none());

        let events: Vec<GammaEvent> = serde_json::from_str(
            r#"[{"ticker":"btc-updown-15m-900","markets":[{"clobTokenIds":"[\"1\",\"2\"]"}]}]"#,
        )
        .unwrap();
        assert!(first_market(events, "btc-updown-15m-900").is_some());
    }
}
