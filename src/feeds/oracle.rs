//! Period reference prices and settlement results from Polymarket's
//! past-results endpoint (Chainlink-backed for the 15m crypto markets).

use crate::error::{check_status, FeedError, FeedResult};
use crate::models::market::{Asset, Outcome, Timeframe, PERIOD_SECS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Reference ("price to beat") for a period.
#[async_trait]
pub trait StrikeOracle: Send + Sync {
    async fn strike(&self, asset: Asset, period_start: i64) -> FeedResult<f64>;
}

/// Resolved result of a period. `None` while the oracle has not published.
#[async_trait]
pub trait SettlementOracle: Send + Sync {
    async fn period_outcome(&self, asset: Asset, period_start: i64) -> Option<Outcome>;
}

#[derive(Clone)]
pub struct PastResultsClient {
    http: reqwest::Client,
    url: String,
    timeframe: Timeframe,
}

impl PastResultsClient {
    pub fn new(url: impl Into<String>, timeframe: Timeframe) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("Mozilla/5.0")
            .build()
            .unwrap_or_default();
        Self {
            http,
            url: url.into(),
            timeframe,
        }
    }

    /// Results the endpoint lists for an event starting at `event_start`.
    pub async fn fetch_results(&self, asset: Asset, event_start: i64) -> FeedResult<Vec<PastResult>> {
        let variant = self
            .timeframe
            .oracle_variant()
            .ok_or(FeedError::Malformed("no oracle variant for this timeframe".into()))?;
        let start = iso_seconds(event_start);

        let resp = self
            .http
            .get(&self.url)
            .query(&[
                ("symbol", asset.oracle_symbol()),
                ("variant", variant),
                ("assetType", "crypto"),
                ("currentEventStartTime", start.as_str()),
            ])
            .send()
            .await?;
        let body: PastResultsResponse = check_status(resp).await?.json().await?;
        Ok(body.data.map(|d| d.results).unwrap_or_default())
    }
}

#[async_trait]
impl StrikeOracle for PastResultsClient {
    async fn strike(&self, asset: Asset, period_start: i64) -> FeedResult<f64> {
        let results = self.fetch_results(asset, period_start).await?;
        strike_from_results(&results, period_start)
            .ok_or(FeedError::Malformed(format!("no strike for period {period_start}")))
    }
}

#[async_trait]
impl SettlementOracle for PastResultsClient {
    async fn period_outcome(&self, asset: Asset, period_start: i64) -> Option<Outcome> {
        // A period's own result is listed once the following period has started.
        match self.fetch_results(asset, period_start + PERIOD_SECS).await {
            Ok(results) => outcome_from_results(&results, period_start),
            Err(e) => {
                debug!("[Oracle] outcome query for {period_start} failed: {e}");
                None
            }
        }
    }
}

/// `2026-01-15T18:45:00Z`
pub fn iso_seconds(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Prefix shared by every spelling of `ts` the endpoint uses
/// (`...:00Z`, `...:00.000Z`).
fn iso_prefix(ts: i64) -> String {
    iso_seconds(ts).trim_end_matches('Z').to_string()
}

/// The previous period's close is this period's open. Prefer it when the
/// last result ends exactly at `period_start`, then a result starting at
/// `period_start`, then the last close as a best guess.
pub fn strike_from_results(results: &[PastResult], period_start: i64) -> Option<f64> {
    let last = results.last()?;
    let prefix = iso_prefix(period_start);

    if last.end_time.as_deref().is_some_and(|t| t.starts_with(&prefix)) {
        if let Some(close) = last.close_price {
            return Some(close);
        }
    }

    if let Some(open) = results
        .iter()
        .find(|r| r.start_time.as_deref().is_some_and(|t| t.starts_with(&prefix)))
        .and_then(|r| r.open_price)
    {
        return Some(open);
    }

    last.close_price
}

pub fn outcome_from_results(results: &[PastResult], period_start: i64) -> Option<Outcome> {
    let prefix = iso_prefix(period_start);
    results
        .iter()
        .find(|r| r.start_time.as_deref().is_some_and(|t| t.starts_with(&prefix)))
        .and_then(|r| r.outcome.as_deref())
        .and_then(Outcome::parse)
}

// --- past-results response types ---

#[derive(Debug, Deserialize)]
struct PastResultsResponse {
    data: Option<PastResultsData>,
}

#[derive(Debug, Deserialize)]
struct PastResultsData {
    #[serde(default)]
    results: Vec<PastResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastResult {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub open_price: Option<f64>,
    pub close_price: Option<f64>,
    pub outcome: Option<String>,
}
