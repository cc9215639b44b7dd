use updown15::bot::BotLoop;
use updown15::config::Config;
use updown15::execution::live::LiveExecutor;
use updown15::execution::paper::PaperExecutor;
use updown15::execution::Executor;
use updown15::feeds::binance::BinanceFeed;
use updown15::feeds::market_discovery::{GammaClient, MarketDiscovery};
use updown15::feeds::oracle::PastResultsClient;
use updown15::feeds::period::PeriodTracker;
use updown15::feeds::polymarket::PolymarketFeed;
use updown15::models::position::PayoutModel;
use updown15::models::state::{shared, MarketState};
use updown15::strategies::trend_reversal::TrendReversal;
use updown15::telemetry::{self, status::StatusReporter};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default();
    telemetry::init_tracing(&config.telemetry.log_level, config.telemetry.json_logs);

    if let Err(e) = config.validate() {
        error!("Config validation failed: {e:#}");
        return Err(e);
    }

    let asset = config.bot.asset;
    let timeframe = config.bot.timeframe;

    info!("================================================");
    info!("  {} {} Up/Down bot [{}]", asset.long_name(), timeframe.kline_interval(), config.mode_label());
    info!("  size=${:.2} tick={}s", config.bot.size_usd, config.bot.tick_secs);
    info!("  slug: {}", MarketDiscovery::current_slug(asset, timeframe));
    info!("================================================");

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let state = shared(MarketState::new());

    let binance = BinanceFeed::new(config.binance.clone(), asset, timeframe, state.clone());
    if let Err(e) = binance.bootstrap().await {
        warn!("[Binance] kline bootstrap failed: {e}");
    }
    binance.start(&shutdown_tx);

    let oracle = Arc::new(PastResultsClient::new(config.polymarket.past_results_url.clone(), timeframe));
    let gamma = Arc::new(GammaClient::new(config.polymarket.gamma_events_url.clone()));
    PeriodTracker::new(asset, timeframe, state.clone(), oracle.clone(), gamma).spawn(&shutdown_tx);

    PolymarketFeed::new(
        config.polymarket.clone(),
        asset,
        timeframe,
        config.bot.poll_band,
        state.clone(),
    )
    .start(&shutdown_tx);

    let payout = PayoutModel {
        fee_rate: config.bot.fee_rate,
    };
    let executor: Box<dyn Executor> = if config.bot.live {
        Box::new(LiveExecutor::connect(&config.polymarket, config.bot.size_usd, payout).await?)
    } else {
        Box::new(PaperExecutor::new(config.bot.size_usd, payout))
    };

    let bot = BotLoop::new(
        &config.bot,
        state.clone(),
        Box::new(TrendReversal::new(config.strategy.clone())),
        executor,
        oracle,
    );
    StatusReporter::new(state, bot.subscribe_status(), config.telemetry.heartbeat_secs).spawn(&shutdown_tx);

    let bot_task = tokio::spawn(bot.run(
        Duration::from_secs(config.bot.warmup_secs),
        Duration::from_secs(config.bot.tick_secs),
        shutdown_tx.subscribe(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    let _ = shutdown_tx.send(());
    if let Err(e) = bot_task.await {
        error!("bot loop ended abnormally: {e}");
    }

    Ok(())
}
