pub mod sampler;
pub mod settlement;

use crate::config::BotConfig;
use crate::execution::Executor;
use crate::feeds::oracle::SettlementOracle;
use crate::models::market::{Asset, Side, TokenPair};
use crate::models::position::Account;
use crate::models::state::SharedState;
use crate::strategies::{Strategy, StrategyState};
use chrono::Utc;
use sampler::SnapshotSampler;
use settlement::{Settlement, SettlementStep};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// What the bot loop last did, for the status reporter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BotStatus {
    pub mode: &'static str,
    pub period_start: i64,
    pub snapshots: usize,
    pub last_price_up: Option<f64>,
    pub signal_fired: bool,
    pub open_side: Option<Side>,
    pub settlement_pending: Option<i64>,
    pub wins: u32,
    pub losses: u32,
    pub total_pnl: f64,
}

/// Hub fields one tick needs, copied out so the lock is not held across
/// oracle or order calls.
struct HubView {
    period_start: i64,
    price_up: Option<f64>,
    tokens: Option<TokenPair>,
    strike: Option<f64>,
}

/// The orchestrator: period-change detection, snapshot sampling, signal
/// dispatch and settlement, multiplexed on one fixed tick.
pub struct BotLoop {
    asset: Asset,
    state: SharedState,
    strategy: Box<dyn Strategy>,
    executor: Box<dyn Executor>,
    oracle: Arc<dyn SettlementOracle>,
    strat_state: StrategyState,
    sampler: SnapshotSampler,
    settlement: Settlement,
    last_period: i64,
    status_tx: watch::Sender<BotStatus>,
}

impl BotLoop {
    pub fn new(
        config: &BotConfig,
        state: SharedState,
        strategy: Box<dyn Strategy>,
        executor: Box<dyn Executor>,
        oracle: Arc<dyn SettlementOracle>,
    ) -> Self {
        let (status_tx, _) = watch::channel(BotStatus {
            mode: executor.mode(),
            ..BotStatus::default()
        });

        Self {
            asset: config.asset,
            state,
            strategy,
            executor,
            oracle,
            strat_state: StrategyState::new(),
            sampler: SnapshotSampler::new(config),
            settlement: Settlement::new(config.settlement_grace_secs, config.settlement_timeout_secs),
            last_period: 0,
            status_tx,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BotStatus> {
        self.status_tx.subscribe()
    }

    pub fn strategy_state(&self) -> &StrategyState {
        &self.strat_state
    }

    pub fn account(&self) -> &Account {
        self.executor.account()
    }

    pub fn pending_settlement(&self) -> Option<i64> {
        self.settlement.pending()
    }

    /// One pass of the loop at wall-clock `now` (epoch seconds).
    pub async fn tick(&mut self, now: f64) {
        let hub = {
            let s = self.state.read().await;
            HubView {
                period_start: s.period_start_ts,
                price_up: s.pm_up_price,
                tokens: s.token_pair(),
                strike: s.strike,
            }
        };

        if hub.period_start > 0 && hub.period_start != self.last_period {
            self.on_new_period(&hub);
        }

        self.poll_settlement(now).await;

        if hub.period_start <= 0 {
            self.publish_status();
            return;
        }

        let minute = (now - hub.period_start as f64) / 60.0;
        if let Some(price) = self.sampler.sample(minute, hub.price_up) {
            self.strat_state.add_snapshot(minute, price);
        }

        if !self.strat_state.signal_fired {
            self.dispatch(&hub).await;
        }

        self.publish_status();
    }

    fn on_new_period(&mut self, hub: &HubView) {
        // The position belongs to the period that just ended.
        if self.last_period > 0 && self.executor.account().current_side().is_some() {
            self.settlement.begin(self.last_period);
        }

        self.strat_state.reset(hub.period_start);
        self.sampler.reset();
        self.last_period = hub.period_start;

        info!(
            "[BOT] new period: {} | strike={}",
            hub.period_start,
            hub.strike.map_or("?".to_string(), |k| format!("${k:.2}"))
        );
    }

    async fn poll_settlement(&mut self, now: f64) {
        let step = self
            .settlement
            .poll(now, self.asset, self.oracle.as_ref(), self.executor.as_mut())
            .await;

        let account = self.executor.account();
        match step {
            SettlementStep::Idle | SettlementStep::Waiting => {}
            SettlementStep::Resolved {
                period_start,
                outcome,
                trade,
            } => {
                let pnl = trade.as_ref().and_then(|t| t.pnl).unwrap_or(0.0);
                info!(
                    "[BOT] settlement {period_start}: {outcome:?} (${pnl:+.2}) | cumulative: ${:+.2} | {}W/{}L ({:.0}%)",
                    account.total_pnl,
                    account.wins,
                    account.losses,
                    account.win_rate() * 100.0
                );
            }
            SettlementStep::Abandoned { period_start, .. } => {
                warn!("[BOT] settlement timeout for period {period_start}, position cancelled");
            }
        }
    }

    async fn dispatch(&mut self, hub: &HubView) {
        let Some(signal) = self.strategy.evaluate(&self.strat_state) else {
            return;
        };
        // One signal per period, whether or not it can be executed.
        self.strat_state.signal_fired = true;

        info!(
            "[BOT] SIGNAL: {} → {} @ {:.3} | {}",
            signal.kind, signal.side, signal.entry_price, signal.confidence
        );

        let Some(tokens) = &hub.tokens else {
            warn!("[BOT] no PM token ids, signal skipped");
            return;
        };

        match self.executor.execute(&signal, &tokens.up, &tokens.down).await {
            Ok(trade) => info!(
                "[BOT] trade logged: {:?} | {} @ {:.3} | ${:.2}",
                trade.status, trade.side, trade.entry_price, trade.size_usd
            ),
            Err(e) => warn!("[BOT] execution failed: {e}"),
        }
    }

    fn publish_status(&self) {
        let account = self.executor.account();
        self.status_tx.send_replace(BotStatus {
            mode: self.executor.mode(),
            period_start: self.last_period,
            snapshots: self.strat_state.snapshots.len(),
            last_price_up: self.strat_state.latest().map(|s| s.price_up),
            signal_fired: self.strat_state.signal_fired,
            open_side: account.current_side(),
            settlement_pending: self.settlement.pending(),
            wins: account.wins,
            losses: account.losses,
            total_pnl: account.total_pnl,
        });
    }

    /// Tick every `tick` after a `warmup` delay, until shutdown.
    pub async fn run(mut self, warmup: Duration, tick: Duration, mut shutdown: broadcast::Receiver<()>) {
        tokio::select! {
            _ = tokio::time::sleep(warmup) => {}
            _ = shutdown.recv() => return,
        }
        info!("[BOT] strategy loop started ({})", self.strategy.name());

        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now().timestamp_millis() as f64 / 1000.0;
                    self.tick(now).await;
                }
                _ = shutdown.recv() => {
                    info!("[BOT] shutdown");
                    break;
                }
            }
        }
    }
}
