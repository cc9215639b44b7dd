use crate::bot::BotStatus;
use crate::models::state::{MarketState, SharedState};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Headless status line: a heartbeat on a fixed cadence and a recap of
/// each finished period. Read-only over the hub and the bot status.
pub struct StatusReporter {
    state: SharedState,
    status_rx: watch::Receiver<BotStatus>,
    heartbeat: Duration,
}

impl StatusReporter {
    pub fn new(state: SharedState, status_rx: watch::Receiver<BotStatus>, heartbeat_secs: u64) -> Self {
        Self {
            state,
            status_rx,
            heartbeat: Duration::from_secs(heartbeat_secs.max(1)),
        }
    }

    pub fn spawn(mut self, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.heartbeat);
            interval.tick().await;
            let mut last = self.status_rx.borrow().clone();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let status = self.status_rx.borrow().clone();
                        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
                        let line = heartbeat_line(&*self.state.read().await, &status, now);
                        info!("{line}");
                    }
                    changed = self.status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let status = self.status_rx.borrow_and_update().clone();
                        if status.period_start != last.period_start && last.period_start > 0 {
                            info!("{}", period_recap(&last));
                        }
                        last = status;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
}

pub fn heartbeat_line(state: &MarketState, status: &BotStatus, now: f64) -> String {
    let minute = state
        .minute_into_period(now)
        .map_or("-".to_string(), |m| format!("{m:.1}"));
    let price = |p: Option<f64>| p.map_or("-".to_string(), |p| format!("{p:.3}"));
    let open = status.open_side.map_or("flat".to_string(), |s| s.to_string());

    format!(
        "[{}] min={minute} mid={:.2} strike={} up={} down={} snaps={} fired={} pos={open} pnl=${:+.2} {}W/{}L",
        status.mode,
        state.mid,
        state.strike.map_or("?".to_string(), |k| format!("{k:.2}")),
        price(state.pm_up_price),
        price(state.pm_down_price),
        status.snapshots,
        status.signal_fired,
        status.total_pnl,
        status.wins,
        status.losses,
    )
}

pub fn period_recap(status: &BotStatus) -> String {
    format!(
        "[STATUS] period {} closed: {} snapshots, signal={}, last up={}",
        status.period_start,
        status.snapshots,
        if status.signal_fired { "yes" } else { "no" },
        status.last_price_up.map_or("-".to_string(), |p| format!("{p:.3}")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::market::Side;

    #[test]
    fn test_heartbeat_before_any_period() {
        let line = heartbeat_line(&MarketState::new(), &BotStatus::default(), 1000.0);
        assert!(line.contains("min=-"));
        assert!(line.contains("pos=flat"));
    }

    #[test]
    fn test_heartbeat_with_position() {
        let mut state = MarketState::new();
        state.begin_period(900, Some(97_000.0), true, None);
        let status = BotStatus {
            mode: "PAPER",
            open_side: Some(Side::Up),
            total_pnl: 4.5,
            wins: 1,
            ..BotStatus::default()
        };
        let line = heartbeat_line(&state, &status, 900.0 + 300.0);
        assert!(line.starts_with("[PAPER] min=5.0"));
        assert!(line.contains("pos=Up"));
        assert!(line.contains("pnl=$+4.50 1W/0L"));
    }
}
