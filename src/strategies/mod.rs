pub mod trend_reversal;

use crate::models::signal::Signal;
use serde::{Deserialize, Serialize};

/// One sample of the Up contract's price within a period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Minutes since period start.
    pub minute: f64,
    pub price_up: f64,
}

/// Per-period input to a [`Strategy`]: the snapshot sequence and the
/// fired latch. Both are cleared on every period change.
#[derive(Debug, Clone, Default)]
pub struct StrategyState {
    pub period_start: i64,
    pub snapshots: Vec<Snapshot>,
    pub signal_fired: bool,
}

impl StrategyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, period_start: i64) {
        self.period_start = period_start;
        self.snapshots.clear();
        self.signal_fired = false;
    }

    pub fn add_snapshot(&mut self, minute: f64, price_up: f64) {
        self.snapshots.push(Snapshot { minute, price_up });
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Snapshot closest to `minute`, within `tolerance`, taken strictly before
    /// the latest one.
    pub fn nearest(&self, minute: f64, tolerance: f64) -> Option<&Snapshot> {
        let latest = self.latest()?.minute;
        self.snapshots
            .iter()
            .filter(|s| s.minute < latest && (s.minute - minute).abs() <= tolerance)
            .min_by(|a, b| (a.minute - minute).abs().total_cmp(&(b.minute - minute).abs()))
    }
}

/// A decision rule over one period's snapshots.
///
/// Must depend on nothing but `state.snapshots`; the caller latches after
/// the first signal, so implementations never see a period twice.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, state: &StrategyState) -> Option<Signal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_snapshots_and_latch() {
        let mut s = StrategyState::new();
        s.reset(900);
        s.add_snapshot(4.0, 0.5);
        s.signal_fired = true;

        s.reset(1800);
        assert_eq!(s.period_start, 1800);
        assert!(s.snapshots.is_empty());
        assert!(!s.signal_fired);
    }

    #[test]
    fn test_nearest_excludes_latest() {
        let mut s = StrategyState::new();
        s.add_snapshot(3.6, 0.5);
        s.add_snapshot(4.4, 0.52);
        s.add_snapshot(5.1, 0.55);
        assert_eq!(s.nearest(4.0, 1.5).map(|x| x.minute), Some(3.6));
        assert_eq!(s.nearest(5.0, 1.5).map(|x| x.minute), Some(4.4));
        assert!(s.nearest(9.0, 1.5).is_none());
    }
}
