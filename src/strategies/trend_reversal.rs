use crate::config::StrategyConfig;
use crate::models::market::Side;
use crate::models::signal::{Confidence, Signal, SignalKind};
use crate::strategies::{Strategy, StrategyState};
use tracing::debug;

/// Maker-only 15m strategy with two entries, checked in this order:
///
///   REVERSAL       the leader flipped between minute 5 and the decision window
///   TREND_CONFIRM  the leader is ≥0.60 and has been leading, and rising, since minute 4
///
/// Fires only in the window `[decision_minute, last_entry_minute]`.
pub struct TrendReversal {
    config: StrategyConfig,
}

/// Side whose contract is above even money.
fn leader(price_up: f64) -> Option<Side> {
    if price_up > 0.5 {
        Some(Side::Up)
    } else if price_up < 0.5 {
        Some(Side::Down)
    } else {
        None
    }
}

impl TrendReversal {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    fn reversal(&self, state: &StrategyState, side: Side, price_up: f64) -> Option<Signal> {
        let anchor = state.nearest(self.config.reversal_anchor_minute, self.config.anchor_tolerance)?;
        if leader(anchor.price_up)? == side {
            return None;
        }

        let swing = (price_up - anchor.price_up).abs();
        let confidence = if swing >= self.config.strong_swing {
            Confidence::Medium
        } else {
            Confidence::Low
        };
        Some(Signal {
            kind: SignalKind::Reversal,
            side,
            entry_price: side.price_from_up(price_up),
            confidence,
        })
    }

    fn trend_confirm(&self, state: &StrategyState, side: Side, price_up: f64) -> Option<Signal> {
        let price = side.price_from_up(price_up);
        if price < self.config.confirm_min_price {
            return None;
        }

        let anchor = state.nearest(self.config.trend_anchor_minute, self.config.anchor_tolerance)?;
        if leader(anchor.price_up)? != side || price <= side.price_from_up(anchor.price_up) {
            return None;
        }

        let confidence = if price >= self.config.high_confidence_price {
            Confidence::High
        } else {
            Confidence::Medium
        };
        Some(Signal {
            kind: SignalKind::TrendConfirm,
            side,
            entry_price: price,
            confidence,
        })
    }
}

impl Strategy for TrendReversal {
    fn name(&self) -> &'static str {
        "trend_reversal"
    }

    fn evaluate(&self, state: &StrategyState) -> Option<Signal> {
        let latest = state.latest()?;
        if latest.minute < self.config.decision_minute || latest.minute > self.config.last_entry_minute {
            return None;
        }
        let side = leader(latest.price_up)?;

        let signal = self
            .reversal(state, side, latest.price_up)
            .or_else(|| self.trend_confirm(state, side, latest.price_up))?;

        if signal.entry_price > self.config.max_entry_price {
            debug!(
                "{} {} @ {:.3} above max entry, skipped",
                signal.kind, signal.side, signal.entry_price
            );
            return None;
        }
        Some(signal)
    }
}
