use crate::config::BotConfig;
use crate::models::state::PriceBand;

/// Decides when the Up price is recorded as a strategy snapshot.
///
/// Samples only inside `[min_minute, max_minute]`, at least `spacing`
/// minutes apart, and only while the price sits in the sane band.
#[derive(Debug, Clone)]
pub struct SnapshotSampler {
    min_minute: f64,
    max_minute: f64,
    spacing: f64,
    band: PriceBand,
    last_minute: Option<f64>,
}

impl SnapshotSampler {
    pub fn new(config: &BotConfig) -> Self {
        Self {
            min_minute: config.min_snapshot_minute,
            max_minute: config.max_snapshot_minute,
            spacing: config.snapshot_spacing_minutes,
            band: config.sane_band,
            last_minute: None,
        }
    }

    pub fn reset(&mut self) {
        self.last_minute = None;
    }

    /// `Some(price)` when this tick should produce a snapshot.
    pub fn sample(&mut self, minute: f64, price_up: Option<f64>) -> Option<f64> {
        if minute < self.min_minute || minute > self.max_minute {
            return None;
        }
        if self.last_minute.is_some_and(|last| minute - last < self.spacing) {
            return None;
        }
        let price = price_up.filter(|p| self.band.contains(*p))?;
        self.last_minute = Some(minute);
        Some(price)
    }
}
