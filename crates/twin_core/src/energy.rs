//! Energy integration: power draw over simulated time.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::EnergyProfile;

const SECONDS_PER_HOUR: f64 = 3_600.0;

/// Running energy counter for one station, in kWh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnergyMeter {
    pub total_kwh: f64,
}

impl EnergyMeter {
    /// `energy += rate(phase) * dt * (1 ± variance)`. Returns the increment.
    pub fn accumulate(
        &mut self,
        profile: &EnergyProfile,
        active: bool,
        dt_sim_s: f64,
        rng: &mut impl Rng,
    ) -> f64 {
        let (rate_kw, variance) = if active {
            (profile.active_kw, profile.active_variance)
        } else {
            (profile.idle_kw, profile.idle_variance)
        };
        let variance = variance.abs().min(1.0);
        let factor = if variance > 0.0 {
            1.0 + rng.gen_range(-variance..=variance)
        } else {
            1.0
        };
        let delta = (rate_kw * dt_sim_s.max(0.0) * factor / SECONDS_PER_HOUR).max(0.0);
        self.total_kwh += delta;
        delta
    }

    pub fn reset(&mut self) {
        self.total_kwh = 0.0;
    }
}
