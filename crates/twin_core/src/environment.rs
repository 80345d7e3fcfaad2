//! Ambient shop-floor readings published on an independent timer.

use rand::Rng;
use serde::Serialize;

use crate::sampler::round3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvironmentReading {
    pub temperature_c: f64,
    pub humidity_pct: f64,
}

/// Mean-reverting random walk around a nominal climate.
#[derive(Debug, Clone)]
pub struct EnvironmentSensor {
    nominal: EnvironmentReading,
    current: EnvironmentReading,
}

/// Fraction of the distance to nominal recovered per sample.
const REVERSION: f64 = 0.1;

impl EnvironmentSensor {
    pub fn new(temperature_c: f64, humidity_pct: f64) -> Self {
        let nominal = EnvironmentReading {
            temperature_c,
            humidity_pct,
        };
        Self {
            nominal,
            current: nominal,
        }
    }

    pub fn current(&self) -> EnvironmentReading {
        self.current
    }

    pub fn sample(&mut self, rng: &mut impl Rng) -> EnvironmentReading {
        let t = self.current.temperature_c;
        let h = self.current.humidity_pct;
        let t = t + (self.nominal.temperature_c - t) * REVERSION + rng.gen_range(-0.2..=0.2);
        let h = h + (self.nominal.humidity_pct - h) * REVERSION + rng.gen_range(-0.5..=0.5);
        self.current = EnvironmentReading {
            temperature_c: round3(t),
            humidity_pct: round3(h.clamp(0.0, 100.0)),
        };
        self.current
    }
}
