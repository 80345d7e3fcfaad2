//! Shared test fixtures for twin_core and downstream crates.
//!
//! `station_profile()` is a small deterministic station: two one-second
//! stages at 30 ppm, one simulated second per tick, no alarms and no quality
//! checks. `two_station_line()` chains a cleaning and a packing station.

use crate::{
    AlarmPrecedence, Constants, EnergyProfile, LineDef, LineId, LineOrchestrator, MetricSpec,
    PhaseDwell, PlantContent, StationProfile, UnitType, WallMillis, WorkMode,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use smallvec::smallvec;

pub const TICK_MS: u64 = 1_000;

pub fn make_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(42)
}

/// Dispatcher clock that only moves when told to.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualClock {
    now_ms: WallMillis,
}

impl ManualClock {
    pub fn now(&self) -> WallMillis {
        self.now_ms
    }

    /// Advance by one tick interval and return the new time.
    pub fn advance(&mut self) -> WallMillis {
        self.advance_by(TICK_MS)
    }

    pub fn advance_by(&mut self, ms: u64) -> WallMillis {
        self.now_ms += ms;
        self.now_ms
    }
}

pub fn station_profile(name: &str, line: &str, sequence: u32, unit_type: UnitType) -> StationProfile {
    StationProfile {
        name: name.to_string(),
        unit_type,
        line_id: LineId(line.to_string()),
        sequence,
        equipment_code: format!("EQ-{name}"),
        process_id: format!("P{sequence:02}"),
        units_per_cycle: 1,
        nominal_ppm: 30.0,
        stage_durations_s: smallvec![1.0, 1.0],
        sim_seconds_per_tick: 1.0,
        energy: EnergyProfile {
            idle_kw: 1.0,
            idle_variance: 0.0,
            active_kw: 10.0,
            active_variance: 0.05,
        },
        metrics: vec![MetricSpec {
            name: "temperature".to_string(),
            unit: "C".to_string(),
            nominal: 50.0,
            spread: 1.0,
            idle: Some(25.0),
        }],
        quality_checks: Vec::new(),
        alarms: Vec::new(),
        work_mode: WorkMode::Discrete,
        dwell: PhaseDwell::default(),
        manual_batch_qty: 3,
        last_maintenance: "2026-01-01T00:00:00Z".to_string(),
        sampler: None,
    }
}

pub fn two_station_def() -> LineDef {
    LineDef {
        id: LineId("L1".to_string()),
        stations: vec![
            station_profile("L1_CLN01", "L1", 1, UnitType::Cleaning),
            station_profile("L1_PCK02", "L1", 2, UnitType::Packing),
        ],
    }
}

pub fn two_station_line() -> LineOrchestrator {
    LineOrchestrator::new(two_station_def(), AlarmPrecedence::default())
}

pub fn base_constants() -> Constants {
    Constants {
        tick_interval_ms: TICK_MS,
        sim_seconds_per_tick: 1.0,
        dwell: PhaseDwell::default(),
        alarm_precedence: AlarmPrecedence::default(),
        env_probe_interval_ms: 5_000,
        env_nominal_temperature_c: 22.0,
        env_nominal_humidity_pct: 45.0,
    }
}

pub fn base_content() -> PlantContent {
    PlantContent {
        content_version: "test".to_string(),
        lines: vec![two_station_def()],
        constants: base_constants(),
    }
}
