//! EXECUTE: the staged production cycle.

use rand::Rng;

use super::{StationEngine, StepContext};
use crate::sampler::sample_metrics;
use crate::{generate_tray_id, Event, Phase, Serial, WorkMode};

impl StationEngine {
    pub(super) fn step_execute(&mut self, ctx: &mut StepContext<'_>, rng: &mut impl Rng, wall_dt: u64) {
        let dt_sim = self.profile.sim_seconds_per_tick;
        self.state
            .energy
            .accumulate(&self.profile.energy, true, dt_sim, rng);

        if self.state.serial.is_none() && !self.needs_more_work() {
            // Order consumed upstream of any completion handshake here.
            self.state.pool = None;
            self.transition(Phase::Idle, ctx);
            return;
        }

        if self.state.serial.is_none() && !self.acquire_next(rng) {
            self.state.downtime_ms += wall_dt;
            return;
        }

        self.state.uptime_ms += wall_dt;
        self.state.running_sim_s += dt_sim;
        self.advance_stages(dt_sim, ctx, rng);
    }

    fn advance_stages(&mut self, dt_sim: f64, ctx: &mut StepContext<'_>, rng: &mut impl Rng) {
        self.state.stage_elapsed_s += dt_sim;
        self.state.time_in_cycle_s += dt_sim;
        let stages = self.profile.stage_durations_s.len();

        loop {
            let duration = self.stage_duration(self.state.stage_index);
            if self.state.stage_elapsed_s < duration {
                return;
            }
            self.state.stage_elapsed_s -= duration;
            self.state.stage_index += 1;
            if self.state.stage_index < stages {
                continue;
            }

            self.conclude_cycle(ctx, rng);
            if !self.needs_more_work() {
                self.state.stage_elapsed_s = 0.0;
                self.state.time_in_cycle_s = 0.0;
                self.transition(Phase::Completing, ctx);
                return;
            }
            if !self.acquire_next(rng) {
                self.state.stage_elapsed_s = 0.0;
                self.state.time_in_cycle_s = 0.0;
                return;
            }
            // Leftover simulated time carries into the next work-item.
            self.state.time_in_cycle_s = self.state.stage_elapsed_s;
        }
    }

    /// Stage length scaled by the order's throughput relative to nominal.
    fn stage_duration(&self, index: usize) -> f64 {
        let base = self
            .profile
            .stage_durations_s
            .get(index)
            .copied()
            .unwrap_or(0.0);
        base * self.speed_scale()
    }

    pub(super) fn speed_scale(&self) -> f64 {
        let ppm = self.state.order.as_ref().map_or(0.0, |o| o.ppm);
        if ppm > 0.0 && self.profile.nominal_ppm > 0.0 {
            self.profile.nominal_ppm / ppm
        } else {
            1.0
        }
    }

    fn needs_more_work(&self) -> bool {
        self.state
            .order
            .as_ref()
            .is_some_and(|o| self.state.counters.produced < o.target_qty)
    }

    /// Pull the next work-item: the order pool first, then the upstream
    /// handoff queue. Aggregate stations never starve.
    fn acquire_next(&mut self, rng: &mut impl Rng) -> bool {
        let next = match self.profile.work_mode {
            WorkMode::Aggregate => Some(Serial::empty()),
            WorkMode::Discrete => match self.state.pool.as_mut() {
                Some(pool) => pool.draw(),
                None => self.state.inbox.pop_front(),
            },
        };
        let Some(serial) = next else {
            return false;
        };
        self.state.serial = Some(serial);
        self.state.tray_id = Some(generate_tray_id(rng).to_string());
        self.state.stage_index = 0;
        true
    }

    fn conclude_cycle(&mut self, ctx: &mut StepContext<'_>, rng: &mut impl Rng) {
        let serial = self.state.serial.take().unwrap_or_default();
        let sampled = sample_metrics(&self.profile.metrics, self.sampler, rng);
        let verdict = super::classify(&self.profile.quality_checks, &sampled);
        let ok = verdict.is_ok();

        let units = u64::from(self.profile.units_per_cycle.max(1));
        let counters = &mut self.state.counters;
        counters.produced += units;
        if ok {
            counters.ok += units;
        } else {
            counters.ng += units;
            *counters.ng_by_type.entry(verdict.ng_type).or_default() += units;
        }
        let (produced, ok_total, ng_total) = (counters.produced, counters.ok, counters.ng);

        self.state.metrics = sampled;
        self.state.last_serial_ok = ok;
        self.state.last_ng_type = verdict.ng_type;
        self.state.stage_index = 0;

        if let Some(cause) = &verdict.cause {
            tracing::debug!(station = %self.id, serial = %serial, ng_type = verdict.ng_type, cause = %cause, "work-item rejected");
        }
        ctx.emit(Event::CycleConcluded {
            station_id: self.id.clone(),
            serial: serial.clone(),
            ok,
            ng_type: verdict.ng_type,
        });
        ctx.emit(Event::Produced {
            station_id: self.id.clone(),
            produced,
            ok: ok_total,
            ng: ng_total,
        });
        // Every unit leaves on its own so the next station has one work-item
        // per unit credited here.
        for serial in unit_serials(&serial, units) {
            ctx.emit(Event::WorkItemReleased {
                station_id: self.id.clone(),
                serial,
            });
        }
    }
}

/// Serials for the units of one cycle: the carrier itself for a single unit,
/// `<serial>.<n>` for a multi-unit carrier, empty for anonymous units.
fn unit_serials(carrier: &Serial, units: u64) -> Vec<Serial> {
    if carrier.is_empty() {
        return vec![Serial::empty(); usize::try_from(units).unwrap_or(usize::MAX)];
    }
    if units == 1 {
        return vec![carrier.clone()];
    }
    (1..=units)
        .map(|n| Serial(format!("{carrier}.{n}")))
        .collect()
}
