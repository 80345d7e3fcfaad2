mod execute;
mod quality;
mod telemetry;

use crate::alarms::{AlarmScheduler, AlarmTransition};
use crate::sampler::{drift, sampler_for, MetricSampler};
use crate::{
    AlarmPrecedence, CommandError, Counters, EnergyMeter, Event, EventEnvelope, Namespace, NgType,
    OrderId, Phase, ProductionCounters, Serial, SerialPool, StationCommand, StationId,
    StationOrder, StationProfile, WallMillis, WorkMode,
};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

pub(crate) use quality::classify;

/// Radians of idle drift per simulated second (one period every ten minutes).
const DRIFT_RATE: f64 = std::f64::consts::TAU / 600.0;

/// Everything a station needs from its surroundings during one step or command.
pub struct StepContext<'a> {
    pub now_ms: WallMillis,
    pub tick: u64,
    pub counters: &'a mut Counters,
    pub events: &'a mut Vec<EventEnvelope>,
    pub namespace: &'a mut Namespace,
}

impl StepContext<'_> {
    pub fn emit(&mut self, event: Event) {
        let envelope = crate::emit(self.counters, self.tick, self.now_ms, event);
        self.events.push(envelope);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunMode {
    /// Driven by the line orchestrator.
    #[default]
    Auto,
    /// Started with a station-level START.
    Manual,
}

impl RunMode {
    fn as_str(self) -> &'static str {
        match self {
            RunMode::Auto => "AUTO",
            RunMode::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StationState {
    pub phase: Phase,
    pub phase_since_ms: WallMillis,
    pub mode: RunMode,
    pub order: Option<StationOrder>,
    /// Index into the profile's stage list for the held work-item.
    pub stage_index: usize,
    /// Simulated seconds accumulated in the current stage.
    pub stage_elapsed_s: f64,
    pub time_in_cycle_s: f64,
    pub serial: Option<Serial>,
    pub tray_id: Option<String>,
    pub counters: ProductionCounters,
    pub last_serial_ok: bool,
    pub last_ng_type: NgType,
    pub awaiting_ack: bool,
    /// ACK received while still verifying; applied on entering COMPLETE.
    pub ack_latched: bool,
    pub metrics: BTreeMap<String, f64>,
    pub energy: EnergyMeter,
    pub uptime_ms: u64,
    pub downtime_ms: u64,
    pub running_sim_s: f64,
    pub last_step_ms: Option<WallMillis>,
    pub drift_angle: f64,
    pub inbox: VecDeque<Serial>,
    pub pool: Option<SerialPool>,
}

/// One simulated station: a data-driven state machine over a [`StationProfile`].
pub struct StationEngine {
    id: StationId,
    profile: StationProfile,
    sampler: MetricSampler,
    alarms: AlarmScheduler,
    state: StationState,
}

impl StationEngine {
    pub fn new(profile: StationProfile, precedence: AlarmPrecedence) -> Self {
        let sampler = sampler_for(profile.unit_type, profile.sampler);
        let alarms = AlarmScheduler::new(profile.alarms.clone(), precedence);
        let metrics = profile
            .metrics
            .iter()
            .map(|m| (m.name.clone(), m.idle.unwrap_or(m.nominal)))
            .collect();
        Self {
            id: profile.id(),
            sampler,
            alarms,
            state: StationState {
                metrics,
                ..StationState::default()
            },
            profile,
        }
    }

    pub fn id(&self) -> &StationId {
        &self.id
    }

    pub fn profile(&self) -> &StationProfile {
        &self.profile
    }

    pub fn state(&self) -> &StationState {
        &self.state
    }

    pub fn alarms(&self) -> &AlarmScheduler {
        &self.alarms
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn awaiting_ack(&self) -> bool {
        self.state.awaiting_ack
    }

    pub fn produced(&self) -> u64 {
        self.state.counters.produced
    }

    /// Accept a work-item handed off by the upstream station.
    pub fn enqueue(&mut self, serial: Serial) {
        self.state.inbox.push_back(serial);
    }

    /// Advance the station by one dispatcher tick.
    pub fn step(&mut self, ctx: &mut StepContext<'_>, rng: &mut impl Rng) {
        let wall_dt = self
            .state
            .last_step_ms
            .map_or(0, |last| ctx.now_ms.saturating_sub(last));
        self.state.last_step_ms = Some(ctx.now_ms);
        let dt_sim = self.profile.sim_seconds_per_tick;
        let dwell = self.profile.dwell;

        match self.state.phase {
            Phase::Idle | Phase::Hold | Phase::Suspend => self.drift(dt_sim, rng),
            Phase::Starting => {
                self.draw_idle_power(dt_sim, rng);
                if self.dwell_elapsed(dwell.starting_ms, ctx.now_ms) {
                    self.transition(Phase::Execute, ctx);
                }
            }
            Phase::Execute => self.step_execute(ctx, rng, wall_dt),
            Phase::Completing => {
                self.draw_idle_power(dt_sim, rng);
                if self.dwell_elapsed(dwell.completing_ms, ctx.now_ms) {
                    self.complete_order(ctx);
                }
            }
            Phase::Complete => self.draw_idle_power(dt_sim, rng),
            Phase::Resetting => {
                self.draw_idle_power(dt_sim, rng);
                if self.dwell_elapsed(dwell.resetting_ms, ctx.now_ms) {
                    self.clear_production();
                    self.state.order = None;
                    self.state.energy.reset();
                    ctx.emit(Event::StationReset {
                        station_id: self.id.clone(),
                    });
                    self.transition(Phase::Idle, ctx);
                }
            }
            Phase::Stopping => {
                self.draw_idle_power(dt_sim, rng);
                if self.dwell_elapsed(dwell.stopping_ms, ctx.now_ms) {
                    self.transition(Phase::Idle, ctx);
                }
            }
        }

        self.evaluate_alarms(ctx, rng);
        self.publish(ctx.namespace);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Station-level command grammar.
    pub fn command(
        &mut self,
        command: StationCommand,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), CommandError> {
        match command {
            StationCommand::Start => {
                let order_id = OrderId(format!("{}-MANUAL", self.profile.name));
                let target_qty = self.profile.manual_batch_qty;
                let pool = (self.profile.work_mode == WorkMode::Discrete).then(|| {
                    let cycles = target_qty.div_ceil(u64::from(self.profile.units_per_cycle.max(1)));
                    SerialPool::new(&order_id.0, cycles)
                });
                let order = StationOrder {
                    order_id,
                    target_qty,
                    ppm: self.profile.nominal_ppm,
                };
                self.start(order, pool, RunMode::Manual, ctx)
            }
            StationCommand::Stop => {
                self.stop(ctx);
                Ok(())
            }
            StationCommand::Reset => self.reset(ctx),
            StationCommand::Hold => self.park(Phase::Hold, command, ctx),
            StationCommand::Suspend => self.park(Phase::Suspend, command, ctx),
            StationCommand::Resume => self.resume(ctx),
        }
    }

    /// IDLE → STARTING for the given order.
    pub fn start(
        &mut self,
        order: StationOrder,
        pool: Option<SerialPool>,
        mode: RunMode,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), CommandError> {
        if self.state.phase != Phase::Idle {
            return Err(self.invalid_phase("START"));
        }
        self.clear_production();
        self.state.order = Some(order);
        self.state.pool = pool;
        self.state.mode = mode;
        self.transition(Phase::Starting, ctx);
        Ok(())
    }

    /// Any phase → STOPPING. The in-flight work-item is dropped uncredited.
    pub fn stop(&mut self, ctx: &mut StepContext<'_>) {
        if self.state.phase == Phase::Stopping {
            return;
        }
        self.abandon_work(ctx);
        self.state.inbox.clear();
        self.state.pool = None;
        self.state.order = None;
        self.state.ack_latched = false;
        self.set_awaiting_ack(false, ctx);
        self.transition(Phase::Stopping, ctx);
    }

    pub fn reset(&mut self, ctx: &mut StepContext<'_>) -> Result<(), CommandError> {
        match self.state.phase {
            Phase::Complete | Phase::Completing => {
                self.acknowledge(ctx);
                Ok(())
            }
            Phase::Idle | Phase::Hold | Phase::Suspend => {
                self.abandon_work(ctx);
                self.state.inbox.clear();
                self.state.pool = None;
                self.transition(Phase::Resetting, ctx);
                Ok(())
            }
            Phase::Resetting | Phase::Stopping => Ok(()),
            Phase::Starting | Phase::Execute => Err(self.invalid_phase("RESET")),
        }
    }

    /// Clear a pending completion. Returns false when nothing was pending.
    pub fn acknowledge(&mut self, ctx: &mut StepContext<'_>) -> bool {
        match self.state.phase {
            Phase::Complete if self.state.awaiting_ack => {
                self.set_awaiting_ack(false, ctx);
                self.transition(Phase::Resetting, ctx);
                true
            }
            Phase::Completing => {
                self.state.ack_latched = true;
                true
            }
            _ => false,
        }
    }

    /// Back to IDLE with zeroed per-order state, no dwell. Used when a line
    /// accepts a new order.
    pub fn clear_for_order(&mut self, ctx: &mut StepContext<'_>) {
        self.clear_production();
        self.state.inbox.clear();
        self.state.pool = None;
        self.state.order = None;
        self.state.mode = RunMode::Auto;
        self.set_awaiting_ack(false, ctx);
        self.transition(Phase::Idle, ctx);
    }

    fn park(
        &mut self,
        to: Phase,
        command: StationCommand,
        ctx: &mut StepContext<'_>,
    ) -> Result<(), CommandError> {
        if self.state.phase != Phase::Execute {
            return Err(self.invalid_phase(command.as_str()));
        }
        self.transition(to, ctx);
        Ok(())
    }

    fn resume(&mut self, ctx: &mut StepContext<'_>) -> Result<(), CommandError> {
        if !matches!(self.state.phase, Phase::Hold | Phase::Suspend) {
            return Err(self.invalid_phase("RESUME"));
        }
        self.transition(Phase::Execute, ctx);
        Ok(())
    }

    fn invalid_phase(&self, command: &'static str) -> CommandError {
        CommandError::InvalidPhase {
            station_id: self.id.clone(),
            command,
            phase: self.state.phase,
        }
    }

    // -----------------------------------------------------------------------
    // Phase plumbing
    // -----------------------------------------------------------------------

    fn transition(&mut self, to: Phase, ctx: &mut StepContext<'_>) {
        let from = self.state.phase;
        if from == to {
            return;
        }
        self.state.phase = to;
        self.state.phase_since_ms = ctx.now_ms;
        tracing::debug!(station = %self.id, %from, %to, "phase change");
        ctx.emit(Event::PhaseChanged {
            station_id: self.id.clone(),
            from,
            to,
        });
        self.publish_markers(ctx.namespace);
    }

    fn dwell_elapsed(&self, dwell_ms: u64, now_ms: WallMillis) -> bool {
        now_ms.saturating_sub(self.state.phase_since_ms) >= dwell_ms
    }

    fn complete_order(&mut self, ctx: &mut StepContext<'_>) {
        self.set_awaiting_ack(true, ctx);
        self.transition(Phase::Complete, ctx);
        if std::mem::take(&mut self.state.ack_latched) {
            self.acknowledge(ctx);
        }
    }

    fn set_awaiting_ack(&mut self, pending: bool, ctx: &mut StepContext<'_>) {
        if self.state.awaiting_ack == pending {
            return;
        }
        self.state.awaiting_ack = pending;
        ctx.emit(Event::AckPendingChanged {
            station_id: self.id.clone(),
            pending,
        });
    }

    fn abandon_work(&mut self, ctx: &mut StepContext<'_>) {
        if let Some(serial) = self.state.serial.take() {
            tracing::info!(station = %self.id, serial = %serial, "work-item abandoned");
            ctx.emit(Event::WorkItemAbandoned {
                station_id: self.id.clone(),
                serial,
            });
        }
        self.state.stage_index = 0;
        self.state.stage_elapsed_s = 0.0;
        self.state.time_in_cycle_s = 0.0;
    }

    /// Zero the per-order counters and transient cycle state. Energy and the
    /// handoff inbox are left alone.
    fn clear_production(&mut self) {
        let s = &mut self.state;
        s.counters = ProductionCounters::default();
        s.serial = None;
        s.tray_id = None;
        s.stage_index = 0;
        s.stage_elapsed_s = 0.0;
        s.time_in_cycle_s = 0.0;
        s.last_serial_ok = false;
        s.last_ng_type = 0;
        s.awaiting_ack = false;
        s.ack_latched = false;
        s.uptime_ms = 0;
        s.downtime_ms = 0;
        s.running_sim_s = 0.0;
    }

    fn draw_idle_power(&mut self, dt_sim: f64, rng: &mut impl Rng) {
        self.state
            .energy
            .accumulate(&self.profile.energy, false, dt_sim, rng);
    }

    fn drift(&mut self, dt_sim: f64, rng: &mut impl Rng) {
        self.draw_idle_power(dt_sim, rng);
        self.state.drift_angle = (self.state.drift_angle + dt_sim * DRIFT_RATE) % std::f64::consts::TAU;
        for (idx, spec) in self.profile.metrics.iter().enumerate() {
            // Offset each metric so they do not move in lockstep.
            let angle = self.state.drift_angle + idx as f64;
            let value = drift(spec, angle, rng);
            self.state.metrics.insert(spec.name.clone(), value);
        }
    }

    fn evaluate_alarms(&mut self, ctx: &mut StepContext<'_>, rng: &mut impl Rng) {
        for transition in self.alarms.evaluate(ctx.now_ms, rng) {
            match transition {
                AlarmTransition::Raised {
                    scenario,
                    duration_ms,
                } => {
                    let def = &self.alarms.scenarios()[scenario].definition;
                    tracing::info!(station = %self.id, code = %def.code, severity = def.severity.as_str(), duration_ms, "alarm raised");
                    ctx.emit(Event::AlarmRaised {
                        station_id: self.id.clone(),
                        code: def.code.clone(),
                        severity: def.severity,
                        duration_ms,
                    });
                }
                AlarmTransition::Cleared { scenario } => {
                    let def = &self.alarms.scenarios()[scenario].definition;
                    tracing::info!(station = %self.id, code = %def.code, "alarm cleared");
                    ctx.emit(Event::AlarmCleared {
                        station_id: self.id.clone(),
                        code: def.code.clone(),
                    });
                }
            }
        }
    }
}
