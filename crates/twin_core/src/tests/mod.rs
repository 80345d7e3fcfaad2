use super::*;
use crate::test_fixtures::{make_rng, station_profile, two_station_line, ManualClock};
use rand_chacha::ChaCha8Rng;

mod integration;
mod quality;

// --- Shared test helpers ------------------------------------------------

/// A lone station driven directly, without an orchestrator.
struct Harness {
    engine: StationEngine,
    counters: Counters,
    events: Vec<EventEnvelope>,
    namespace: Namespace,
    clock: ManualClock,
    rng: ChaCha8Rng,
    tick: u64,
}

impl Harness {
    fn new(profile: StationProfile) -> Self {
        let engine = StationEngine::new(profile, AlarmPrecedence::default());
        let mut namespace = Namespace::new();
        engine.publish_identity(&mut namespace);
        Self {
            engine,
            counters: Counters::default(),
            events: Vec::new(),
            namespace,
            clock: ManualClock::default(),
            rng: make_rng(),
            tick: 0,
        }
    }

    fn with<R>(&mut self, f: impl FnOnce(&mut StationEngine, &mut StepContext<'_>) -> R) -> R {
        let mut ctx = StepContext {
            now_ms: self.clock.now(),
            tick: self.tick,
            counters: &mut self.counters,
            events: &mut self.events,
            namespace: &mut self.namespace,
        };
        f(&mut self.engine, &mut ctx)
    }

    fn command(&mut self, command: StationCommand) -> Result<(), CommandError> {
        self.with(|engine, ctx| engine.command(command, ctx))
    }

    /// Step once after advancing the clock by `ms`.
    fn step_after(&mut self, ms: u64) {
        self.clock.advance_by(ms);
        let mut ctx = StepContext {
            now_ms: self.clock.now(),
            tick: self.tick,
            counters: &mut self.counters,
            events: &mut self.events,
            namespace: &mut self.namespace,
        };
        self.engine.step(&mut ctx, &mut self.rng);
        self.tick += 1;
    }

    fn step(&mut self) {
        self.step_after(test_fixtures::TICK_MS);
    }

    fn phase(&self) -> Phase {
        self.engine.phase()
    }

    fn take_events(&mut self) -> Vec<Event> {
        self.events.drain(..).map(|e| e.event).collect()
    }

    fn telemetry(&self, field: &str) -> Option<&TelemetryValue> {
        self.namespace.get(&self.engine.profile().name, field)
    }
}

fn assert_conserved(state: &StationState) {
    let c = &state.counters;
    assert_eq!(c.produced, c.ok + c.ng, "produced must equal ok + ng");
    assert_eq!(c.ng, c.ng_by_type.values().sum::<u64>(), "ng must equal the per-type sum");
}

/// Tick the line until `done` holds, returning the number of ticks taken.
fn run_line_until(
    line: &mut LineOrchestrator,
    clock: &mut ManualClock,
    rng: &mut ChaCha8Rng,
    max_ticks: u32,
    mut done: impl FnMut(&LineOrchestrator) -> bool,
) -> u32 {
    for n in 1..=max_ticks {
        line.tick(clock.advance(), rng);
        for station in line.stations() {
            assert_conserved(station.state());
        }
        if done(line) {
            return n;
        }
    }
    panic!("condition not reached within {max_ticks} ticks");
}
