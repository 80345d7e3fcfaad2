//! `twin_core`: manufacturing-line simulation and orchestration engine.
//!
//! No IO, no network, no clock of its own. Wall-clock time and randomness are
//! passed in by the dispatcher so every run is reproducible from a seed.

mod alarms;
mod commands;
mod energy;
mod environment;
mod facade;
mod id;
mod line;
pub mod metrics;
mod namespace;
mod sampler;
mod station;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

pub use alarms::{AlarmInstance, AlarmScheduler, AlarmTransition};
pub use commands::{
    is_plain_id, parse_line_command, parse_station_command, CommandError, LineCommand, StationCommand,
};
pub use energy::EnergyMeter;
pub use environment::{EnvironmentReading, EnvironmentSensor};
pub use facade::WriteError;
pub use id::generate_tray_id;
pub use line::{LineOrchestrator, TickOutput};
pub use metrics::{compute_metrics, MetricsFileWriter, MetricsSnapshot};
pub use namespace::{Namespace, TelemetryChange};
pub use sampler::{peaked, sample_metrics, sampler_for, uniform, MetricSampler};
pub use station::{RunMode, StationEngine, StationState, StepContext};
pub use types::*;

pub(crate) fn emit(counters: &mut Counters, tick: u64, at_ms: WallMillis, event: Event) -> EventEnvelope {
    let id = EventId(format!("evt_{:06}", counters.next_event_id));
    counters.next_event_id += 1;
    EventEnvelope {
        id,
        tick,
        at_ms,
        event,
    }
}

#[cfg(test)]
mod tests;
