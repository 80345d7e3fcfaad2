//! Type definitions for `twin_core`.
//!
//! Profiles and content are immutable inputs; states are owned by the engine
//! that mutates them. Everything serializes so the daemon can snapshot it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ---------------------------------------------------------------------------
// Type aliases
// ---------------------------------------------------------------------------

/// Wall-clock milliseconds on the dispatcher's monotonic clock.
pub type WallMillis = u64;

/// NG classification code. `0` means the work-item passed every check.
pub type NgType = u16;

pub const NG_NONE: NgType = 0;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(StationId);
string_id!(LineId);
string_id!(OrderId);
string_id!(Serial);
string_id!(EventId);

impl Serial {
    /// The identity carried by aggregate-mode work-items.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Core enums
// ---------------------------------------------------------------------------

/// Operating phase of a station.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    Execute,
    Completing,
    Complete,
    Resetting,
    Stopping,
    Hold,
    Suspend,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Starting => "STARTING",
            Phase::Execute => "EXECUTE",
            Phase::Completing => "COMPLETING",
            Phase::Complete => "COMPLETE",
            Phase::Resetting => "RESETTING",
            Phase::Stopping => "STOPPING",
            Phase::Hold => "HOLD",
            Phase::Suspend => "SUSPEND",
        }
    }

    /// Phases that only drift telemetry and never produce.
    pub fn is_parked(self) -> bool {
        matches!(self, Phase::Idle | Phase::Hold | Phase::Suspend)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Idle,
    Running,
    WaitingAck,
    Acked,
    Stopping,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Idle => "IDLE",
            OrderStatus::Running => "RUNNING",
            OrderStatus::WaitingAck => "WAITING_ACK",
            OrderStatus::Acked => "ACKED",
            OrderStatus::Stopping => "STOPPING",
        }
    }
}

/// Alarm severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Notice,
    Warning,
    Fault,
    Emergency,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Fault => "FAULT",
            Severity::Emergency => "EMERGENCY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmCause {
    Internal,
    External,
}

/// Which active alarm a station displays when several are active at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPrecedence {
    /// Highest severity wins; ties go to the most recent activation.
    #[default]
    HighestSeverityThenLatest,
    LatestActivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Cleaning,
    Coating,
    Formation,
    Assembly,
    Packing,
    Inspection,
}

impl UnitType {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitType::Cleaning => "CLEANING",
            UnitType::Coating => "COATING",
            UnitType::Formation => "FORMATION",
            UnitType::Assembly => "ASSEMBLY",
            UnitType::Packing => "PACKING",
            UnitType::Inspection => "INSPECTION",
        }
    }
}

/// Production accounting style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkMode {
    /// Distinct serials pulled from the order pool or the upstream handoff queue.
    #[default]
    Discrete,
    /// Free-running counter; every work-item carries an empty serial.
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Uniform,
    Peaked,
}

// ---------------------------------------------------------------------------
// Telemetry values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryValue::Bool(v) => write!(f, "{v}"),
            TelemetryValue::Int(v) => write!(f, "{v}"),
            TelemetryValue::Float(v) => write!(f, "{v}"),
            TelemetryValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for TelemetryValue {
    fn from(v: bool) -> Self {
        TelemetryValue::Bool(v)
    }
}

impl From<i64> for TelemetryValue {
    fn from(v: i64) -> Self {
        TelemetryValue::Int(v)
    }
}

impl From<u64> for TelemetryValue {
    fn from(v: u64) -> Self {
        TelemetryValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u32> for TelemetryValue {
    fn from(v: u32) -> Self {
        TelemetryValue::Int(i64::from(v))
    }
}

impl From<u16> for TelemetryValue {
    fn from(v: u16) -> Self {
        TelemetryValue::Int(i64::from(v))
    }
}

impl From<f64> for TelemetryValue {
    fn from(v: f64) -> Self {
        TelemetryValue::Float(v)
    }
}

impl From<&str> for TelemetryValue {
    fn from(v: &str) -> Self {
        TelemetryValue::Text(v.to_string())
    }
}

impl From<String> for TelemetryValue {
    fn from(v: String) -> Self {
        TelemetryValue::Text(v)
    }
}

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub idle_kw: f64,
    /// Relative variance, e.g. `0.05` for ±5%.
    pub idle_variance: f64,
    pub active_kw: f64,
    pub active_variance: f64,
}

/// A process measurement sampled at the end of every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub nominal: f64,
    /// Half-width of the sampling band around `nominal`.
    pub spread: f64,
    /// Reading reported while the station is parked. Defaults to `nominal`.
    #[serde(default)]
    pub idle: Option<f64>,
}

/// One quality predicate: the named metric must lie inside `[min, max]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheck {
    pub ng_type: NgType,
    pub cause: String,
    pub metric: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Wall-clock dwell for each timed phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhaseDwell {
    pub starting_ms: u64,
    pub completing_ms: u64,
    pub resetting_ms: u64,
    pub stopping_ms: u64,
}

impl Default for PhaseDwell {
    fn default() -> Self {
        Self {
            starting_ms: 1_500,
            completing_ms: 1_500,
            resetting_ms: 1_000,
            stopping_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationProfile {
    /// Telemetry namespace prefix and station id, e.g. `L1_CLN01`.
    pub name: String,
    pub unit_type: UnitType,
    pub line_id: LineId,
    pub sequence: u32,
    pub equipment_code: String,
    pub process_id: String,
    pub units_per_cycle: u32,
    pub nominal_ppm: f64,
    /// Simulated seconds per production stage at nominal throughput.
    pub stage_durations_s: SmallVec<[f64; 8]>,
    /// Simulated seconds added to the cycle clock per tick.
    pub sim_seconds_per_tick: f64,
    pub energy: EnergyProfile,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    /// Evaluated in order; the first failing check classifies the work-item.
    #[serde(default)]
    pub quality_checks: Vec<QualityCheck>,
    #[serde(default)]
    pub alarms: Vec<AlarmScenario>,
    #[serde(default)]
    pub work_mode: WorkMode,
    #[serde(default)]
    pub dwell: PhaseDwell,
    #[serde(default = "default_manual_batch_qty")]
    pub manual_batch_qty: u64,
    #[serde(default)]
    pub last_maintenance: String,
    #[serde(default)]
    pub sampler: Option<SamplerKind>,
}

fn default_manual_batch_qty() -> u64 {
    100
}

impl StationProfile {
    pub fn id(&self) -> StationId {
        StationId(self.name.clone())
    }

    /// Total simulated cycle time at nominal throughput.
    pub fn cycle_time_s(&self) -> f64 {
        self.stage_durations_s.iter().sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub code: String,
    pub description: String,
    pub severity: Severity,
    pub cause: AlarmCause,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmScenario {
    pub definition: AlarmDefinition,
    /// Bernoulli probability evaluated once per tick while inactive.
    pub probability: f64,
    /// Active duration range in wall-clock ms, `[min, max)`.
    pub duration_ms: (u64, u64),
}

/// An ordered set of stations forming one production line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDef {
    pub id: LineId,
    pub stations: Vec<StationProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constants {
    pub tick_interval_ms: u64,
    pub sim_seconds_per_tick: f64,
    pub dwell: PhaseDwell,
    pub alarm_precedence: AlarmPrecedence,
    pub env_probe_interval_ms: u64,
    pub env_nominal_temperature_c: f64,
    pub env_nominal_humidity_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlantContent {
    pub content_version: String,
    pub lines: Vec<LineDef>,
    pub constants: Constants,
}

// ---------------------------------------------------------------------------
// Runtime state types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub next_event_id: u64,
}

/// Line-level order record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub target_qty: u64,
    pub ppm: f64,
    pub status: OrderStatus,
    /// True from accepted START until ACK or STOP.
    pub active: bool,
    /// Latched copy of the last station's produced count.
    pub produced_qty: u64,
}

/// The slice of an order a single station works on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationOrder {
    pub order_id: OrderId,
    pub target_qty: u64,
    pub ppm: f64,
}

/// Source of fresh serials for the first station of a line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPool {
    pub prefix: String,
    pub next_seq: u64,
    pub remaining: u64,
}

impl SerialPool {
    pub fn new(prefix: &str, count: u64) -> Self {
        Self {
            prefix: prefix.to_string(),
            next_seq: 1,
            remaining: count,
        }
    }

    pub fn draw(&mut self) -> Option<Serial> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let serial = Serial(format!("{}-{:04}", self.prefix, self.next_seq));
        self.next_seq += 1;
        Some(serial)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionCounters {
    pub produced: u64,
    pub ok: u64,
    pub ng: u64,
    pub ng_by_type: BTreeMap<NgType, u64>,
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub tick: u64,
    pub at_ms: WallMillis,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    PhaseChanged {
        station_id: StationId,
        from: Phase,
        to: Phase,
    },
    CycleConcluded {
        station_id: StationId,
        serial: Serial,
        ok: bool,
        ng_type: NgType,
    },
    Produced {
        station_id: StationId,
        produced: u64,
        ok: u64,
        ng: u64,
    },
    WorkItemReleased {
        station_id: StationId,
        serial: Serial,
    },
    /// A stopped station dropped its in-flight work-item without crediting it.
    WorkItemAbandoned {
        station_id: StationId,
        serial: Serial,
    },
    AckPendingChanged {
        station_id: StationId,
        pending: bool,
    },
    StationReset {
        station_id: StationId,
    },
    AlarmRaised {
        station_id: StationId,
        code: String,
        severity: Severity,
        duration_ms: u64,
    },
    AlarmCleared {
        station_id: StationId,
        code: String,
    },
    OrderStarted {
        line_id: LineId,
        order_id: OrderId,
        target_qty: u64,
        ppm: f64,
    },
    OrderStatusChanged {
        line_id: LineId,
        order_id: OrderId,
        status: OrderStatus,
    },
}
