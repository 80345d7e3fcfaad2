//! Snapshot metrics computed from a `LineOrchestrator`.
//!
//! `compute_metrics(&LineOrchestrator) -> MetricsSnapshot` samples one line
//! for time-series analysis. No state mutation, no IO.

use crate::{LineOrchestrator, Phase};
use serde::Serialize;
use std::io::Write;

/// Current schema version. Bump when fields are added/removed/reordered.
const METRICS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tick: u64,
    pub metrics_version: u32,
    pub line_id: String,

    // Order
    pub order_no: String,
    pub order_status: String,
    pub order_target_qty: u64,
    pub order_produced_qty: u64,

    // Station phases
    pub stations_total: u32,
    pub stations_idle: u32,
    pub stations_executing: u32,
    /// In EXECUTE without a work-item to process.
    pub stations_starved: u32,
    pub stations_parked: u32,

    // Production, summed over stations
    pub total_produced: u64,
    pub total_ok: u64,
    pub total_ng: u64,

    // Efficiency
    pub avg_oee: f64,
    pub min_oee: f64,
    pub avg_availability: f64,

    pub total_energy_kwh: f64,
    pub active_alarm_count: u32,
}

pub fn compute_metrics(line: &LineOrchestrator) -> MetricsSnapshot {
    let order = line.order();
    let mut stations_total = 0u32;
    let mut stations_idle = 0u32;
    let mut stations_executing = 0u32;
    let mut stations_starved = 0u32;
    let mut stations_parked = 0u32;
    let mut total_produced = 0u64;
    let mut total_ok = 0u64;
    let mut total_ng = 0u64;
    let mut oee_sum = 0.0;
    let mut min_oee = f64::INFINITY;
    let mut availability_sum = 0.0;
    let mut total_energy_kwh = 0.0;
    let mut active_alarm_count = 0u32;

    for station in line.stations() {
        let state = station.state();
        stations_total += 1;
        match state.phase {
            Phase::Idle => stations_idle += 1,
            Phase::Execute => {
                stations_executing += 1;
                if state.serial.is_none() {
                    stations_starved += 1;
                }
            }
            Phase::Hold | Phase::Suspend => stations_parked += 1,
            Phase::Starting
            | Phase::Completing
            | Phase::Complete
            | Phase::Resetting
            | Phase::Stopping => {}
        }
        total_produced += state.counters.produced;
        total_ok += state.counters.ok;
        total_ng += state.counters.ng;
        let oee = station.oee();
        oee_sum += oee;
        min_oee = min_oee.min(oee);
        availability_sum += station.availability();
        total_energy_kwh += state.energy.total_kwh;
        active_alarm_count += u32::try_from(station.alarms().active_count()).unwrap_or(u32::MAX);
    }

    let (avg_oee, min_oee, avg_availability) = if stations_total == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let n = f64::from(stations_total);
        (oee_sum / n, min_oee, availability_sum / n)
    };

    MetricsSnapshot {
        tick: line.current_tick(),
        metrics_version: METRICS_VERSION,
        line_id: line.id().0.clone(),
        order_no: order.order_id.0.clone(),
        order_status: order.status.as_str().to_string(),
        order_target_qty: order.target_qty,
        order_produced_qty: order.produced_qty,
        stations_total,
        stations_idle,
        stations_executing,
        stations_starved,
        stations_parked,
        total_produced,
        total_ok,
        total_ng,
        avg_oee,
        min_oee,
        avg_availability,
        total_energy_kwh,
        active_alarm_count,
    }
}

/// Write the CSV header row for metrics.
pub fn write_metrics_header(writer: &mut impl std::io::Write) -> std::io::Result<()> {
    writeln!(
        writer,
        "tick,metrics_version,line_id,\
         order_no,order_status,order_target_qty,order_produced_qty,\
         stations_total,stations_idle,stations_executing,stations_starved,stations_parked,\
         total_produced,total_ok,total_ng,\
         avg_oee,min_oee,avg_availability,\
         total_energy_kwh,active_alarm_count"
    )
}

/// Append a single metrics snapshot as a CSV row.
pub fn append_metrics_row(
    writer: &mut impl std::io::Write,
    snapshot: &MetricsSnapshot,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{:.4},{:.4},{:.4},{:.4},{}",
        snapshot.tick,
        snapshot.metrics_version,
        snapshot.line_id,
        snapshot.order_no,
        snapshot.order_status,
        snapshot.order_target_qty,
        snapshot.order_produced_qty,
        snapshot.stations_total,
        snapshot.stations_idle,
        snapshot.stations_executing,
        snapshot.stations_starved,
        snapshot.stations_parked,
        snapshot.total_produced,
        snapshot.total_ok,
        snapshot.total_ng,
        snapshot.avg_oee,
        snapshot.min_oee,
        snapshot.avg_availability,
        snapshot.total_energy_kwh,
        snapshot.active_alarm_count,
    )
}

/// Maximum data rows per CSV file before rotating to a new file.
const MAX_ROWS_PER_FILE: usize = 50_000;

/// Streams snapshots to CSV, rotating files
/// (`metrics_000.csv`, `metrics_001.csv`, ...) after [`MAX_ROWS_PER_FILE`] rows each.
pub struct MetricsFileWriter {
    run_dir: std::path::PathBuf,
    file_index: u32,
    rows_in_current_file: usize,
    writer: std::io::BufWriter<std::fs::File>,
}

impl MetricsFileWriter {
    /// Create a new writer, opening the first CSV file with a header row.
    pub fn new(run_dir: std::path::PathBuf) -> std::io::Result<Self> {
        let writer = open_csv_file(&run_dir, 0)?;
        Ok(Self {
            run_dir,
            file_index: 0,
            rows_in_current_file: 0,
            writer,
        })
    }

    /// Append one snapshot row, rotating to a new file if the current one is full.
    pub fn write_row(&mut self, snapshot: &MetricsSnapshot) -> std::io::Result<()> {
        if self.rows_in_current_file >= MAX_ROWS_PER_FILE {
            self.writer.flush()?;
            self.file_index += 1;
            self.writer = open_csv_file(&self.run_dir, self.file_index)?;
            self.rows_in_current_file = 0;
        }
        append_metrics_row(&mut self.writer, snapshot)?;
        self.rows_in_current_file += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

fn open_csv_file(
    run_dir: &std::path::Path,
    index: u32,
) -> std::io::Result<std::io::BufWriter<std::fs::File>> {
    let path = run_dir.join(format!("metrics_{index:03}.csv"));
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    write_metrics_header(&mut writer)?;
    Ok(writer)
}
