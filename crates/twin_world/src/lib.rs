//! Content loading and plant construction shared between twin_cli and twin_daemon.
//!
//! Content is split over four JSON files: `constants.json`, `stations.json`
//! (station type templates), `alarms.json` (alarm scenario catalogue) and
//! `lines.json` (which stations make up which line). Templates are resolved
//! into concrete [`StationProfile`]s by [`build_plant`].

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use twin_core::{
    is_plain_id, AlarmScenario, Constants, EnergyProfile, LineDef, LineId, LineOrchestrator, MetricSpec,
    PlantContent, QualityCheck, SamplerKind, StationProfile, UnitType, WorkMode,
};

/// A reusable station type, e.g. "cleaning_v1".
#[derive(Debug, Clone, Deserialize)]
pub struct StationTemplate {
    pub type_id: String,
    pub unit_type: UnitType,
    pub units_per_cycle: u32,
    pub nominal_ppm: f64,
    pub stage_durations_s: Vec<f64>,
    pub energy: EnergyProfile,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub quality_checks: Vec<QualityCheck>,
    #[serde(default)]
    pub work_mode: WorkMode,
    #[serde(default)]
    pub sampler: Option<SamplerKind>,
    #[serde(default)]
    pub manual_batch_qty: Option<u64>,
    /// Codes from the alarm catalogue this type can raise.
    #[serde(default)]
    pub alarm_codes: Vec<String>,
}

/// One station slot on a line.
#[derive(Debug, Clone, Deserialize)]
pub struct StationSlot {
    pub name: String,
    pub type_id: String,
    pub equipment_code: String,
    pub process_id: String,
    /// Omitted slots get a random age of up to a month.
    #[serde(default)]
    pub last_maintenance_days_ago: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineLayout {
    pub id: LineId,
    pub stations: Vec<StationSlot>,
}

#[derive(Debug, Clone)]
pub struct ContentLibrary {
    pub content_version: String,
    pub constants: Constants,
    pub station_types: Vec<StationTemplate>,
    pub alarms: Vec<AlarmScenario>,
    pub lines: Vec<LineLayout>,
}

#[derive(Deserialize)]
struct StationsFile {
    content_version: String,
    station_types: Vec<StationTemplate>,
}

#[derive(Deserialize)]
struct AlarmsFile {
    alarms: Vec<AlarmScenario>,
}

#[derive(Deserialize)]
struct LinesFile {
    lines: Vec<LineLayout>,
}

/// Checks cross-references and value ranges in loaded content.
///
/// Catches mistakes like: a line slot naming an unknown station type, a
/// template referencing an alarm code missing from the catalogue, or a
/// quality check on a metric the type never samples.
pub fn validate_content(library: &ContentLibrary) -> Result<()> {
    let c = &library.constants;
    ensure!(c.tick_interval_ms > 0, "constants: tick_interval_ms must be positive");
    ensure!(
        c.sim_seconds_per_tick > 0.0,
        "constants: sim_seconds_per_tick must be positive"
    );
    ensure!(c.env_probe_interval_ms > 0, "constants: env_probe_interval_ms must be positive");

    let alarm_codes: HashSet<&str> = library
        .alarms
        .iter()
        .map(|a| a.definition.code.as_str())
        .collect();
    ensure!(
        alarm_codes.len() == library.alarms.len(),
        "alarm catalogue contains duplicate codes"
    );
    for alarm in &library.alarms {
        let code = &alarm.definition.code;
        ensure!(
            (0.0..=1.0).contains(&alarm.probability),
            "alarm '{code}' probability {} is outside [0, 1]",
            alarm.probability
        );
        let (min, max) = alarm.duration_ms;
        ensure!(min <= max, "alarm '{code}' duration range [{min}, {max}) is inverted");
    }

    let mut type_ids = HashSet::new();
    for t in &library.station_types {
        ensure!(type_ids.insert(t.type_id.as_str()), "duplicate station type '{}'", t.type_id);
        validate_template(t, &alarm_codes)?;
    }

    let mut line_ids = HashSet::new();
    let mut station_names = HashSet::new();
    for line in &library.lines {
        ensure!(line_ids.insert(line.id.0.as_str()), "duplicate line id '{}'", line.id);
        ensure!(
            is_plain_id(&line.id.0),
            "line id '{}' is empty or contains a reserved character",
            line.id.0.escape_debug()
        );
        ensure!(!line.stations.is_empty(), "line '{}' has no stations", line.id);
        for slot in &line.stations {
            ensure!(
                is_plain_id(&slot.name),
                "station name '{}' is empty or contains a reserved character",
                slot.name.escape_debug()
            );
            ensure!(
                station_names.insert(slot.name.as_str()),
                "station name '{}' is used more than once",
                slot.name
            );
            ensure!(
                type_ids.contains(slot.type_id.as_str()),
                "line '{}' station '{}' type '{}' is not a known station type",
                line.id,
                slot.name,
                slot.type_id
            );
            ensure!(
                slot.name != line.id.0,
                "station '{}' shares its name with its line",
                slot.name
            );
        }
    }
    Ok(())
}

fn validate_template(t: &StationTemplate, alarm_codes: &HashSet<&str>) -> Result<()> {
    let id = &t.type_id;
    ensure!(t.units_per_cycle > 0, "station type '{id}': units_per_cycle must be positive");
    ensure!(t.nominal_ppm > 0.0, "station type '{id}': nominal_ppm must be positive");
    ensure!(!t.stage_durations_s.is_empty(), "station type '{id}' has no stages");
    ensure!(
        t.stage_durations_s.iter().all(|d| *d > 0.0),
        "station type '{id}': every stage duration must be positive"
    );
    ensure!(
        t.manual_batch_qty != Some(0),
        "station type '{id}': manual_batch_qty must be positive"
    );

    let metric_names: HashSet<&str> = t.metrics.iter().map(|m| m.name.as_str()).collect();
    for check in &t.quality_checks {
        ensure!(
            check.ng_type != twin_core::NG_NONE,
            "station type '{id}': NG type 0 is reserved for OK"
        );
        ensure!(
            metric_names.contains(check.metric.as_str()),
            "station type '{id}' quality check references unknown metric '{}'",
            check.metric
        );
    }
    for code in &t.alarm_codes {
        ensure!(
            alarm_codes.contains(code.as_str()),
            "station type '{id}' alarm '{code}' is not in the alarm catalogue"
        );
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let text = std::fs::read_to_string(dir.join(file)).with_context(|| format!("reading {file}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {file}"))
}

pub fn load_content(content_dir: &str) -> Result<ContentLibrary> {
    let dir = Path::new(content_dir);
    let constants: Constants = read_json(dir, "constants.json")?;
    let stations: StationsFile = read_json(dir, "stations.json")?;
    let alarms: AlarmsFile = read_json(dir, "alarms.json")?;
    let lines: LinesFile = read_json(dir, "lines.json")?;
    let library = ContentLibrary {
        content_version: stations.content_version,
        constants,
        station_types: stations.station_types,
        alarms: alarms.alarms,
        lines: lines.lines,
    };
    validate_content(&library).context("validating content")?;
    Ok(library)
}

/// Resolve every line layout into concrete station profiles.
pub fn build_plant(
    library: &ContentLibrary,
    now: DateTime<Utc>,
    rng: &mut impl Rng,
) -> Result<PlantContent> {
    let c = &library.constants;
    let mut lines = Vec::with_capacity(library.lines.len());
    for layout in &library.lines {
        let mut stations = Vec::with_capacity(layout.stations.len());
        for (idx, slot) in layout.stations.iter().enumerate() {
            let template = library
                .station_types
                .iter()
                .find(|t| t.type_id == slot.type_id)
                .with_context(|| format!("station '{}' has unknown type '{}'", slot.name, slot.type_id))?;
            let alarms = template
                .alarm_codes
                .iter()
                .filter_map(|code| library.alarms.iter().find(|a| &a.definition.code == code))
                .cloned()
                .collect();
            let days_ago = slot
                .last_maintenance_days_ago
                .unwrap_or_else(|| rng.gen_range(1..=30));
            let last_maintenance = (now - Duration::days(days_ago)).to_rfc3339_opts(SecondsFormat::Secs, true);
            stations.push(StationProfile {
                name: slot.name.clone(),
                unit_type: template.unit_type,
                line_id: layout.id.clone(),
                sequence: u32::try_from(idx + 1).context("too many stations on one line")?,
                equipment_code: slot.equipment_code.clone(),
                process_id: slot.process_id.clone(),
                units_per_cycle: template.units_per_cycle,
                nominal_ppm: template.nominal_ppm,
                stage_durations_s: template.stage_durations_s.iter().copied().collect(),
                sim_seconds_per_tick: c.sim_seconds_per_tick,
                energy: template.energy.clone(),
                metrics: template.metrics.clone(),
                quality_checks: template.quality_checks.clone(),
                alarms,
                work_mode: template.work_mode,
                dwell: c.dwell,
                manual_batch_qty: template.manual_batch_qty.unwrap_or(100),
                last_maintenance,
                sampler: template.sampler,
            });
        }
        lines.push(LineDef {
            id: layout.id.clone(),
            stations,
        });
    }
    Ok(PlantContent {
        content_version: library.content_version.clone(),
        lines,
        constants: c.clone(),
    })
}

/// The rng every binary drives a plant with. One seed reproduces a whole run.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// One orchestrator per line, all sharing the plant's alarm precedence.
pub fn build_lines(plant: &PlantContent) -> Vec<LineOrchestrator> {
    plant
        .lines
        .iter()
        .cloned()
        .map(|def| LineOrchestrator::new(def, plant.constants.alarm_precedence))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_core::test_fixtures::base_constants;
    use twin_core::{AlarmCause, AlarmDefinition, Severity};

    fn template(type_id: &str) -> StationTemplate {
        StationTemplate {
            type_id: type_id.to_string(),
            unit_type: UnitType::Cleaning,
            units_per_cycle: 1,
            nominal_ppm: 30.0,
            stage_durations_s: vec![1.0, 1.0],
            energy: EnergyProfile {
                idle_kw: 1.0,
                idle_variance: 0.0,
                active_kw: 5.0,
                active_variance: 0.1,
            },
            metrics: vec![MetricSpec {
                name: "temperature".to_string(),
                unit: "C".to_string(),
                nominal: 40.0,
                spread: 2.0,
                idle: None,
            }],
            quality_checks: vec![],
            work_mode: WorkMode::Discrete,
            sampler: None,
            manual_batch_qty: None,
            alarm_codes: vec!["W100".to_string()],
        }
    }

    fn minimal_library() -> ContentLibrary {
        ContentLibrary {
            content_version: "test".to_string(),
            constants: base_constants(),
            station_types: vec![template("cleaning_v1")],
            alarms: vec![AlarmScenario {
                definition: AlarmDefinition {
                    code: "W100".to_string(),
                    description: "Nozzle pressure low".to_string(),
                    severity: Severity::Warning,
                    cause: AlarmCause::Internal,
                },
                probability: 0.01,
                duration_ms: (5_000, 11_000),
            }],
            lines: vec![LineLayout {
                id: LineId("L1".to_string()),
                stations: vec![StationSlot {
                    name: "L1_CLN01".to_string(),
                    type_id: "cleaning_v1".to_string(),
                    equipment_code: "CLN-1001".to_string(),
                    process_id: "P010".to_string(),
                    last_maintenance_days_ago: Some(3),
                }],
            }],
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn validation_error(library: &ContentLibrary) -> String {
        validate_content(library).unwrap_err().to_string()
    }

    #[test]
    fn test_valid_content_passes_validation() {
        validate_content(&minimal_library()).unwrap();
    }

    #[test]
    fn test_unknown_station_type_is_rejected() {
        let mut library = minimal_library();
        library.lines[0].stations[0].type_id = "welding_v9".to_string();
        assert!(validation_error(&library).contains("not a known station type"));
    }

    #[test]
    fn test_unknown_alarm_code_is_rejected() {
        let mut library = minimal_library();
        library.station_types[0].alarm_codes.push("F999".to_string());
        assert!(validation_error(&library).contains("not in the alarm catalogue"));
    }

    #[test]
    fn test_quality_check_on_unknown_metric_is_rejected() {
        let mut library = minimal_library();
        library.station_types[0].quality_checks.push(QualityCheck {
            ng_type: 1,
            cause: "too thick".to_string(),
            metric: "thickness".to_string(),
            min: None,
            max: Some(1.0),
        });
        assert!(validation_error(&library).contains("unknown metric 'thickness'"));
    }

    #[test]
    fn test_ng_type_zero_is_reserved() {
        let mut library = minimal_library();
        library.station_types[0].quality_checks.push(QualityCheck {
            ng_type: 0,
            cause: "bad".to_string(),
            metric: "temperature".to_string(),
            min: Some(0.0),
            max: None,
        });
        assert!(validation_error(&library).contains("reserved"));
    }

    #[test]
    fn test_bad_probability_and_empty_line_are_rejected() {
        let mut library = minimal_library();
        library.alarms[0].probability = 1.5;
        assert!(validation_error(&library).contains("outside [0, 1]"));

        let mut library = minimal_library();
        library.lines[0].stations.clear();
        assert!(validation_error(&library).contains("has no stations"));
    }

    #[test]
    fn test_ids_with_separators_are_rejected() {
        let mut library = minimal_library();
        library.lines[0].id = LineId("L1,east".to_string());
        assert!(validation_error(&library).contains("reserved character"));

        let mut library = minimal_library();
        library.lines[0].stations[0].name = "L1:CLN01".to_string();
        assert!(validation_error(&library).contains("reserved character"));
    }

    #[test]
    fn test_duplicate_station_names_are_rejected() {
        let mut library = minimal_library();
        let slot = library.lines[0].stations[0].clone();
        library.lines[0].stations.push(slot);
        assert!(validation_error(&library).contains("used more than once"));
    }

    #[test]
    fn test_build_plant_resolves_templates() {
        let library = minimal_library();
        let mut rng = seeded_rng(1);
        let plant = build_plant(&library, fixed_now(), &mut rng).unwrap();
        let profile = &plant.lines[0].stations[0];
        assert_eq!(profile.name, "L1_CLN01");
        assert_eq!(profile.sequence, 1);
        assert_eq!(profile.alarms.len(), 1);
        assert_eq!(profile.manual_batch_qty, 100);
        assert_eq!(profile.last_maintenance, "2026-03-07T08:00:00Z");
        assert_eq!(profile.stage_durations_s.as_slice(), &[1.0, 1.0]);

        let lines = build_lines(&plant);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].owns("L1_CLN01"));
    }

    #[test]
    fn test_random_maintenance_age_is_seeded() {
        let mut library = minimal_library();
        library.lines[0].stations[0].last_maintenance_days_ago = None;
        let build = |seed| {
            let mut rng = seeded_rng(seed);
            build_plant(&library, fixed_now(), &mut rng).unwrap().lines[0].stations[0]
                .last_maintenance
                .clone()
        };
        assert_eq!(build(5), build(5));
    }

    #[test]
    fn test_load_content_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| std::fs::write(dir.path().join(name), body).unwrap();
        write(
            "constants.json",
            r#"{"tick_interval_ms":1000,"sim_seconds_per_tick":1.0,
               "dwell":{"starting_ms":1500,"completing_ms":1500,"resetting_ms":1000,"stopping_ms":1000},
               "alarm_precedence":"highest_severity_then_latest","env_probe_interval_ms":5000,
               "env_nominal_temperature_c":22.0,"env_nominal_humidity_pct":45.0}"#,
        );
        write(
            "stations.json",
            r#"{"content_version":"0.1","station_types":[{"type_id":"packing_v1","unit_type":"packing",
               "units_per_cycle":1,"nominal_ppm":20.0,"stage_durations_s":[1.5,1.5],
               "energy":{"idle_kw":0.5,"idle_variance":0.0,"active_kw":3.0,"active_variance":0.05}}]}"#,
        );
        write("alarms.json", r#"{"alarms":[]}"#);
        write(
            "lines.json",
            r#"{"lines":[{"id":"L3","stations":[{"name":"L3_PCK01","type_id":"packing_v1",
               "equipment_code":"PCK-3001","process_id":"P090"}]}]}"#,
        );
        let library = load_content(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(library.content_version, "0.1");
        assert_eq!(library.lines[0].stations[0].name, "L3_PCK01");
    }

    #[test]
    fn test_load_content_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_content(dir.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("constants.json"));
    }

    #[test]
    fn test_shipped_content_is_valid() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../content");
        let library = load_content(dir).unwrap();
        let mut rng = seeded_rng(0);
        let plant = build_plant(&library, fixed_now(), &mut rng).unwrap();
        assert!(!plant.lines.is_empty());
    }
}
