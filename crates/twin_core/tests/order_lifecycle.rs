//! Integration test: three-station line, two orders, one stopped mid-run,
//! driven through the tag facade the way a field protocol would.

use twin_core::test_fixtures::{make_rng, station_profile, ManualClock};
use twin_core::*;

fn three_station_line() -> LineOrchestrator {
    let mut coater = station_profile("L2_CTG02", "L2", 2, UnitType::Coating);
    coater.quality_checks.push(QualityCheck {
        ng_type: 4,
        cause: "coating too hot".to_string(),
        metric: "temperature".to_string(),
        min: None,
        max: Some(50.5),
    });
    let def = LineDef {
        id: LineId("L2".to_string()),
        stations: vec![
            station_profile("L2_CLN01", "L2", 1, UnitType::Cleaning),
            coater,
            station_profile("L2_PCK03", "L2", 3, UnitType::Packing),
        ],
    };
    LineOrchestrator::new(def, AlarmPrecedence::default())
}

fn write_command(line: &mut LineOrchestrator, id: &str, raw: &str, now: WallMillis) {
    line.write(id, "command", TelemetryValue::from(raw), now)
        .unwrap_or_else(|e| panic!("{id} <- {raw}: {e}"));
}

#[test]
fn stopped_order_then_completed_order() {
    let mut line = three_station_line();
    let mut clock = ManualClock::default();
    let mut rng = make_rng();

    // First order is stopped once the last station is running.
    write_command(&mut line, "L2", "START:A100:6:0", clock.now());
    for _ in 0..40 {
        line.tick(clock.advance(), &mut rng);
        if line.stations()[2].phase() == Phase::Execute {
            break;
        }
    }
    assert_eq!(line.stations()[2].phase(), Phase::Execute);
    write_command(&mut line, "L2", "STOP", clock.now());
    assert_eq!(line.read("L2", "order_status"), Some(&TelemetryValue::from("STOPPING")));
    line.tick(clock.advance(), &mut rng);
    assert_eq!(line.read("L2", "order_status"), Some(&TelemetryValue::from("IDLE")));

    // Second order at double speed runs to completion.
    write_command(&mut line, "L2", "START:B200:6:60", clock.now());
    let mut waited = 0;
    while line.order().status != OrderStatus::WaitingAck {
        line.tick(clock.advance(), &mut rng);
        waited += 1;
        assert!(waited < 100, "order B200 never completed");
    }

    let packer = line.station("L2_PCK03").expect("packer exists");
    assert_eq!(packer.produced(), 6);
    let coater = line.station("L2_CTG02").expect("coater exists").state();
    assert_eq!(coater.counters.produced, coater.counters.ok + coater.counters.ng);
    assert_eq!(coater.counters.ng_by_type.get(&4).copied().unwrap_or(0), coater.counters.ng);
    assert_eq!(line.read("L2", "order_produced_qty"), Some(&TelemetryValue::Int(6)));
    assert_eq!(line.read("L2", "ack_pending"), Some(&TelemetryValue::Bool(true)));

    write_command(&mut line, "L2", "ACK", clock.now());
    assert!(line.write("L2", "command", TelemetryValue::from("ACK"), clock.now()).is_err());
    for _ in 0..10 {
        line.tick(clock.advance(), &mut rng);
    }
    assert!(line.stations().iter().all(|s| s.phase() == Phase::Idle));
    assert_eq!(line.read("L2", "order_status"), Some(&TelemetryValue::from("IDLE")));
    assert_eq!(line.read("L2", "order_no"), Some(&TelemetryValue::from("B200")));

    let snapshot = compute_metrics(&line);
    assert_eq!(snapshot.order_produced_qty, 6);
    assert_eq!(snapshot.stations_idle, 3);
}
