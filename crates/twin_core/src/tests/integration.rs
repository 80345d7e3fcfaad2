use super::*;
use rand::SeedableRng;

fn alarm_scenario(code: &str, severity: Severity, probability: f64) -> AlarmScenario {
    AlarmScenario {
        definition: AlarmDefinition {
            code: code.to_string(),
            description: format!("{code} injected"),
            severity,
            cause: AlarmCause::External,
        },
        probability,
        duration_ms: (5_000, 11_000),
    }
}

fn alarmed_line(probability: f64) -> LineOrchestrator {
    let mut def = test_fixtures::two_station_def();
    def.stations[0]
        .alarms
        .push(alarm_scenario("W301", Severity::Warning, probability));
    LineOrchestrator::new(def, AlarmPrecedence::default())
}

#[test]
fn alarm_activation_frequency_converges_to_probability() {
    let p = 0.05;
    let mut line = alarmed_line(p);
    let mut clock = ManualClock::default();
    let mut rng = ChaCha8Rng::seed_from_u64(2024);

    let mut trials = 0u32;
    let mut raised = 0u32;
    for _ in 0..30_000 {
        // A trial happens only on ticks where the scenario starts inactive.
        if line.stations()[0].alarms().active_count() == 0 {
            trials += 1;
        }
        let out = line.tick(clock.advance(), &mut rng);
        for event in out.events {
            if let Event::AlarmRaised { duration_ms, .. } = event.event {
                raised += 1;
                assert!((5_000..11_000).contains(&duration_ms), "duration {duration_ms}");
            }
        }
    }

    let freq = f64::from(raised) / f64::from(trials);
    assert!((freq - p).abs() < 0.01, "activation frequency {freq} vs p {p}");
}

#[test]
fn active_alarm_is_displayed_then_cleared() {
    let mut line = alarmed_line(1.0);
    let mut clock = ManualClock::default();
    let mut rng = make_rng();

    let out = line.tick(clock.advance(), &mut rng);
    let duration = out
        .events
        .iter()
        .find_map(|e| match e.event {
            Event::AlarmRaised { duration_ms, .. } => Some(duration_ms),
            _ => None,
        })
        .expect("certain alarm raised on first tick");
    assert_eq!(line.read("L1_CLN01", "alarm_code"), Some(&TelemetryValue::from("W301")));
    assert_eq!(line.read("L1_CLN01", "alarm_level"), Some(&TelemetryValue::from("WARNING")));
    assert_eq!(line.read("L1_PCK02", "alarm_level"), Some(&TelemetryValue::from("INFO")));

    // Alarms are independent of production phase and never stop the line.
    line.handle_command("START:ORD1:1:0", clock.now()).unwrap();

    let mut cleared = false;
    let mut concluded = 0;
    for _ in 0..12 {
        let out = line.tick(clock.advance(), &mut rng);
        concluded += out
            .events
            .iter()
            .filter(|e| matches!(&e.event, Event::CycleConcluded { station_id, .. } if station_id.0 == "L1_CLN01"))
            .count();
        if out
            .events
            .iter()
            .any(|e| matches!(e.event, Event::AlarmCleared { .. }))
        {
            cleared = true;
            assert_eq!(line.read("L1_CLN01", "alarm_code"), Some(&TelemetryValue::from("")));
            assert_eq!(line.read("L1_CLN01", "alarm_level"), Some(&TelemetryValue::from("INFO")));
            break;
        }
    }
    assert!(cleared, "alarm with duration {duration} ms should clear");
    // The alarmed station kept producing while the alarm was shown.
    assert!(concluded >= 1, "no cycle concluded on L1_CLN01");
}

#[test]
fn identical_seeds_produce_identical_event_logs() {
    let run = |seed: u64| -> Vec<(String, u64, String)> {
        let mut line = alarmed_line(0.1);
        let mut clock = ManualClock::default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut log = Vec::new();
        line.handle_command("START:ORD1:4:0", clock.now()).unwrap();
        for _ in 0..40 {
            for event in line.tick(clock.advance(), &mut rng).events {
                log.push((event.id.0.clone(), event.tick, format!("{:?}", event.event)));
            }
        }
        log
    };
    assert_eq!(run(42), run(42), "identical seeds must produce identical event logs");
    assert_ne!(run(42), run(43));
}

#[test]
fn back_to_back_orders_each_reach_their_target() {
    let mut line = two_station_line();
    let mut clock = ManualClock::default();
    let mut rng = make_rng();

    for (order, qty) in [("ORD1", 3u64), ("ORD2", 2), ("ORD3", 4)] {
        line.handle_command(&format!("START:{order}:{qty}:0"), clock.now())
            .unwrap();
        run_line_until(&mut line, &mut clock, &mut rng, 80, |l| {
            l.order().status == OrderStatus::WaitingAck
        });
        assert_eq!(line.order().produced_qty, qty);
        line.handle_command("ACK", clock.now()).unwrap();
        run_line_until(&mut line, &mut clock, &mut rng, 20, |l| {
            l.order().status == OrderStatus::Idle
        });
        assert_eq!(
            line.read("L1", "order_produced_qty"),
            Some(&TelemetryValue::from(qty))
        );
    }
}

#[test]
fn event_ids_are_unique_and_ordered() {
    let mut line = two_station_line();
    let mut clock = ManualClock::default();
    let mut rng = make_rng();
    let mut ids = line
        .handle_command("START:ORD1:2:0", clock.now())
        .unwrap()
        .into_iter()
        .map(|e| e.id.0)
        .collect::<Vec<_>>();
    for _ in 0..15 {
        ids.extend(line.tick(clock.advance(), &mut rng).events.into_iter().map(|e| e.id.0));
    }
    let mut sorted = ids.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(ids, sorted);
}

#[test]
fn station_state_and_events_serialize() {
    let mut line = two_station_line();
    let mut clock = ManualClock::default();
    let mut rng = make_rng();
    line.handle_command("START:ORD1:1:0", clock.now()).unwrap();
    let mut events = Vec::new();
    for _ in 0..4 {
        events.extend(line.tick(clock.advance(), &mut rng).events);
    }
    let state = serde_json::to_value(line.stations()[0].state()).unwrap();
    assert_eq!(state["phase"], "COMPLETING");
    assert_eq!(state["counters"]["produced"], 1);
    let json = serde_json::to_string(&events).unwrap();
    assert!(json.contains("\"WorkItemReleased\""));
}
