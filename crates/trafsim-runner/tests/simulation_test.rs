//! End-to-end simulation tests for the TrafSim runner.
//!
//! These tests build scenarios in temp directories, drive the event loop
//! in-process, and verify the externally observable behavior: the sensor
//! log contents, send cadence, stop semantics, and the traffic-light
//! programs applied through the control interface.

use std::path::PathBuf;
use tempfile::TempDir;
use trafsim_common::{Role, SimTime};
use trafsim_control::{LightProgram, TrafficLightControl};
use trafsim_model::{build_simulation, BuildOptions, NodeSpec, Position, Scenario};
use trafsim_runner::animation::write_animation_metadata;
use trafsim_runner::{EventLoop, SimulationStats};

// ============================================================================
// Test Helper Functions
// ============================================================================

struct RunResult {
    stats: SimulationStats,
    network: trafsim_control::ScriptedNetwork,
    log_rows: Vec<(f64, u32, u32, u8)>,
    _dir: TempDir,
}

/// A minimal three-node scenario: one root, one relay, one leaf. The leaf
/// gets node id 2 and junction key J2.
fn three_node_scenario() -> Scenario {
    Scenario {
        nodes: vec![
            NodeSpec {
                role: Role::Root,
                position: Position::new(50.0, 50.0),
                name: None,
                stop_time_s: None,
            },
            NodeSpec {
                role: Role::Relay,
                position: Position::new(30.0, 30.0),
                name: None,
                stop_time_s: None,
            },
            NodeSpec {
                role: Role::Leaf,
                position: Position::new(10.0, 10.0),
                name: None,
                stop_time_s: None,
            },
        ],
        defaults: Default::default(),
    }
}

/// Build and run a scenario, returning the stats, the traffic network
/// handle, and the parsed sensor log rows.
fn run_scenario(scenario: &Scenario, seed: u64, duration_s: f64) -> RunResult {
    let dir = TempDir::new().expect("failed to create temp dir");
    let log_path: PathBuf = dir.path().join("traffic_sensor_data.csv");
    let opts = BuildOptions {
        sensor_log_path: log_path.clone(),
        controllers: None,
    };

    let simulation = build_simulation(scenario, &opts).expect("failed to build simulation");
    let network = simulation.network.clone();
    let mut event_loop = EventLoop::new(simulation, seed);
    let stats = event_loop
        .run(SimTime::from_secs(duration_s))
        .expect("simulation failed");

    let content = std::fs::read_to_string(&log_path).expect("failed to read sensor log");
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("Time,NodeID,VehicleCount,Emergency"));
    let log_rows = lines
        .map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 4, "unexpected row: {:?}", line);
            (
                fields[0].parse::<f64>().unwrap(),
                fields[1].parse::<u32>().unwrap(),
                fields[2].parse::<u32>().unwrap(),
                fields[3].parse::<u8>().unwrap(),
            )
        })
        .collect();

    RunResult {
        stats,
        network,
        log_rows,
        _dir: dir,
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_generated_scenario_end_to_end() {
    let scenario = Scenario::generate(10, 3, 42);
    let result = run_scenario(&scenario, 42, 30.0);

    // Every leaf reported at least once; counts stay in the configured range
    // and node ids stay in the leaf range (4..=13 after 1 root + 3 relays).
    assert!(result.log_rows.len() >= 10);
    for (time, node_id, count, emergency) in &result.log_rows {
        assert!(*time > 0.0);
        assert!((4..=13).contains(node_id));
        assert!(*count <= 9);
        assert!(*emergency <= 1);
        // Emergency only on counts strictly above the threshold.
        if *emergency == 1 {
            assert!(*count > 8);
        }
    }

    // Reports flowed leaf → relay → root.
    assert!(result.stats.frames_sent > 0);
    assert!(result.stats.frames_forwarded > 0);
    assert!(result.stats.frames_delivered > 0);
    assert!(result.stats.total_events > 0);

    // The control plane emitted program commands for the leaf controllers.
    let applied = result.network.applied_programs();
    assert!(!applied.is_empty());
    let valid = ["emergency", "heavy_traffic", "light_traffic", "normal"];
    for (controller, program) in &applied {
        assert!(controller.starts_with("TL"));
        assert!(valid.contains(&program.as_label()));
    }
    // Idempotent emission: with 10 controllers and a 5-second period over
    // 30 seconds, each sampling pass re-applies every controller.
    assert!(applied.len() >= 10 * 5);
}

#[test]
fn test_constrained_send_cadence() {
    let scenario = three_node_scenario();
    let result = run_scenario(&scenario, 7, 30.0);

    // packet_size * 8 / rate = 512 * 8 / 1000 = 4.096 seconds per cycle,
    // starting after start (1.0) + wake offset (0.5) + initial sleep (1.0).
    let times: Vec<f64> = result.log_rows.iter().map(|r| r.0).collect();
    assert_eq!(times.len(), 6);
    assert!((times[0] - 6.596).abs() < 1e-6);
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0], "timestamps must strictly increase");
        assert!(((pair[1] - pair[0]) - 4.096).abs() < 1e-6);
    }

    // All rows come from the single leaf (node id 2).
    assert!(result.log_rows.iter().all(|r| r.1 == 2));

    // Each report was forwarded by the relay and delivered to the root,
    // alongside the relay's own status frames.
    assert_eq!(result.stats.frames_forwarded, 6);
    assert!(result.stats.frames_delivered >= 6);
}

#[test]
fn test_stop_cancels_pending_send() {
    let mut scenario = three_node_scenario();
    scenario.nodes[2].stop_time_s = Some(12.0);
    let result = run_scenario(&scenario, 7, 30.0);

    // Sends at 6.596 and 10.692 happened; the one pending at 14.788 was
    // cancelled by the stop, so nothing is logged after the stop time.
    assert_eq!(result.log_rows.len(), 2);
    assert!(result.log_rows.iter().all(|r| r.0 <= 12.0));
    assert!(result.stats.events_cancelled >= 1);
}

#[test]
fn test_packet_budget_limits_reports() {
    let mut scenario = three_node_scenario();
    scenario.defaults.packet_budget = 3;
    let result = run_scenario(&scenario, 9, 60.0);

    assert_eq!(result.log_rows.len(), 3);
    assert_eq!(result.stats.frames_forwarded, 3);
}

#[test]
fn test_emergency_reading_preempts_controller() {
    // A constant reading of 9 exceeds the threshold on every cycle, so the
    // leaf's controller must end in emergency mode.
    let mut scenario = three_node_scenario();
    scenario.defaults.count_min = 9;
    scenario.defaults.count_max = 9;
    let result = run_scenario(&scenario, 3, 20.0);

    assert!(result.log_rows.iter().all(|r| r.2 == 9 && r.3 == 1));
    assert_eq!(
        result.network.active_program("TL2"),
        Some(LightProgram::Emergency)
    );
}

#[test]
fn test_heavy_traffic_without_emergency_capability() {
    // Same constant reading, but the node cannot raise the emergency flag:
    // 9 > 8 selects the heavy-traffic program instead.
    let mut scenario = three_node_scenario();
    scenario.defaults.count_min = 9;
    scenario.defaults.count_max = 9;
    scenario.defaults.emergency_capable = false;
    let result = run_scenario(&scenario, 3, 20.0);

    assert!(result.log_rows.iter().all(|r| r.3 == 0));
    assert_eq!(
        result.network.active_program("TL2"),
        Some(LightProgram::HeavyTraffic)
    );
}

#[test]
fn test_light_traffic_on_low_readings() {
    let mut scenario = three_node_scenario();
    scenario.defaults.count_min = 0;
    scenario.defaults.count_max = 0;
    let result = run_scenario(&scenario, 3, 20.0);

    assert_eq!(
        result.network.active_program("TL2"),
        Some(LightProgram::LightTraffic)
    );
}

#[test]
fn test_controllers_cover_every_leaf() {
    let scenario = Scenario::generate(5, 2, 1);
    let result = run_scenario(&scenario, 1, 10.0);

    let mut controllers = result.network.controller_ids();
    controllers.sort();
    // Leaves get node ids 3..=7 after 1 root + 2 relays.
    assert_eq!(controllers, vec!["TL3", "TL4", "TL5", "TL6", "TL7"]);
}

#[test]
fn test_animation_metadata_output() {
    let dir = TempDir::new().unwrap();
    let opts = BuildOptions {
        sensor_log_path: dir.path().join("sensor.csv"),
        controllers: None,
    };
    let scenario = Scenario::generate(2, 1, 5);
    let simulation = build_simulation(&scenario, &opts).unwrap();

    let path = dir.path().join("animation-metadata.json");
    write_animation_metadata(&path, &simulation.node_infos).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
    let entries = parsed.as_array().unwrap();
    assert_eq!(entries.len(), 4);

    assert_eq!(entries[0]["description"], "FPC");
    assert_eq!(entries[0]["color"], serde_json::json!([255, 0, 0]));
    assert_eq!(entries[1]["description"], "FFD");
    assert_eq!(entries[1]["color"], serde_json::json!([0, 255, 0]));
    assert_eq!(entries[2]["description"], "RFD");
    assert_eq!(entries[2]["color"], serde_json::json!([0, 0, 255]));
}
