//! # trafsim-model
//!
//! Scenario loading and simulation building for TrafSim.
//!
//! This crate provides:
//! - Scenario schema types, loadable from YAML or generated from role counts
//! - The topology builder binding each leaf to its nearest relay
//! - [`build_simulation`], which assembles entities and seeds initial events

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};
use trafsim_common::{
    EntityId, EntityRegistry, Event, EventId, EventPayload, Role, SimTime,
};
use trafsim_control::{ControlPlane, ControllerLayout, SamplerConfig, ScriptedNetwork};
use trafsim_nodes::{DutyCycle, NodeApp, SharedSensorLog, TransmitterConfig, TIMER_START, TIMER_STOP};
use trafsim_packet::sensorlog::{SensorLogReader, SensorLogWriter};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading or building a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error (missing or unopenable input/output file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Degenerate topology input.
    #[error("no relay nodes available for leaf association")]
    NoRelays,
}

// ============================================================================
// Positions
// ============================================================================

/// Cartesian position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate (ground level when omitted).
    #[serde(default)]
    pub z: f64,
}

impl Position {
    /// Create a ground-level position.
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y, z: 0.0 }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

// ============================================================================
// Scenario Schema
// ============================================================================

/// One node in the scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node role.
    pub role: Role,
    /// Static position.
    pub position: Position,
    /// Optional name; derived from the role and node id when omitted.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional explicit stop time; nodes without one run until the
    /// simulation ends.
    #[serde(default)]
    pub stop_time_s: Option<f64>,
}

/// Scenario-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioDefaults {
    /// Leaf payload size in bytes.
    pub leaf_packet_size: u32,
    /// Relay payload size in bytes.
    pub relay_packet_size: u32,
    /// Frames each node may send before stopping.
    pub packet_budget: u32,
    /// Transmission rate in bits per second.
    pub data_rate_bps: u32,
    /// Base application start time.
    pub start_time_s: f64,
    /// Additional start delay per leaf ordinal.
    pub leaf_start_stagger_s: f64,
    /// Whether leaves may raise the emergency flag.
    pub emergency_capable: bool,
    /// Inclusive lower bound of the vehicle-count distribution.
    pub count_min: u32,
    /// Inclusive upper bound of the vehicle-count distribution.
    pub count_max: u32,
    /// Counts strictly above this raise the emergency flag.
    pub emergency_threshold: u32,
    /// Constrained-node delay before the sleep-entry transition.
    pub wake_offset_s: f64,
    /// Constrained-node initial sleep duration.
    pub initial_sleep_s: f64,
    /// Optional recurring duty cycle for leaves.
    pub duty_cycle: Option<DutyCycle>,
    /// Control-plane sampling cadence.
    pub sampler: SamplerConfig,
}

impl Default for ScenarioDefaults {
    fn default() -> Self {
        ScenarioDefaults {
            leaf_packet_size: 512,
            relay_packet_size: 1024,
            packet_budget: 1000,
            data_rate_bps: 1000,
            start_time_s: 1.0,
            leaf_start_stagger_s: 0.1,
            emergency_capable: true,
            count_min: 0,
            count_max: 9,
            emergency_threshold: 8,
            wake_offset_s: 0.5,
            initial_sleep_s: 1.0,
            duty_cycle: None,
            sampler: SamplerConfig::default(),
        }
    }
}

/// A simulation scenario: nodes plus shared defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Node definitions.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// Scenario-wide defaults.
    #[serde(default)]
    pub defaults: ScenarioDefaults,
}

impl Scenario {
    /// Load a scenario from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        Ok(serde_yaml::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Generate a scenario with the standard deployment layout: one root
    /// collector at (50, 50), relays on a grid from (30, 30) with 20 m
    /// spacing and two columns, and leaves placed uniformly at random in the
    /// 100 m × 100 m square.
    pub fn generate(num_leaves: u32, num_relays: u32, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut nodes = Vec::new();

        nodes.push(NodeSpec {
            role: Role::Root,
            position: Position::new(50.0, 50.0),
            name: None,
            stop_time_s: None,
        });
        for i in 0..num_relays {
            nodes.push(NodeSpec {
                role: Role::Relay,
                position: Position::new(30.0 + 20.0 * (i % 2) as f64, 30.0 + 20.0 * (i / 2) as f64),
                name: None,
                stop_time_s: None,
            });
        }
        for _ in 0..num_leaves {
            nodes.push(NodeSpec {
                role: Role::Leaf,
                position: Position::new(rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)),
                name: None,
                stop_time_s: None,
            });
        }

        Scenario {
            nodes,
            defaults: ScenarioDefaults::default(),
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Immutable leaf → relay association with the fixed two-hop root path.
#[derive(Debug, Clone, Default)]
pub struct TopologyMap {
    assignments: BTreeMap<u32, u32>,
    root: u32,
}

impl TopologyMap {
    /// The relay assigned to a leaf.
    pub fn assigned_relay(&self, leaf: u32) -> Option<u32> {
        self.assignments.get(&leaf).copied()
    }

    /// The fixed two-hop route leaf → relay → root.
    pub fn path(&self, leaf: u32) -> Option<[u32; 2]> {
        self.assigned_relay(leaf).map(|relay| [relay, self.root])
    }

    /// Number of associated leaves.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Whether any leaf is associated.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Iterate over `(leaf, relay)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.assignments.iter().map(|(&l, &r)| (l, r))
    }
}

/// Assign every leaf to its geometrically nearest relay.
///
/// Distances compare with strict `<` over relay iteration order, so an exact
/// tie keeps the lowest-indexed relay. Fails on zero relays; it must never
/// silently pick an undefined one.
pub fn build_topology(
    leaves: &[(u32, Position)],
    relays: &[(u32, Position)],
    root: u32,
) -> Result<TopologyMap, ScenarioError> {
    if relays.is_empty() {
        return Err(ScenarioError::NoRelays);
    }

    let mut assignments = BTreeMap::new();
    for (leaf_id, leaf_pos) in leaves {
        let mut closest = 0usize;
        let mut min_distance = f64::MAX;
        for (index, (_, relay_pos)) in relays.iter().enumerate() {
            let distance = leaf_pos.distance_to(relay_pos);
            if distance < min_distance {
                min_distance = distance;
                closest = index;
            }
        }
        debug!(
            "leaf {} associated with relay {} at distance {:.2}",
            leaf_id, relays[closest].0, min_distance
        );
        assignments.insert(*leaf_id, relays[closest].0);
    }

    Ok(TopologyMap { assignments, root })
}

// ============================================================================
// Built Simulation
// ============================================================================

/// Build-time description of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Node role.
    pub role: Role,
    /// Node id (used in measurements and junction keys).
    pub node_id: u32,
    /// Entity id in the registry.
    pub entity_id: u64,
    /// Static position.
    pub position: Position,
    /// Application start time, if the node runs a transmitter.
    pub start_time: Option<SimTime>,
    /// Explicit stop time, if configured.
    pub stop_time: Option<SimTime>,
}

/// Result of building a simulation from a scenario.
pub struct BuiltSimulation {
    /// Entity registry with all entities.
    pub entities: EntityRegistry,
    /// Initial events to seed the event queue.
    pub initial_events: Vec<Event>,
    /// Per-node build information.
    pub node_infos: Vec<NodeInfo>,
    /// The leaf → relay association.
    pub topology: TopologyMap,
    /// Handle to the scripted traffic network for inspecting applied
    /// programs.
    pub network: ScriptedNetwork,
    /// Shared producer handle to the sensor log.
    pub sensor_log: SharedSensorLog,
}

/// Options for [`build_simulation`].
pub struct BuildOptions {
    /// Path of the sensor log to create.
    pub sensor_log_path: PathBuf,
    /// Controller layout; derived one-per-junction from the leaf ids when
    /// omitted.
    pub controllers: Option<ControllerLayout>,
}

/// Build a simulation from a scenario.
///
/// Node ids are allocated root-first, then relays, then leaves, matching the
/// id order junction keys are derived from.
pub fn build_simulation(
    scenario: &Scenario,
    opts: &BuildOptions,
) -> Result<BuiltSimulation, ScenarioError> {
    let defaults = &scenario.defaults;

    // Partition the scenario by role, keeping declaration order within each.
    let roots: Vec<&NodeSpec> = scenario.nodes.iter().filter(|n| n.role == Role::Root).collect();
    let relays: Vec<&NodeSpec> = scenario.nodes.iter().filter(|n| n.role == Role::Relay).collect();
    let leaves: Vec<&NodeSpec> = scenario.nodes.iter().filter(|n| n.role == Role::Leaf).collect();

    if roots.is_empty() {
        return Err(ScenarioError::InvalidConfig(
            "scenario requires a root collector".to_string(),
        ));
    }
    if roots.len() > 1 {
        return Err(ScenarioError::InvalidConfig(format!(
            "scenario has {} root collectors, expected exactly one",
            roots.len()
        )));
    }

    // Node ids and entity ids are allocated in role order. The interface
    // table mirrors this order for uplink resolution.
    let ordered: Vec<&NodeSpec> = roots
        .iter()
        .chain(relays.iter())
        .chain(leaves.iter())
        .copied()
        .collect();
    let interfaces: Vec<EntityId> = (0..ordered.len() as u64).map(EntityId::new).collect();

    let root_id: u32 = 0;
    let relay_ids: Vec<u32> = (0..relays.len() as u32).map(|i| 1 + i).collect();
    let leaf_ids: Vec<u32> = (0..leaves.len() as u32)
        .map(|i| 1 + relays.len() as u32 + i)
        .collect();

    let relay_positions: Vec<(u32, Position)> = relay_ids
        .iter()
        .zip(relays.iter())
        .map(|(&id, spec)| (id, spec.position))
        .collect();
    let leaf_positions: Vec<(u32, Position)> = leaf_ids
        .iter()
        .zip(leaves.iter())
        .map(|(&id, spec)| (id, spec.position))
        .collect();

    let topology = build_topology(&leaf_positions, &relay_positions, root_id)?;
    let relay_index_by_id: BTreeMap<u32, usize> = relay_ids
        .iter()
        .enumerate()
        .map(|(index, &id)| (id, index))
        .collect();

    // The sensor log is created before the control plane opens its own read
    // handle, so an unopenable path fails the whole build fast.
    let sensor_log: SharedSensorLog =
        Arc::new(Mutex::new(SensorLogWriter::create(&opts.sensor_log_path)?));

    let mut entities = EntityRegistry::new();
    let mut initial_events = Vec::new();
    let mut event_id_counter: u64 = 0;
    let mut node_infos = Vec::new();

    let push_timer =
        |events: &mut Vec<Event>, counter: &mut u64, entity: EntityId, time: SimTime, timer_id: u64| {
            events.push(Event {
                id: EventId(*counter),
                time,
                source: entity,
                targets: vec![entity],
                payload: EventPayload::Timer { timer_id },
            });
            *counter += 1;
        };

    // Root collector.
    {
        let entity = interfaces[0];
        let name = roots[0]
            .name
            .clone()
            .unwrap_or_else(|| format!("FPC{}", root_id));
        entities.register(Box::new(NodeApp::root(entity, root_id, name.clone())));
        node_infos.push(NodeInfo {
            name,
            role: Role::Root,
            node_id: root_id,
            entity_id: entity.0,
            position: roots[0].position,
            start_time: None,
            stop_time: None,
        });
    }

    // Relays: non-constrained transmitters uplinked straight to the root.
    let relay_config = TransmitterConfig {
        packet_size: defaults.relay_packet_size,
        packet_budget: defaults.packet_budget,
        data_rate_bps: defaults.data_rate_bps,
        constrained: false,
        emergency_capable: false,
        ..TransmitterConfig::default()
    };
    for (index, spec) in relays.iter().enumerate() {
        let node_id = relay_ids[index];
        let entity = interfaces[1 + index];
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("FFD{}", node_id));
        let start = SimTime::from_secs(defaults.start_time_s);
        entities.register(Box::new(NodeApp::relay(
            entity,
            node_id,
            name.clone(),
            relay_config.clone(),
            interfaces[0],
        )));
        push_timer(&mut initial_events, &mut event_id_counter, entity, start, TIMER_START);
        let stop_time = spec.stop_time_s.map(SimTime::from_secs);
        if let Some(stop) = stop_time {
            push_timer(&mut initial_events, &mut event_id_counter, entity, stop, TIMER_STOP);
        }
        node_infos.push(NodeInfo {
            name,
            role: Role::Relay,
            node_id,
            entity_id: entity.0,
            position: spec.position,
            start_time: Some(start),
            stop_time,
        });
    }

    // Leaves: constrained sensors uplinked to their assigned relay.
    let leaf_config = TransmitterConfig {
        packet_size: defaults.leaf_packet_size,
        packet_budget: defaults.packet_budget,
        data_rate_bps: defaults.data_rate_bps,
        constrained: true,
        emergency_capable: defaults.emergency_capable,
        count_min: defaults.count_min,
        count_max: defaults.count_max,
        emergency_threshold: defaults.emergency_threshold,
        wake_offset_s: defaults.wake_offset_s,
        initial_sleep_s: defaults.initial_sleep_s,
        duty_cycle: defaults.duty_cycle,
    };
    for (index, spec) in leaves.iter().enumerate() {
        let node_id = leaf_ids[index];
        let entity = interfaces[1 + relays.len() + index];
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("RFD{}", node_id));

        // Resolve the uplink through the interface table. An out-of-range
        // derived index leaves the node isolated; the simulation continues.
        let uplink = topology.assigned_relay(node_id).and_then(|relay_id| {
            let relay_index = relay_index_by_id[&relay_id];
            let interface_index = 1 + relay_index;
            match interfaces.get(interface_index) {
                Some(&target) => {
                    debug!(
                        "assigning interface for leaf {} to relay {} with interface index {}",
                        node_id, relay_id, interface_index
                    );
                    Some(target)
                }
                None => {
                    error!("interface index out of bounds: {}", interface_index);
                    None
                }
            }
        });

        let start = SimTime::from_secs(
            defaults.start_time_s + defaults.leaf_start_stagger_s * index as f64,
        );
        entities.register(Box::new(NodeApp::leaf(
            entity,
            node_id,
            name.clone(),
            leaf_config.clone(),
            uplink,
            sensor_log.clone(),
        )));
        push_timer(&mut initial_events, &mut event_id_counter, entity, start, TIMER_START);
        let stop_time = spec.stop_time_s.map(SimTime::from_secs);
        if let Some(stop) = stop_time {
            push_timer(&mut initial_events, &mut event_id_counter, entity, stop, TIMER_STOP);
        }
        node_infos.push(NodeInfo {
            name,
            role: Role::Leaf,
            node_id,
            entity_id: entity.0,
            position: spec.position,
            start_time: Some(start),
            stop_time,
        });
    }

    // Control plane: independent read handle over the just-created log, and
    // the scripted traffic network behind the control interface.
    let layout = opts
        .controllers
        .clone()
        .unwrap_or_else(|| ControllerLayout::one_per_junction(leaf_ids.iter().copied()));
    let network = ScriptedNetwork::new(layout);
    let control_entity = EntityId::new(ordered.len() as u64);
    let reader = SensorLogReader::open(&opts.sensor_log_path)?;
    entities.register(Box::new(ControlPlane::new(
        control_entity,
        reader,
        Box::new(network.clone()),
        defaults.sampler,
    )));
    push_timer(
        &mut initial_events,
        &mut event_id_counter,
        control_entity,
        SimTime::ZERO,
        trafsim_control::TIMER_SAMPLE,
    );

    Ok(BuiltSimulation {
        entities,
        initial_events,
        node_infos,
        topology,
        network,
        sensor_log,
    })
}

// ============================================================================
// Tests
// ============================================================================
