//! # trafsim-control
//!
//! Traffic control plane for TrafSim.
//!
//! This crate provides:
//! - Aggregation of sensor-log records into per-junction traffic state
//!   ([`aggregate_records`], [`TrafficRecord`])
//! - The traffic-light decision engine ([`decide_program`],
//!   [`adjust_traffic_lights`])
//! - The control interface to the external traffic micro-simulator
//!   ([`TrafficLightControl`]) and an in-memory scripted implementation
//!   ([`ScriptedNetwork`])
//! - The periodic sampling entity ([`ControlPlane`])
//!
//! The control plane deliberately depends only on the durable sensor log,
//! never on delivery through the simulated network.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use trafsim_common::{Entity, EntityId, Event, EventPayload, SimContext, SimError, SimTime};
use trafsim_packet::sensorlog::{LogRecord, SensorLogReader};

// ============================================================================
// Error Types
// ============================================================================

/// Errors from the control plane.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Controller id not known to the traffic network.
    #[error("unknown traffic-light controller: {0}")]
    UnknownController(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error in a controller layout file.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// ============================================================================
// Programs
// ============================================================================

/// A traffic-light control program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightProgram {
    /// Emergency pre-emption.
    Emergency,
    /// More than 8 vehicles across the controlled junctions.
    HeavyTraffic,
    /// Fewer than 3 vehicles across the controlled junctions.
    LightTraffic,
    /// Everything in between.
    Normal,
}

impl LightProgram {
    /// Program name accepted by the external traffic simulator.
    pub fn as_label(&self) -> &'static str {
        match self {
            LightProgram::Emergency => "emergency",
            LightProgram::HeavyTraffic => "heavy_traffic",
            LightProgram::LightTraffic => "light_traffic",
            LightProgram::Normal => "normal",
        }
    }
}

impl std::fmt::Display for LightProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Latest known traffic state for one junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrafficRecord {
    /// Most recent vehicle count reported for the junction.
    pub vehicle_count: u32,
    /// Most recent emergency flag.
    pub emergency: bool,
}

/// Junction key for a numeric sensor node id.
pub fn junction_key(node_id: u32) -> String {
    format!("J{}", node_id)
}

/// Rebuild the per-junction table from scratch.
///
/// Later records overwrite earlier ones for the same source id (last write
/// wins, no history), then source ids map to junction keys.
pub fn aggregate_records(records: &[LogRecord]) -> BTreeMap<String, TrafficRecord> {
    let mut latest: BTreeMap<u32, TrafficRecord> = BTreeMap::new();
    for record in records {
        latest.insert(
            record.node_id,
            TrafficRecord {
                vehicle_count: record.vehicle_count,
                emergency: record.emergency,
            },
        );
    }
    latest
        .into_iter()
        .map(|(id, record)| (junction_key(id), record))
        .collect()
}

// ============================================================================
// Decision Engine
// ============================================================================

/// Select the program for one controller from its aggregated state.
///
/// First match wins; emergency always dominates. The boundary totals 8 and 3
/// fall through to `Normal`.
pub fn decide_program(total_vehicles: u32, emergency: bool) -> LightProgram {
    if emergency {
        LightProgram::Emergency
    } else if total_vehicles > 8 {
        LightProgram::HeavyTraffic
    } else if total_vehicles < 3 {
        LightProgram::LightTraffic
    } else {
        LightProgram::Normal
    }
}

/// Run one full decision pass: one program-set command per controller,
/// emitted even when the program is unchanged from the previous pass.
///
/// Returns the applied `(controller, program)` pairs.
pub fn adjust_traffic_lights(
    client: &mut dyn TrafficLightControl,
    records: &BTreeMap<String, TrafficRecord>,
) -> Vec<(String, LightProgram)> {
    let mut applied = Vec::new();
    for controller in client.controller_ids() {
        let mut total_vehicles: u32 = 0;
        let mut emergency = false;
        for junction in client.controlled_junctions(&controller) {
            if let Some(record) = records.get(&junction) {
                total_vehicles += record.vehicle_count;
                emergency |= record.emergency;
            }
        }

        let program = decide_program(total_vehicles, emergency);
        match program {
            LightProgram::Emergency => {
                info!("emergency detected at {}, setting emergency mode", controller)
            }
            LightProgram::HeavyTraffic => {
                info!("heavy traffic at {}, total vehicles: {}", controller, total_vehicles)
            }
            LightProgram::LightTraffic => {
                info!("light traffic at {}, total vehicles: {}", controller, total_vehicles)
            }
            LightProgram::Normal => {
                info!("normal traffic at {}, total vehicles: {}", controller, total_vehicles)
            }
        }

        if let Err(e) = client.set_program(&controller, program) {
            warn!("failed to set program for {}: {}", controller, e);
            continue;
        }
        applied.push((controller, program));
    }

    // Diagnostic only: mobile entities currently active in the network.
    let vehicles = client.vehicle_ids();
    debug!("{} vehicles active in the traffic network", vehicles.len());

    applied
}

// ============================================================================
// Traffic Network Interface
// ============================================================================

/// Control interface to the external traffic micro-simulator.
///
/// Only the operations the control plane consumes are modeled; the
/// simulator's internal traffic dynamics stay behind this boundary.
pub trait TrafficLightControl: Send {
    /// Enumerate the traffic-light controller ids.
    fn controller_ids(&self) -> Vec<String>;

    /// Enumerate the junctions controlled by a controller.
    fn controlled_junctions(&self, controller: &str) -> Vec<String>;

    /// Activate a program on a controller.
    fn set_program(&mut self, controller: &str, program: LightProgram)
        -> Result<(), ControlError>;

    /// Enumerate active mobile-entity ids (diagnostic only).
    fn vehicle_ids(&self) -> Vec<String>;
}

/// Declarative controller layout for the scripted network.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerLayout {
    /// Controller id → junctions it governs.
    pub controllers: BTreeMap<String, Vec<String>>,
    /// Mobile-entity ids reported by the diagnostic enumeration.
    #[serde(default)]
    pub vehicles: Vec<String>,
}

impl ControllerLayout {
    /// Load a layout from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ControlError> {
        Ok(serde_yaml::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Derive the default layout: one controller per junction, `TL<id>`
    /// governing `J<id>`.
    pub fn one_per_junction(node_ids: impl IntoIterator<Item = u32>) -> Self {
        let controllers = node_ids
            .into_iter()
            .map(|id| (format!("TL{}", id), vec![junction_key(id)]))
            .collect();
        ControllerLayout {
            controllers,
            vehicles: Vec::new(),
        }
    }
}

/// In-memory stand-in for the external traffic network control channel.
///
/// Records every applied program so simulation runs and tests can inspect
/// the command stream. Clones share state.
#[derive(Clone)]
pub struct ScriptedNetwork {
    inner: Arc<Mutex<ScriptedState>>,
}

struct ScriptedState {
    layout: ControllerLayout,
    active: BTreeMap<String, LightProgram>,
    applied: Vec<(String, LightProgram)>,
}

impl ScriptedNetwork {
    /// Create a scripted network from a controller layout.
    pub fn new(layout: ControllerLayout) -> Self {
        ScriptedNetwork {
            inner: Arc::new(Mutex::new(ScriptedState {
                layout,
                active: BTreeMap::new(),
                applied: Vec::new(),
            })),
        }
    }

    /// Currently active program for a controller, if any was ever set.
    pub fn active_program(&self, controller: &str) -> Option<LightProgram> {
        self.inner.lock().active.get(controller).copied()
    }

    /// Every `(controller, program)` command applied so far, in order.
    pub fn applied_programs(&self) -> Vec<(String, LightProgram)> {
        self.inner.lock().applied.clone()
    }
}

impl TrafficLightControl for ScriptedNetwork {
    fn controller_ids(&self) -> Vec<String> {
        self.inner.lock().layout.controllers.keys().cloned().collect()
    }

    fn controlled_junctions(&self, controller: &str) -> Vec<String> {
        self.inner
            .lock()
            .layout
            .controllers
            .get(controller)
            .cloned()
            .unwrap_or_default()
    }

    fn set_program(
        &mut self,
        controller: &str,
        program: LightProgram,
    ) -> Result<(), ControlError> {
        let mut state = self.inner.lock();
        if !state.layout.controllers.contains_key(controller) {
            return Err(ControlError::UnknownController(controller.to_string()));
        }
        state.active.insert(controller.to_string(), program);
        state.applied.push((controller.to_string(), program));
        Ok(())
    }

    fn vehicle_ids(&self) -> Vec<String> {
        self.inner.lock().layout.vehicles.clone()
    }
}

// ============================================================================
// Sampling Entity
// ============================================================================

/// Sampler cadence configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// External simulator step length in seconds.
    pub step_length_s: f64,
    /// Sensor data is processed every this many steps.
    pub sample_interval_steps: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        // 0.1s steps, every 50th step: a 5-second sampling period.
        SamplerConfig {
            step_length_s: 0.1,
            sample_interval_steps: 50,
        }
    }
}

impl SamplerConfig {
    /// The resulting sampling period.
    pub fn period(&self) -> SimTime {
        SimTime::from_secs(self.step_length_s * self.sample_interval_steps as f64)
    }
}

/// Timer id for the periodic sampling tick.
pub const TIMER_SAMPLE: u64 = 0;

/// Control-plane entity.
///
/// On each sampling tick it re-reads the full sensor log, rebuilds the
/// per-junction table, and runs one decision pass against the traffic
/// network. A failed re-read is retried naturally on the next tick.
pub struct ControlPlane {
    id: EntityId,
    reader: SensorLogReader,
    client: Box<dyn TrafficLightControl>,
    config: SamplerConfig,
    passes: u64,
    programs_applied: u64,
}

impl ControlPlane {
    /// Create the control plane entity.
    pub fn new(
        id: EntityId,
        reader: SensorLogReader,
        client: Box<dyn TrafficLightControl>,
        config: SamplerConfig,
    ) -> Self {
        ControlPlane {
            id,
            reader,
            client,
            config,
            passes: 0,
            programs_applied: 0,
        }
    }

    /// Completed sampling passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Total program-set commands emitted.
    pub fn programs_applied(&self) -> u64 {
        self.programs_applied
    }

    fn on_sample(&mut self, ctx: &mut SimContext) {
        match self.reader.read_all() {
            Ok(records) => {
                let table = aggregate_records(&records);
                info!(
                    "adjusting traffic light timings based on sensor data at time {:.1}",
                    ctx.time().as_secs_f64()
                );
                let applied = adjust_traffic_lights(self.client.as_mut(), &table);
                self.programs_applied += applied.len() as u64;
                self.passes += 1;
            }
            Err(e) => warn!("sensor log re-read failed, retrying next cycle: {}", e),
        }

        ctx.post_event(
            self.config.period(),
            vec![self.id],
            EventPayload::Timer {
                timer_id: TIMER_SAMPLE,
            },
        );
    }
}

impl Entity for ControlPlane {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Timer {
            timer_id: TIMER_SAMPLE,
        } = event.payload
        {
            self.on_sample(ctx);
        }
        Ok(())
    }
}

/// One-shot control pass over an existing sensor log file.
pub fn run_control_pass(
    log_path: &Path,
    client: &mut dyn TrafficLightControl,
) -> Result<Vec<(String, LightProgram)>, ControlError> {
    let mut reader = SensorLogReader::open(log_path)?;
    let records = reader.read_all()?;
    let table = aggregate_records(&records);
    Ok(adjust_traffic_lights(client, &table))
}

// ============================================================================
// Tests
// ============================================================================
