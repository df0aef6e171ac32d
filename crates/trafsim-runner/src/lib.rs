//! # trafsim-runner library
//!
//! Library interface for the TrafSim simulation runner.
//!
//! The [`EventLoop`] executes a built simulation: it pops events in
//! non-decreasing time order (FIFO for events scheduled at the same
//! instant), dispatches them to their target entities, collects the events
//! those handlers schedule, and discards events whose handles were
//! cancelled before they fired.

pub mod animation;

use serde::Serialize;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;
use thiserror::Error;
use trafsim_common::{EntityId, Event, EventId, EventPayload, Frame, SimContext, SimError, SimTime};
use trafsim_control::ScriptedNetwork;
use trafsim_model::{BuiltSimulation, NodeInfo, ScenarioError};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during a simulation run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Scenario error.
    #[error("scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    /// Simulation error.
    #[error("simulation error: {0}")]
    Simulation(#[from] SimError),

    /// Control-plane error.
    #[error("control error: {0}")]
    Control(#[from] trafsim_control::ControlError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

// ============================================================================
// Simulation Statistics
// ============================================================================

/// Per-node statistics, keyed by entity id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    /// Frames originated by this node.
    pub sent: u64,
    /// Frames retransmitted by this node.
    pub forwarded: u64,
    /// Frames received by this node.
    pub received: u64,
}

/// Statistics collected during simulation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationStats {
    /// Total events processed.
    pub total_events: u64,
    /// Frames originated by sensor and relay cycles.
    pub frames_sent: u64,
    /// Frames retransmitted by relays.
    pub frames_forwarded: u64,
    /// Frames delivered to the root collector.
    pub frames_delivered: u64,
    /// Events discarded because their handle was cancelled.
    pub events_cancelled: u64,
    /// Final simulation time.
    pub simulation_time_us: u64,
    /// Wall clock time in milliseconds.
    pub wall_time_ms: u64,
}

// ============================================================================
// Event Loop
// ============================================================================

/// The main simulation event loop.
pub struct EventLoop {
    event_queue: BinaryHeap<Event>,
    simulation: BuiltSimulation,
    context: SimContext,
    stats: SimulationStats,
    node_stats: HashMap<u64, NodeStats>,
    /// Entity id → node id, for classifying originated vs forwarded frames.
    entity_to_node: HashMap<u64, u32>,
    root_entity: Option<u64>,
}

impl EventLoop {
    /// Create a new event loop over a built simulation.
    pub fn new(simulation: BuiltSimulation, seed: u64) -> Self {
        let mut event_queue = BinaryHeap::new();
        let mut max_initial_id = 0u64;
        for event in simulation.initial_events.iter().cloned() {
            max_initial_id = max_initial_id.max(event.id.0 + 1);
            event_queue.push(event);
        }

        let mut context = SimContext::new(seed);
        context.advance_event_ids(max_initial_id);

        let mut node_stats = HashMap::new();
        let mut entity_to_node = HashMap::new();
        let mut root_entity = None;
        for info in &simulation.node_infos {
            node_stats.insert(info.entity_id, NodeStats::default());
            entity_to_node.insert(info.entity_id, info.node_id);
            if info.role == trafsim_common::Role::Root {
                root_entity = Some(info.entity_id);
            }
        }

        EventLoop {
            event_queue,
            simulation,
            context,
            stats: SimulationStats::default(),
            node_stats,
            entity_to_node,
            root_entity,
        }
    }

    /// Run the simulation for the specified duration.
    pub fn run(&mut self, duration: SimTime) -> Result<SimulationStats, RunnerError> {
        let start_time = Instant::now();

        // Add the end-of-simulation sentinel.
        self.event_queue.push(Event {
            id: EventId(u64::MAX),
            time: duration,
            source: EntityId::new(0),
            targets: vec![],
            payload: EventPayload::SimulationEnd,
        });

        while let Some(event) = self.event_queue.pop() {
            if matches!(event.payload, EventPayload::SimulationEnd) {
                self.context.set_time(event.time);
                break;
            }

            // Lazy cancellation: a cancelled event is discarded when it
            // surfaces from the queue.
            if self.context.take_cancelled(event.id) {
                self.stats.events_cancelled += 1;
                continue;
            }

            self.context.set_time(event.time);
            self.simulation
                .entities
                .dispatch_event(&event, &mut self.context)?;

            for new_event in self.context.take_pending_events() {
                self.event_queue.push(new_event);
            }

            self.stats.total_events += 1;
            self.update_stats(&event);
        }

        self.stats.simulation_time_us = self.context.time().as_micros();
        self.stats.wall_time_ms = start_time.elapsed().as_millis() as u64;

        Ok(self.stats.clone())
    }

    fn update_stats(&mut self, event: &Event) {
        let EventPayload::Frame(frame_event) = &event.payload else {
            return;
        };
        let Ok(frame) = Frame::decode(&frame_event.payload) else {
            return;
        };

        // A frame whose origin differs from the posting entity's node id was
        // retransmitted by a relay.
        let is_forward = self
            .entity_to_node
            .get(&event.source.0)
            .is_some_and(|&node_id| node_id != frame.source());
        if is_forward {
            self.stats.frames_forwarded += 1;
            if let Some(stats) = self.node_stats.get_mut(&event.source.0) {
                stats.forwarded += 1;
            }
        } else {
            self.stats.frames_sent += 1;
            if let Some(stats) = self.node_stats.get_mut(&event.source.0) {
                stats.sent += 1;
            }
        }

        for target in &event.targets {
            if let Some(stats) = self.node_stats.get_mut(&target.0) {
                stats.received += 1;
            }
            if Some(target.0) == self.root_entity {
                self.stats.frames_delivered += 1;
            }
        }
    }

    /// Get the simulation node info.
    pub fn node_infos(&self) -> &[NodeInfo] {
        &self.simulation.node_infos
    }

    /// Get current statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Get the per-node statistics, keyed by entity id.
    pub fn node_stats(&self) -> &HashMap<u64, NodeStats> {
        &self.node_stats
    }

    /// Get current simulation time.
    pub fn current_time(&self) -> SimTime {
        self.context.time()
    }

    /// Handle to the scripted traffic network.
    pub fn network(&self) -> &ScriptedNetwork {
        &self.simulation.network
    }
}
