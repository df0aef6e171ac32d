//! # trafsim-nodes
//!
//! Node applications for the TrafSim sensor network.
//!
//! This crate provides [`NodeApp`], the per-node simulation entity. Role
//! behavior is a tagged variant dispatched through a single event handler:
//!
//! - **Leaf**: battery-constrained sensor running the duty-cycle state
//!   machine; produces one [`Measurement`] per sampling cycle, appends it to
//!   the sensor log, and transmits it toward its assigned relay.
//! - **Relay**: retransmits leaf reports toward the root and emits its own
//!   periodic status frames; keeps no aggregation state.
//! - **Root**: terminal collector counting received frames per source node.

use parking_lot::Mutex;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trafsim_common::{
    Entity, EntityId, Event, EventHandle, EventPayload, Frame, FrameEvent, Measurement, Role,
    SimContext, SimError, SimTime,
};
use trafsim_packet::sensorlog::SensorLogWriter;

/// Shared producer handle to the append-only sensor log.
pub type SharedSensorLog = Arc<Mutex<SensorLogWriter>>;

// ============================================================================
// Timer IDs
// ============================================================================

/// Application start (scheduled by the model builder at the node's start time).
pub const TIMER_START: u64 = 0;
/// Constrained node entering its initial sleep phase.
const TIMER_SLEEP_ENTRY: u64 = 1;
/// Wake from a sleep phase into sampling.
const TIMER_WAKE: u64 = 2;
/// Fire one send cycle.
const TIMER_SEND: u64 = 3;
/// Explicit stop (scheduled by the model builder at the node's stop time).
pub const TIMER_STOP: u64 = 4;

// ============================================================================
// Configuration
// ============================================================================

/// Active/sleep duty cycling for constrained nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DutyCycle {
    /// Seconds spent sampling before the node goes back to sleep.
    pub active_s: f64,
    /// Seconds spent sleeping before sampling resumes.
    pub sleep_s: f64,
}

/// Configuration for a node's transmitter state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitterConfig {
    /// Transmitted payload size in bytes.
    pub packet_size: u32,
    /// Total frames the node may send before it stops cycling.
    pub packet_budget: u32,
    /// Transmission rate in bits per second.
    pub data_rate_bps: u32,
    /// Battery-constrained nodes pass through sleep phases.
    pub constrained: bool,
    /// Whether high readings raise the emergency flag.
    pub emergency_capable: bool,
    /// Inclusive lower bound of the vehicle-count distribution.
    pub count_min: u32,
    /// Inclusive upper bound of the vehicle-count distribution.
    pub count_max: u32,
    /// Counts strictly above this raise the emergency flag.
    pub emergency_threshold: u32,
    /// Delay between start and the sleep-entry transition (constrained only).
    pub wake_offset_s: f64,
    /// Duration of the initial sleep phase (constrained only).
    pub initial_sleep_s: f64,
    /// Optional recurring duty cycling after the initial sleep.
    pub duty_cycle: Option<DutyCycle>,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        TransmitterConfig {
            packet_size: 512,
            packet_budget: 1000,
            data_rate_bps: 1000,
            constrained: true,
            emergency_capable: true,
            count_min: 0,
            count_max: 9,
            emergency_threshold: 8,
            wake_offset_s: 0.5,
            initial_sleep_s: 1.0,
            duty_cycle: None,
        }
    }
}

impl TransmitterConfig {
    /// Inter-send interval derived from payload size and transmission rate.
    pub fn send_interval(&self) -> SimTime {
        SimTime::from_secs(self.packet_size as f64 * 8.0 / self.data_rate_bps as f64)
    }
}

// ============================================================================
// Duty-Cycle State Machine
// ============================================================================

/// Transmitter phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial state, before the start timer fires.
    Idle,
    /// Energy-saving sleep (constrained nodes only).
    Sleep,
    /// Awake: sends one frame per cycle.
    Sampling,
    /// Terminal: no further events fire.
    Stopped,
}

/// Per-node transmitter state.
struct Transmitter {
    config: TransmitterConfig,
    phase: Phase,
    packets_sent: u32,
    /// The one outstanding scheduled event, cancelled on stop.
    pending: Option<EventHandle>,
    /// When the current sampling phase began (for duty cycling).
    active_since: SimTime,
}

impl Transmitter {
    fn new(config: TransmitterConfig) -> Self {
        Transmitter {
            config,
            phase: Phase::Idle,
            packets_sent: 0,
            pending: None,
            active_since: SimTime::ZERO,
        }
    }
}

// ============================================================================
// Role State
// ============================================================================

/// Role-specific data, dispatched through [`NodeApp::handle_event`].
enum RoleState {
    Leaf {
        /// Entity of the assigned relay; `None` leaves the node isolated and
        /// its sends become best-effort drops.
        uplink: Option<EntityId>,
        log: SharedSensorLog,
    },
    Relay {
        /// Entity of the root collector.
        uplink: Option<EntityId>,
        forwarded: u64,
        status_received: u64,
    },
    Root {
        /// Received frames per source node id.
        received: BTreeMap<u32, u64>,
        total_received: u64,
    },
}

// ============================================================================
// Node Application
// ============================================================================

/// A node application entity: one per simulated node, any role.
pub struct NodeApp {
    id: EntityId,
    node_id: u32,
    name: String,
    transmitter: Transmitter,
    role: RoleState,
}

impl NodeApp {
    /// Create a leaf sensor node.
    pub fn leaf(
        id: EntityId,
        node_id: u32,
        name: String,
        config: TransmitterConfig,
        uplink: Option<EntityId>,
        log: SharedSensorLog,
    ) -> Self {
        NodeApp {
            id,
            node_id,
            name,
            transmitter: Transmitter::new(config),
            role: RoleState::Leaf { uplink, log },
        }
    }

    /// Create a relay node.
    pub fn relay(
        id: EntityId,
        node_id: u32,
        name: String,
        config: TransmitterConfig,
        uplink: EntityId,
    ) -> Self {
        NodeApp {
            id,
            node_id,
            name,
            transmitter: Transmitter::new(config),
            role: RoleState::Relay {
                uplink: Some(uplink),
                forwarded: 0,
                status_received: 0,
            },
        }
    }

    /// Create the root collector. The root never cycles; its transmitter
    /// stays in `Idle`.
    pub fn root(id: EntityId, node_id: u32, name: String) -> Self {
        NodeApp {
            id,
            node_id,
            name,
            transmitter: Transmitter::new(TransmitterConfig {
                packet_budget: 0,
                constrained: false,
                ..TransmitterConfig::default()
            }),
            role: RoleState::Root {
                received: BTreeMap::new(),
                total_received: 0,
            },
        }
    }

    /// The node's role.
    pub fn role(&self) -> Role {
        match self.role {
            RoleState::Leaf { .. } => Role::Leaf,
            RoleState::Relay { .. } => Role::Relay,
            RoleState::Root { .. } => Role::Root,
        }
    }

    /// Node id (the id used in measurements and junction keys).
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Current transmitter phase.
    pub fn phase(&self) -> Phase {
        self.transmitter.phase
    }

    /// Frames sent by this node's own cycles.
    pub fn packets_sent(&self) -> u32 {
        self.transmitter.packets_sent
    }

    /// Per-source received-frame counts (root only). Diagnostic; the control
    /// plane never reads this table.
    pub fn received_counts(&self) -> Option<&BTreeMap<u32, u64>> {
        match &self.role {
            RoleState::Root { received, .. } => Some(received),
            _ => None,
        }
    }

    /// Frames forwarded toward the root (relay only).
    pub fn frames_forwarded(&self) -> Option<u64> {
        match &self.role {
            RoleState::Relay { forwarded, .. } => Some(*forwarded),
            _ => None,
        }
    }

    /// Explicitly stop the node: cancel the outstanding scheduled event,
    /// release the uplink, and stop all further cycles.
    pub fn stop(&mut self, ctx: &mut SimContext) {
        if self.transmitter.phase == Phase::Stopped {
            return;
        }
        debug!("node {} [{}] stopping", self.node_id, self.name);
        self.transmitter.phase = Phase::Stopped;
        if let Some(handle) = self.transmitter.pending.take() {
            ctx.cancel_event(handle);
        }
        match &mut self.role {
            RoleState::Leaf { uplink, .. } | RoleState::Relay { uplink, .. } => *uplink = None,
            RoleState::Root { .. } => {}
        }
    }

    // ========================================================================
    // Duty-Cycle Transitions
    // ========================================================================

    fn on_start(&mut self, ctx: &mut SimContext) {
        if self.transmitter.phase != Phase::Idle {
            return;
        }
        if self.transmitter.config.constrained {
            let delay = SimTime::from_secs(self.transmitter.config.wake_offset_s);
            self.transmitter.pending = Some(ctx.post_event(
                delay,
                vec![self.id],
                EventPayload::Timer {
                    timer_id: TIMER_SLEEP_ENTRY,
                },
            ));
        } else {
            self.enter_sampling(ctx);
        }
    }

    fn on_sleep_entry(&mut self, ctx: &mut SimContext) {
        if self.transmitter.phase == Phase::Stopped {
            return;
        }
        info!(
            "node {} [{}] entering sleep mode for energy saving",
            self.node_id, self.name
        );
        self.transmitter.phase = Phase::Sleep;
        let delay = SimTime::from_secs(self.transmitter.config.initial_sleep_s);
        self.transmitter.pending = Some(ctx.post_event(
            delay,
            vec![self.id],
            EventPayload::Timer {
                timer_id: TIMER_WAKE,
            },
        ));
    }

    fn on_wake(&mut self, ctx: &mut SimContext) {
        if self.transmitter.phase != Phase::Sleep {
            return;
        }
        self.enter_sampling(ctx);
    }

    fn enter_sampling(&mut self, ctx: &mut SimContext) {
        self.transmitter.phase = Phase::Sampling;
        self.transmitter.active_since = ctx.time();
        self.schedule_next_send(ctx);
    }

    /// Schedule the next send cycle, or duty-cycle into sleep when the active
    /// period has elapsed.
    fn schedule_next_send(&mut self, ctx: &mut SimContext) {
        if self.transmitter.phase != Phase::Sampling {
            return;
        }
        if self.transmitter.packets_sent >= self.transmitter.config.packet_budget {
            debug!(
                "node {} [{}] packet budget exhausted after {} frames",
                self.node_id, self.name, self.transmitter.packets_sent
            );
            self.transmitter.pending = None;
            return;
        }
        if self.transmitter.config.constrained {
            if let Some(duty) = self.transmitter.config.duty_cycle {
                let active = ctx.time() - self.transmitter.active_since;
                if active.as_secs_f64() >= duty.active_s {
                    debug!(
                        "node {} [{}] duty-cycling to sleep for {}s",
                        self.node_id, self.name, duty.sleep_s
                    );
                    self.transmitter.phase = Phase::Sleep;
                    self.transmitter.pending = Some(ctx.post_event(
                        SimTime::from_secs(duty.sleep_s),
                        vec![self.id],
                        EventPayload::Timer {
                            timer_id: TIMER_WAKE,
                        },
                    ));
                    return;
                }
            }
        }
        self.transmitter.pending = Some(ctx.post_event(
            self.transmitter.config.send_interval(),
            vec![self.id],
            EventPayload::Timer {
                timer_id: TIMER_SEND,
            },
        ));
    }

    fn on_send(&mut self, ctx: &mut SimContext) {
        if self.transmitter.phase != Phase::Sampling {
            return;
        }

        let packet_size = self.transmitter.config.packet_size as usize;
        match &mut self.role {
            RoleState::Leaf { uplink, log } => {
                let config = &self.transmitter.config;
                let count =
                    Uniform::new_inclusive(config.count_min, config.count_max).sample(ctx.rng());
                let emergency = config.emergency_capable && count > config.emergency_threshold;
                let measurement = Measurement {
                    source: self.node_id,
                    timestamp_us: ctx.time().as_micros(),
                    vehicle_count: count,
                    emergency,
                };

                if let Err(e) = log.lock().append(&measurement) {
                    warn!(
                        "node {} [{}] failed to append to sensor log: {}",
                        self.node_id, self.name, e
                    );
                }
                info!(
                    "node {} detected {} vehicles at time {:.3}{}",
                    self.node_id,
                    count,
                    ctx.time().as_secs_f64(),
                    if emergency { " [EMERGENCY]" } else { "" }
                );

                match uplink {
                    Some(target) => {
                        let bytes = Frame::Report(measurement).encode(packet_size);
                        ctx.post_immediate(
                            vec![*target],
                            EventPayload::Frame(FrameEvent {
                                source: self.id,
                                payload: bytes,
                            }),
                        );
                    }
                    // Best effort: an isolated node's report is dropped, not retried.
                    None => debug!(
                        "node {} [{}] has no uplink route, dropping report",
                        self.node_id, self.name
                    ),
                }
            }
            RoleState::Relay { uplink, .. } => match uplink {
                Some(target) => {
                    let bytes = Frame::Status {
                        source: self.node_id,
                    }
                    .encode(packet_size);
                    ctx.post_immediate(
                        vec![*target],
                        EventPayload::Frame(FrameEvent {
                            source: self.id,
                            payload: bytes,
                        }),
                    );
                }
                None => debug!(
                    "node {} [{}] has no uplink route, dropping status frame",
                    self.node_id, self.name
                ),
            },
            RoleState::Root { .. } => {}
        }

        self.transmitter.packets_sent += 1;
        self.schedule_next_send(ctx);
    }

    // ========================================================================
    // Frame Reception
    // ========================================================================

    fn on_frame(&mut self, frame_event: &FrameEvent, ctx: &mut SimContext) {
        let frame = match Frame::decode(&frame_event.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    "node {} [{}] dropping undecodable frame: {}",
                    self.node_id, self.name, e
                );
                return;
            }
        };

        match &mut self.role {
            RoleState::Relay {
                uplink,
                forwarded,
                status_received,
            } => match frame {
                // Pure pass-through: retransmit toward the root unchanged.
                Frame::Report(_) => match uplink {
                    Some(target) => {
                        *forwarded += 1;
                        debug!(
                            "node {} [{}] forwarding report from node {} toward root",
                            self.node_id,
                            self.name,
                            frame.source()
                        );
                        ctx.post_immediate(
                            vec![*target],
                            EventPayload::Frame(FrameEvent {
                                source: self.id,
                                payload: frame_event.payload.clone(),
                            }),
                        );
                    }
                    None => debug!(
                        "node {} [{}] has no uplink route, dropping forwarded report",
                        self.node_id, self.name
                    ),
                },
                // The relay is the terminal recipient of status frames.
                Frame::Status { .. } => *status_received += 1,
            },
            RoleState::Root {
                received,
                total_received,
            } => {
                *received.entry(frame.source()).or_default() += 1;
                *total_received += 1;
                debug!(
                    "node {} received {} frame from node {}",
                    self.node_id,
                    frame.kind_label(),
                    frame.source()
                );
                if let Frame::Report(m) = frame {
                    if m.emergency {
                        info!(
                            "node {} received packet [EMERGENCY] from node {}",
                            self.node_id, m.source
                        );
                    }
                }
                info!(
                    "FPC received data, total packets: {}",
                    total_received
                );
            }
            RoleState::Leaf { .. } => debug!(
                "node {} [{}] unexpectedly received a {} frame, ignoring",
                self.node_id,
                self.name,
                frame.kind_label()
            ),
        }
    }
}

impl Entity for NodeApp {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        match &event.payload {
            EventPayload::Timer { timer_id } => match *timer_id {
                TIMER_START => self.on_start(ctx),
                TIMER_SLEEP_ENTRY => self.on_sleep_entry(ctx),
                TIMER_WAKE => self.on_wake(ctx),
                TIMER_SEND => self.on_send(ctx),
                TIMER_STOP => self.stop(ctx),
                _ => {}
            },
            EventPayload::Frame(frame_event) => self.on_frame(frame_event, ctx),
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use trafsim_common::EventId;

    fn timer_event(target: EntityId, timer_id: u64) -> Event {
        Event {
            id: EventId(u64::MAX),
            time: SimTime::ZERO,
            source: target,
            targets: vec![target],
            payload: EventPayload::Timer { timer_id },
        }
    }

    fn shared_log(dir: &tempfile::TempDir) -> SharedSensorLog {
        let path = dir.path().join("sensor.csv");
        Arc::new(Mutex::new(SensorLogWriter::create(&path).unwrap()))
    }

    fn dispatch(node: &mut NodeApp, ctx: &mut SimContext, event: &Event) -> Vec<Event> {
        ctx.set_time(event.time);
        ctx.set_source(node.entity_id());
        node.handle_event(event, ctx).unwrap();
        ctx.take_pending_events()
    }

    /// Drive one self-targeted timer chain step, returning the follow-ups.
    fn step_timer(node: &mut NodeApp, ctx: &mut SimContext, event: Event) -> Vec<Event> {
        dispatch(node, ctx, &event)
    }

    #[test]
    fn test_send_interval_from_rate() {
        let config = TransmitterConfig::default();
        // 512 bytes at 1 kbit/s.
        assert_eq!(config.send_interval().as_micros(), 4_096_000);

        let relay = TransmitterConfig {
            packet_size: 1024,
            ..TransmitterConfig::default()
        };
        assert_eq!(relay.send_interval().as_micros(), 8_192_000);
    }

    #[test]
    fn test_leaf_start_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SimContext::new(42);
        let relay_entity = EntityId(99);
        let mut leaf = NodeApp::leaf(
            EntityId(1),
            4,
            "RFD4".to_string(),
            TransmitterConfig::default(),
            Some(relay_entity),
            shared_log(&dir),
        );

        // Start: constrained nodes delay into sleep entry after the wake offset.
        let mut start = timer_event(EntityId(1), TIMER_START);
        start.time = SimTime::from_secs(1.0);
        let events = step_timer(&mut leaf, &mut ctx, start);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, SimTime::from_secs(1.5));
        assert_eq!(leaf.phase(), Phase::Idle);

        // Sleep entry: one wake timer after the initial sleep.
        let events = step_timer(&mut leaf, &mut ctx, events.into_iter().next().unwrap());
        assert_eq!(leaf.phase(), Phase::Sleep);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, SimTime::from_secs(2.5));

        // Wake: sampling begins, first send after one interval.
        let events = step_timer(&mut leaf, &mut ctx, events.into_iter().next().unwrap());
        assert_eq!(leaf.phase(), Phase::Sampling);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time.as_micros(), 6_596_000);

        // Send: one frame toward the relay, one follow-up send timer.
        let events = step_timer(&mut leaf, &mut ctx, events.into_iter().next().unwrap());
        assert_eq!(leaf.packets_sent(), 1);
        assert_eq!(events.len(), 2);
        let frame = events
            .iter()
            .find(|e| matches!(e.payload, EventPayload::Frame(_)))
            .expect("expected a frame event");
        assert_eq!(frame.targets, vec![relay_entity]);
        let EventPayload::Frame(fe) = &frame.payload else {
            unreachable!()
        };
        let decoded = Frame::decode(&fe.payload).unwrap();
        let Frame::Report(m) = decoded else {
            panic!("expected a report frame")
        };
        assert_eq!(m.source, 4);
        assert!(m.vehicle_count <= 9);
        let next_send = events
            .iter()
            .find(|e| matches!(e.payload, EventPayload::Timer { timer_id: TIMER_SEND }))
            .expect("expected a follow-up send timer");
        assert_eq!(next_send.time.as_micros(), 10_692_000);
    }

    #[test]
    fn test_stop_cancels_pending_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SimContext::new(7);
        let mut leaf = NodeApp::leaf(
            EntityId(1),
            4,
            "RFD4".to_string(),
            TransmitterConfig::default(),
            Some(EntityId(99)),
            shared_log(&dir),
        );

        let events = step_timer(&mut leaf, &mut ctx, timer_event(EntityId(1), TIMER_START));
        let pending_id = events[0].id;

        step_timer(&mut leaf, &mut ctx, timer_event(EntityId(1), TIMER_STOP));
        assert_eq!(leaf.phase(), Phase::Stopped);
        assert!(ctx.take_cancelled(pending_id));

        // A late timer against a stopped node produces nothing.
        let events = step_timer(&mut leaf, &mut ctx, timer_event(EntityId(1), TIMER_SEND));
        assert!(events.is_empty());
        assert_eq!(leaf.packets_sent(), 0);
    }

    #[test]
    fn test_packet_budget_stops_cycling() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SimContext::new(3);
        let mut leaf = NodeApp::leaf(
            EntityId(1),
            4,
            "RFD4".to_string(),
            TransmitterConfig {
                packet_budget: 2,
                constrained: false,
                ..TransmitterConfig::default()
            },
            Some(EntityId(99)),
            shared_log(&dir),
        );

        let mut queue = step_timer(&mut leaf, &mut ctx, timer_event(EntityId(1), TIMER_START));
        let mut frames = 0;
        while let Some(event) = queue.pop() {
            if event.targets == vec![EntityId(1)] {
                queue.extend(dispatch(&mut leaf, &mut ctx, &event));
            } else if matches!(event.payload, EventPayload::Frame(_)) {
                frames += 1;
            }
        }
        assert_eq!(frames, 2);
        assert_eq!(leaf.packets_sent(), 2);
    }

    #[test]
    fn test_duty_cycle_sleeps_after_active_period() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SimContext::new(5);
        let mut leaf = NodeApp::leaf(
            EntityId(1),
            4,
            "RFD4".to_string(),
            TransmitterConfig {
                duty_cycle: Some(DutyCycle {
                    active_s: 5.0,
                    sleep_s: 3.0,
                }),
                ..TransmitterConfig::default()
            },
            Some(EntityId(99)),
            shared_log(&dir),
        );

        // Start → sleep entry → wake: sampling begins at 2.5s.
        let mut start = timer_event(EntityId(1), TIMER_START);
        start.time = SimTime::from_secs(1.0);
        let e = step_timer(&mut leaf, &mut ctx, start);
        let e = step_timer(&mut leaf, &mut ctx, e.into_iter().next().unwrap());
        let e = step_timer(&mut leaf, &mut ctx, e.into_iter().next().unwrap());

        // First send at 6.596s: 4.096s active, still within the 5s window.
        let events = step_timer(&mut leaf, &mut ctx, e.into_iter().next().unwrap());
        assert_eq!(leaf.phase(), Phase::Sampling);

        // Second send at 10.692s: 8.192s active, so the node duty-cycles to
        // sleep and schedules a wake instead of another send.
        let send = events
            .into_iter()
            .find(|e| matches!(e.payload, EventPayload::Timer { timer_id: TIMER_SEND }))
            .unwrap();
        let events = step_timer(&mut leaf, &mut ctx, send);
        assert_eq!(leaf.phase(), Phase::Sleep);
        let wake = events
            .iter()
            .find(|e| matches!(e.payload, EventPayload::Timer { timer_id: TIMER_WAKE }))
            .expect("expected a wake timer");
        assert_eq!(wake.time.as_micros(), 13_692_000);
    }

    #[test]
    fn test_relay_forwards_reports_to_root() {
        let mut ctx = SimContext::new(0);
        let root_entity = EntityId(0);
        let mut relay = NodeApp::relay(
            EntityId(2),
            1,
            "FFD1".to_string(),
            TransmitterConfig {
                packet_size: 1024,
                constrained: false,
                emergency_capable: false,
                ..TransmitterConfig::default()
            },
            root_entity,
        );

        let report = Frame::Report(Measurement {
            source: 4,
            timestamp_us: 6_596_000,
            vehicle_count: 9,
            emergency: true,
        });
        let event = Event {
            id: EventId(10),
            time: SimTime::from_secs(6.596),
            source: EntityId(5),
            targets: vec![EntityId(2)],
            payload: EventPayload::Frame(FrameEvent {
                source: EntityId(5),
                payload: report.encode(512),
            }),
        };
        let events = dispatch(&mut relay, &mut ctx, &event);
        assert_eq!(relay.frames_forwarded(), Some(1));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].targets, vec![root_entity]);
        let EventPayload::Frame(fe) = &events[0].payload else {
            panic!("expected a frame event")
        };
        assert_eq!(Frame::decode(&fe.payload).unwrap(), report);
    }

    #[test]
    fn test_root_counts_per_source() {
        let mut ctx = SimContext::new(0);
        let mut root = NodeApp::root(EntityId(0), 0, "FPC0".to_string());

        for (source, count) in [(4u32, 2u64), (5, 1)] {
            for _ in 0..count {
                let frame = Frame::Report(Measurement {
                    source,
                    timestamp_us: 0,
                    vehicle_count: 1,
                    emergency: false,
                });
                let event = Event {
                    id: EventId(11),
                    time: SimTime::ZERO,
                    source: EntityId(2),
                    targets: vec![EntityId(0)],
                    payload: EventPayload::Frame(FrameEvent {
                        source: EntityId(2),
                        payload: frame.encode(512),
                    }),
                };
                dispatch(&mut root, &mut ctx, &event);
            }
        }

        let counts = root.received_counts().unwrap();
        assert_eq!(counts.get(&4), Some(&2));
        assert_eq!(counts.get(&5), Some(&1));
    }
}
