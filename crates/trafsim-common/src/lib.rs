//! # trafsim-common
//!
//! Common types and traits for the TrafSim simulation framework.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Node roles ([`Role`])
//! - Entity identification ([`EntityId`])
//! - Event system ([`Event`], [`EventPayload`])
//! - Scheduling context ([`SimContext`]) with cancellable handles
//!   ([`EventHandle`])
//! - Entity traits ([`Entity`]) and the registry ([`EntityRegistry`])

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

// Re-export wire types
pub use trafsim_packet::{Frame, Measurement, PacketError};

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Entity not found.
    #[error("entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Event handler error.
    #[error("event handler error in entity {entity:?}: {message}")]
    HandlerError {
        /// Entity that had the error.
        entity: EntityId,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1000)
    }

    /// Create from seconds (float).
    pub fn from_secs(s: f64) -> Self {
        SimTime((s * 1_000_000.0) as u64)
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get as milliseconds.
    pub fn as_millis(&self) -> u64 {
        self.0 / 1000
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Role of a node in the reporting hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Resource-constrained sensor node; sole producer of measurements.
    Leaf,
    /// Intermediate node forwarding leaf measurements toward the root.
    Relay,
    /// Central collector terminating the hierarchy.
    Root,
}

impl Role {
    /// Lowercase label for logging and metric breakdowns.
    pub fn as_label(&self) -> &'static str {
        match self {
            Role::Leaf => "leaf",
            Role::Relay => "relay",
            Role::Root => "root",
        }
    }

    /// Radio device-class label used in animation output.
    pub fn radio_label(&self) -> &'static str {
        match self {
            Role::Leaf => "RFD",
            Role::Relay => "FFD",
            Role::Root => "FPC",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

// ============================================================================
// Entity Types
// ============================================================================

/// Unique identifier for an entity in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// Handle to a scheduled event, usable to cancel it before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(EventId);

impl EventHandle {
    /// Id of the underlying event.
    pub fn event_id(&self) -> EventId {
        self.0
    }
}

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event.
    pub source: EntityId,
    /// Target entities for the event.
    pub targets: Vec<EntityId>,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap: earliest time first, then FIFO by id
        // for events scheduled at the same instant.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// A frame in flight toward a receiving node.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    /// Entity the frame was posted from (the transmitting application).
    pub source: EntityId,
    /// Encoded frame bytes, padded to the sender's packet size.
    pub payload: Vec<u8>,
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A frame delivered to a receiving node.
    Frame(FrameEvent),

    /// A delayed callback.
    Timer {
        /// User-defined timer ID.
        timer_id: u64,
    },

    /// End the simulation.
    SimulationEnd,
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to entities during event handling.
///
/// This is the scheduling seam: handlers request future callbacks with
/// [`post_event`](SimContext::post_event), which returns an [`EventHandle`],
/// and may revoke a not-yet-fired callback with
/// [`cancel_event`](SimContext::cancel_event). Cancellation is lazy — the
/// event loop discards a cancelled event when it surfaces from the queue.
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    cancelled: HashSet<EventId>,
    next_event_id: u64,
    source_entity: EntityId,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            cancelled: HashSet::new(),
            next_event_id: 0,
            source_entity: EntityId(0),
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Set the current time (used by the event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Set the source entity (used by the event loop).
    pub fn set_source(&mut self, entity: EntityId) {
        self.source_entity = entity;
    }

    /// Schedule an event to occur after a delay. Returns a handle that can
    /// cancel the event as long as it has not fired yet.
    pub fn post_event(
        &mut self,
        delay: SimTime,
        targets: Vec<EntityId>,
        payload: EventPayload,
    ) -> EventHandle {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        self.pending_events.push(Event {
            id,
            time: self.time + delay,
            source: self.source_entity,
            targets,
            payload,
        });
        EventHandle(id)
    }

    /// Schedule an event to occur at the current instant. Same-time events
    /// fire in scheduling (FIFO) order.
    pub fn post_immediate(&mut self, targets: Vec<EntityId>, payload: EventPayload) -> EventHandle {
        self.post_event(SimTime::ZERO, targets, payload)
    }

    /// Cancel a scheduled event. Cancelling an event that already fired, or
    /// was never scheduled, is a no-op rather than an error.
    pub fn cancel_event(&mut self, handle: EventHandle) {
        self.cancelled.insert(handle.0);
    }

    /// Check and clear the cancellation mark for an event surfacing from the
    /// queue (used by the event loop).
    pub fn take_cancelled(&mut self, id: EventId) -> bool {
        self.cancelled.remove(&id)
    }

    /// Take all pending events (used by the event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Allocate an event id for an externally constructed event.
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Ensure future event ids start at or above `floor`. Used by the event
    /// loop so build-time initial events never collide with context ids.
    pub fn advance_event_ids(&mut self, floor: u64) {
        self.next_event_id = self.next_event_id.max(floor);
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Base trait for all simulation entities.
pub trait Entity: Send {
    /// Get the entity's unique ID.
    fn entity_id(&self) -> EntityId;

    /// Handle an event.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Registry for managing simulation entities.
pub struct EntityRegistry {
    entities: HashMap<EntityId, Box<dyn Entity>>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        EntityRegistry {
            entities: HashMap::new(),
        }
    }

    /// Register an entity.
    pub fn register(&mut self, entity: Box<dyn Entity>) {
        let id = entity.entity_id();
        self.entities.insert(id, entity);
    }

    /// Get an entity by ID.
    pub fn get(&self, id: EntityId) -> Option<&dyn Entity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn Entity>> {
        self.entities.get_mut(&id)
    }

    /// Dispatch an event to its target entities.
    pub fn dispatch_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        for target in &event.targets {
            if let Some(entity) = self.entities.get_mut(target) {
                ctx.set_source(*target);
                entity.handle_event(event, ctx)?;
            } else {
                tracing::error!("entity {:?} not found dispatching {:?}", target, event.payload);
                return Err(SimError::EntityNotFound(*target));
            }
        }
        Ok(())
    }

    /// Get all entity IDs.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    /// Get the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
