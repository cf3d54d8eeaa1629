//! # tagsim-common
//!
//! Core types shared by every crate of the tag backscatter simulator:
//! simulation time, identifiers, positions, scheduled events, the error
//! enums that cross crate boundaries, and the structured log records the
//! engine hands to its sink.

pub mod record;
pub mod tag_tracer;

pub use record::{Emission, LogRecord, LogSink, MemorySink, RecordKind, SinkError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Simulation Time
// ============================================================================

/// Simulation time in nanoseconds.
///
/// Propagation delays between tags a few metres apart are on the order of
/// tens of nanoseconds, so the clock resolves single nanoseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of every run.
    pub const ZERO: SimTime = SimTime(0);

    /// Create a time from nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    /// Create a time from microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros.saturating_mul(1_000))
    }

    /// Create a time from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    /// Create a time from fractional seconds, rounding to the nearest nanosecond.
    ///
    /// Returns `None` for negative or non-finite input.
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let nanos = (secs * 1e9).round();
        if nanos >= u64::MAX as f64 {
            return Some(SimTime(u64::MAX));
        }
        Some(SimTime(nanos as u64))
    }

    /// Time in nanoseconds.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Time in whole microseconds.
    pub const fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    /// Time in fractional seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Add another time, returning `None` on overflow.
    pub fn checked_add(self, other: SimTime) -> Option<SimTime> {
        self.0.checked_add(other.0).map(SimTime)
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a tag; also its index in the simulation's tag arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TagId(pub u32);

impl TagId {
    /// Create a new tag ID.
    pub const fn new(id: u32) -> Self {
        TagId(id)
    }

    /// Index into per-tag storage.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag:{}", self.0)
    }
}

/// Unique identifier of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventId(pub u64);

/// Identifier of one signal arrival held by the propagation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ArrivalId(pub u64);

// ============================================================================
// Machine Kinds
// ============================================================================

/// The three machines every tag runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    /// Receives signals and timers from the outside world.
    Input,
    /// Internal decision logic.
    Processing,
    /// Drives the antenna and transmits.
    Output,
}

impl MachineKind {
    /// All kinds in activation order.
    pub const ALL: [MachineKind; 3] =
        [MachineKind::Input, MachineKind::Processing, MachineKind::Output];

    /// Slot of this kind inside a tag.
    pub const fn index(self) -> usize {
        match self {
            MachineKind::Input => 0,
            MachineKind::Processing => 1,
            MachineKind::Output => 2,
        }
    }

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            MachineKind::Input => "input",
            MachineKind::Processing => "processing",
            MachineKind::Output => "output",
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(MachineKind::Input),
            "processing" => Ok(MachineKind::Processing),
            "output" => Ok(MachineKind::Output),
            other => Err(format!("unknown machine kind '{}'", other)),
        }
    }
}

// ============================================================================
// Geometry
// ============================================================================

/// A point in space, in metres.
///
/// Deserializes from `[x, y, z]`, `[x, y]`, or `{x, y, z}` (z defaults to 0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "PositionRepr")]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Position {
    /// Create a new position.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PositionRepr {
    Spatial([f64; 3]),
    Planar([f64; 2]),
    Fields {
        x: f64,
        y: f64,
        #[serde(default)]
        z: f64,
    },
}

impl From<PositionRepr> for Position {
    fn from(repr: PositionRepr) -> Self {
        match repr {
            PositionRepr::Spatial([x, y, z]) => Position { x, y, z },
            PositionRepr::Planar([x, y]) => Position { x, y, z: 0.0 },
            PositionRepr::Fields { x, y, z } => Position { x, y, z },
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Who produced an event, for causal logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSource {
    /// Initial seeding at load time.
    Seed,
    /// A scripted event from the model file.
    Script,
    /// An instruction executed by a machine.
    Machine {
        /// Originating tag.
        tag: TagId,
        /// Originating machine.
        machine: MachineKind,
    },
    /// The propagation model delivering a transmission.
    Propagation {
        /// Transmitting tag.
        sender: TagId,
    },
}

/// Tag-level actions applied from outside the tag's programs.
#[derive(Debug, Clone, PartialEq)]
pub enum TagControl {
    /// Switch the tag's antenna to a reflection index (0 listens).
    SetAntenna {
        /// Index into the tag's reflection coefficients.
        index: usize,
    },
    /// Relocate the tag.
    Move {
        /// New position.
        position: Position,
    },
}

impl fmt::Display for TagControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagControl::SetAntenna { index } => write!(f, "set_antenna {}", index),
            TagControl::Move { position } => write!(f, "move {}", position),
        }
    }
}

/// Payload carried by an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// First activation of a machine at the start of a run.
    Init,
    /// A transmission reaches the target tag.
    SignalArrival {
        /// Arrival held by the propagation model.
        arrival: ArrivalId,
    },
    /// A timer armed by the machine itself expires.
    Timer {
        /// Timer identifier chosen by the program.
        timer_id: u32,
    },
    /// A value forwarded from another machine (or injected by a script).
    Message {
        /// Sending machine of the same tag, if any.
        from: Option<MachineKind>,
        /// Forwarded value.
        value: f64,
    },
    /// A tag-level control action.
    Control(TagControl),
}

impl EventPayload {
    /// Short name of the payload type.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EventPayload::Init => "init",
            EventPayload::SignalArrival { .. } => "signal",
            EventPayload::Timer { .. } => "timer",
            EventPayload::Message { .. } => "message",
            EventPayload::Control(_) => "control",
        }
    }
}

/// A scheduled occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Unique event identifier, assigned by the scheduler.
    pub id: EventId,
    /// When the event fires.
    pub time: SimTime,
    /// Target tag.
    pub tag: TagId,
    /// Target machine; `None` for tag-level control events.
    pub machine: Option<MachineKind>,
    /// Producer of the event.
    pub source: EventSource,
    /// Event payload.
    pub payload: EventPayload,
}

// ============================================================================
// Errors
// ============================================================================

/// Semantic validation failures in machine or tag definitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A state name is referenced but not declared.
    #[error("machine '{machine}': unknown state '{state}'")]
    UnknownState {
        /// Machine name.
        machine: String,
        /// Missing state name.
        state: String,
    },

    /// Two states share a name.
    #[error("machine '{machine}': duplicate state '{state}'")]
    DuplicateState {
        /// Machine name.
        machine: String,
        /// Repeated state name.
        state: String,
    },

    /// A declared transition names a state the machine does not have.
    #[error("machine '{machine}': state '{state}' declares transition to unknown state '{target}'")]
    UnknownTransitionTarget {
        /// Machine name.
        machine: String,
        /// Declaring state.
        state: String,
        /// Undeclared target.
        target: String,
    },

    /// The entry state does not exist.
    #[error("machine '{machine}': entry state '{entry}' is not declared")]
    MissingEntryState {
        /// Machine name.
        machine: String,
        /// Entry state name.
        entry: String,
    },

    /// An instruction addresses a register outside the bank.
    #[error("machine '{machine}', state '{state}', instruction {pc}: register r{register} out of range (bank has {count})")]
    RegisterOutOfRange {
        /// Machine name.
        machine: String,
        /// State name.
        state: String,
        /// Instruction offset.
        pc: usize,
        /// Register index.
        register: u8,
        /// Registers per machine.
        count: usize,
    },

    /// A tag references a machine definition that does not exist.
    #[error("tag '{tag}': unknown {kind} machine '{machine}'")]
    UnknownMachine {
        /// Tag name.
        tag: String,
        /// Slot being filled.
        kind: MachineKind,
        /// Requested machine name.
        machine: String,
    },

    /// A machine definition is bound to the wrong slot.
    #[error("tag '{tag}': machine '{machine}' is a {actual} machine, not {expected}")]
    MachineKindMismatch {
        /// Tag name.
        tag: String,
        /// Machine name.
        machine: String,
        /// Slot being filled.
        expected: MachineKind,
        /// Kind declared by the machine.
        actual: MachineKind,
    },

    /// Two machines share a name.
    #[error("duplicate machine '{0}'")]
    DuplicateMachine(String),

    /// Two tags share a name.
    #[error("duplicate tag '{0}'")]
    DuplicateTag(String),

    /// A scripted event or reference names a tag that does not exist.
    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    /// A numeric parameter is outside its valid range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A required collection is empty.
    #[error("{0} must not be empty")]
    Empty(String),
}

/// Errors that abort a whole simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// An event was scheduled earlier than the current clock.
    #[error("causality violation: event requested at {requested_s:.9}s but clock is at {now}")]
    Causality {
        /// Clock at the time of the request.
        now: SimTime,
        /// Requested firing time in seconds (may be negative).
        requested_s: f64,
    },

    /// The configuration failed semantic validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An event targets a tag that does not exist.
    #[error("unknown tag {0}")]
    UnknownTag(TagId),

    /// The log sink failed.
    #[error("log sink error: {0}")]
    Sink(#[from] SinkError),
}
