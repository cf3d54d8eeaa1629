//! Structured log records and the sink interface.
//!
//! The engine produces records in simulation-time order and hands each one to
//! a [`LogSink`] synchronously. Serialization and persistence belong to the
//! sink; [`MemorySink`] simply keeps everything for inspection.

use crate::{MachineKind, SimTime, TagId};
use serde::Serialize;
use thiserror::Error;

/// Values captured by a `log` instruction.
///
/// Reception fields are filled from the event that activated the machine and
/// stay `None` when that event was not a signal arrival.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Emission {
    /// Optional label given by the program.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Detected voltage of the reception.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    /// Phase of the superposed reception, radians.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<f64>,
    /// Distance to the transmitting tag, metres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_from_sender: Option<f64>,
    /// Distance to the same sender at its previous transmission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_distance_from_sender: Option<f64>,
    /// Carrier frequency of the sender, Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_frequency: Option<f64>,
    /// Transmitting tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<TagId>,
    /// Operand values listed by the instruction.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
}

/// What a record describes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum RecordKind {
    /// Output of a `log` instruction.
    Emit(Emission),
    /// A machine changed state.
    Transition {
        /// Previous state.
        from: String,
        /// New state.
        to: String,
    },
    /// A machine faulted and stopped.
    Fault {
        /// Stable fault code.
        fault: String,
        /// Human-readable description.
        message: String,
    },
    /// A scripted tag-level action was applied.
    Control {
        /// Description of the action.
        action: String,
    },
    /// The run stopped on a fatal error while handling this tag's event.
    Abort {
        /// Error text.
        error: String,
    },
}

impl RecordKind {
    /// Serialized name of the record type.
    pub const fn name(&self) -> &'static str {
        match self {
            RecordKind::Emit(_) => "emit",
            RecordKind::Transition { .. } => "transition",
            RecordKind::Fault { .. } => "fault",
            RecordKind::Control { .. } => "control",
            RecordKind::Abort { .. } => "abort",
        }
    }
}

/// An immutable snapshot emitted at a point in simulated time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Position of this record in the run's record sequence.
    pub seq: u64,
    /// Simulation time, nanoseconds.
    pub time: SimTime,
    /// Tag name.
    pub tag: String,
    /// Tag identifier.
    pub tag_id: TagId,
    /// Machine that produced the record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineKind>,
    /// Current state of that machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Record body.
    #[serde(flatten)]
    pub kind: RecordKind,
}

impl LogRecord {
    /// The emission body, if this is an `Emit` record.
    pub fn emission(&self) -> Option<&Emission> {
        match &self.kind {
            RecordKind::Emit(emission) => Some(emission),
            _ => None,
        }
    }
}

/// Errors raised by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Underlying writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Receiver of log records.
pub trait LogSink {
    /// Accept one record.
    fn record(&mut self, record: &LogRecord) -> Result<(), SinkError>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn record(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        (**self).record(record)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<LogRecord>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records received so far.
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Consume the sink, returning its records.
    pub fn into_records(self) -> Vec<LogRecord> {
        self.records
    }

    /// Emissions logged by one tag, in order.
    pub fn emissions_for<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Emission> + 'a {
        self.records
            .iter()
            .filter(move |r| r.tag == tag)
            .filter_map(LogRecord::emission)
    }

    /// Fault records, in order.
    pub fn faults(&self) -> impl Iterator<Item = &LogRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.kind, RecordKind::Fault { .. }))
    }

    /// The abort record, if the run ended on a fatal error.
    pub fn abort(&self) -> Option<&LogRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| matches!(r.kind, RecordKind::Abort { .. }))
    }
}

impl LogSink for MemorySink {
    fn record(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(seq: u64, tag: &str, voltage: f64) -> LogRecord {
        LogRecord {
            seq,
            time: SimTime::from_nanos(seq * 10),
            tag: tag.to_string(),
            tag_id: TagId::new(0),
            machine: Some(MachineKind::Input),
            state: Some("listen".to_string()),
            kind: RecordKind::Emit(Emission {
                voltage: Some(voltage),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_memory_sink_filters() {
        let mut sink = MemorySink::new();
        sink.record(&emit(0, "alice", 0.5)).unwrap();
        sink.record(&emit(1, "bob", 0.25)).unwrap();
        sink.record(&LogRecord {
            seq: 2,
            time: SimTime::from_nanos(30),
            tag: "alice".to_string(),
            tag_id: TagId::new(0),
            machine: Some(MachineKind::Output),
            state: Some("tx".to_string()),
            kind: RecordKind::Fault {
                fault: "arithmetic_error".to_string(),
                message: "division by zero".to_string(),
            },
        })
        .unwrap();

        let voltages: Vec<f64> = sink.emissions_for("alice").filter_map(|e| e.voltage).collect();
        assert_eq!(voltages, vec![0.5]);
        assert_eq!(sink.faults().count(), 1);
        assert_eq!(sink.records().len(), 3);
    }

    #[test]
    fn test_record_serializes_flat() {
        let json = serde_json::to_value(emit(3, "alice", 1.25)).unwrap();
        assert_eq!(json["record"], "emit");
        assert_eq!(json["tag"], "alice");
        assert_eq!(json["voltage"], 1.25);
        assert_eq!(json["time"], 30);
        assert!(json.get("phase").is_none());
    }
}
