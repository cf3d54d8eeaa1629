//! Metrics infrastructure for the tag simulator.
//!
//! Every metric the engine records is declared here as a [`Metric`] constant,
//! so names are never typed twice and the CLI can list them. The `metrics`
//! crate is re-exported; without an installed recorder every call is a no-op.
//!
//! # Example
//!
//! ```rust
//! use tagsim_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const MY_COUNTER: Metric = Metric::counter("my.counter")
//!     .with_description("A counter metric")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["tag"]);
//!
//! metrics::counter!(MY_COUNTER.name, "tag" => "alice").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use tagsim_metrics::{Metric, MetricKind};
///
/// const SENT: Metric = Metric::counter("tagsim.signal.sent").with_labels(&["tag"]);
/// assert_eq!(SENT.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "tagsim.signal.sent").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Histogram,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }

    /// Returns the unit as a human-readable string.
    pub fn unit_str(&self) -> &'static str {
        match self.unit {
            Some(Unit::Count) => "count",
            Some(Unit::Percent) => "percent",
            Some(Unit::Seconds) => "seconds",
            Some(Unit::Milliseconds) => "milliseconds",
            Some(Unit::Microseconds) => "microseconds",
            Some(Unit::Nanoseconds) => "nanoseconds",
            Some(Unit::CountPerSecond) => "count/second",
            Some(_) => "other",
            None => "",
        }
    }

    /// Prefix used to group metrics in listings (`tagsim.signal` for
    /// `tagsim.signal.sent`).
    pub fn group(&self) -> &'static str {
        match self.name.rfind('.') {
            Some(i) => &self.name[..i],
            None => self.name,
        }
    }
}

/// All metric definitions for the simulator.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels on tag-scoped metrics.
    pub const TAG_LABELS: &[&str] = &["tag"];

    /// Labels on machine-scoped metrics.
    pub const MACHINE_LABELS: &[&str] = &["tag", "machine"];

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Events dispatched, by payload type.
    pub const EVENTS_DISPATCHED: Metric = Metric::counter("tagsim.scheduler.events_dispatched")
        .with_description("Events popped from the queue and dispatched")
        .with_unit(Unit::Count)
        .with_labels(&["event_type"]);

    /// Pending events after each dispatch.
    pub const QUEUE_DEPTH: Metric = Metric::gauge("tagsim.scheduler.queue_depth")
        .with_description("Events waiting in the queue")
        .with_unit(Unit::Count);

    // ========================================================================
    // Signals
    // ========================================================================

    /// Transmissions.
    pub const SIGNALS_SENT: Metric = Metric::counter("tagsim.signal.sent")
        .with_description("Signals transmitted")
        .with_unit(Unit::Count)
        .with_labels(TAG_LABELS);

    /// Receptions delivered to input machines.
    pub const SIGNAL_ARRIVALS: Metric = Metric::counter("tagsim.signal.arrivals")
        .with_description("Receptions delivered to a tag")
        .with_unit(Unit::Count)
        .with_labels(TAG_LABELS);

    /// Arrivals folded into an earlier reception.
    pub const ARRIVALS_MERGED: Metric = Metric::counter("tagsim.signal.arrivals_merged")
        .with_description("Arrivals superposed into an earlier reception")
        .with_unit(Unit::Count)
        .with_labels(TAG_LABELS);

    /// Detected voltage per reception.
    pub const RX_VOLTAGE: Metric = Metric::histogram("tagsim.signal.rx_voltage")
        .with_description("Detected voltage of each reception")
        .with_labels(TAG_LABELS);

    // ========================================================================
    // Machines
    // ========================================================================

    /// State transitions.
    pub const TRANSITIONS: Metric = Metric::counter("tagsim.fsm.transitions")
        .with_description("State transitions")
        .with_unit(Unit::Count)
        .with_labels(MACHINE_LABELS);

    /// Machine faults, by fault code.
    pub const FAULTS: Metric = Metric::counter("tagsim.fsm.faults")
        .with_description("Machine faults")
        .with_unit(Unit::Count)
        .with_labels(&["tag", "machine", "fault"]);

    /// Instructions executed per activation.
    pub const INSTRUCTIONS: Metric = Metric::histogram("tagsim.fsm.instructions")
        .with_description("Instructions executed per activation")
        .with_unit(Unit::Count)
        .with_labels(MACHINE_LABELS);

    /// Timers armed.
    pub const TIMERS_ARMED: Metric = Metric::counter("tagsim.fsm.timers_armed")
        .with_description("Timers armed by programs")
        .with_unit(Unit::Count)
        .with_labels(MACHINE_LABELS);

    // ========================================================================
    // Log
    // ========================================================================

    /// Records written to the sink.
    pub const LOG_RECORDS: Metric = Metric::counter("tagsim.log.records")
        .with_description("Log records written to the sink")
        .with_unit(Unit::Count)
        .with_labels(&["record"]);

    /// Every metric, in listing order.
    pub const ALL: &[&Metric] = &[
        &EVENTS_DISPATCHED,
        &QUEUE_DEPTH,
        &SIGNALS_SENT,
        &SIGNAL_ARRIVALS,
        &ARRIVALS_MERGED,
        &RX_VOLTAGE,
        &TRANSITIONS,
        &FAULTS,
        &INSTRUCTIONS,
        &TIMERS_ARMED,
        &LOG_RECORDS,
    ];
}

/// Describes all metrics used in the simulator.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
