//! Per-tag trace logging for simulation debugging.
//!
//! Lets a run follow selected tags in detail: every event a machine receives,
//! every event it schedules, state changes, and timers. Output goes through
//! `tracing` under the `tagsim::trace` target, so it is filtered like any
//! other diagnostic.
//!
//! ```rust,ignore
//! use tagsim_common::tag_tracer::{TagTracer, TagTracerConfig};
//!
//! let tracer = TagTracer::new(TagTracerConfig::from_spec("alice,tag:3"));
//! if tracer.should_trace(Some("alice"), TagId::new(0)) {
//!     tracer.log_state_change(Some("alice"), TagId::new(0), now, "idle -> armed");
//! }
//! ```

use crate::{Event, EventPayload, MachineKind, SimTime, TagId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Target used for all trace output.
pub const TRACE_TARGET: &str = "tagsim::trace";

// ============================================================================
// Trace Event Types
// ============================================================================

/// Categories of trace events for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCategory {
    /// Event delivered to a machine.
    EventReceived,
    /// Event scheduled by a machine.
    EventEmitted,
    /// Machine state change.
    StateChange,
    /// Instruction-level operation (send, antenna, fault).
    Operation,
    /// Timer armed.
    Timer,
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceCategory::EventReceived => write!(f, "EVENT_RX"),
            TraceCategory::EventEmitted => write!(f, "EVENT_TX"),
            TraceCategory::StateChange => write!(f, "STATE"),
            TraceCategory::Operation => write!(f, "OP"),
            TraceCategory::Timer => write!(f, "TIMER"),
        }
    }
}

/// A trace event record.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    /// Tag name, if known.
    pub tag_name: Option<String>,
    /// Tag ID.
    pub tag_id: TagId,
    /// Machine involved, if any.
    pub machine: Option<MachineKind>,
    /// Simulation time of the trace point.
    pub sim_time: SimTime,
    /// Category of the trace event.
    pub category: TraceCategory,
    /// Human-readable description.
    pub description: String,
    /// Additional key-value details.
    pub details: Vec<(String, String)>,
}

impl TraceEvent {
    fn new(
        tag_name: Option<&str>,
        tag_id: TagId,
        sim_time: SimTime,
        category: TraceCategory,
        description: impl Into<String>,
    ) -> Self {
        TraceEvent {
            tag_name: tag_name.map(|s| s.to_string()),
            tag_id,
            machine: None,
            sim_time,
            category,
            description: description.into(),
            details: Vec::new(),
        }
    }

    /// An event being delivered.
    pub fn event_received(tag_name: Option<&str>, event: &Event) -> Self {
        let (desc, details) = describe_event_payload(&event.payload);
        let mut trace = TraceEvent::new(
            tag_name,
            event.tag,
            event.time,
            TraceCategory::EventReceived,
            desc,
        );
        trace.machine = event.machine;
        trace.details = details;
        trace
    }

    /// An event being scheduled at `sim_time`.
    pub fn event_emitted(tag_name: Option<&str>, tag_id: TagId, sim_time: SimTime, event: &Event) -> Self {
        let (desc, mut details) = describe_event_payload(&event.payload);
        details.push(("target".to_string(), format!("{}", event.tag)));
        if let Some(machine) = event.machine {
            details.push(("machine".to_string(), machine.to_string()));
        }
        details.push((
            "delay_ns".to_string(),
            format!("{}", event.time.as_nanos().saturating_sub(sim_time.as_nanos())),
        ));
        let mut trace = TraceEvent::new(tag_name, tag_id, sim_time, TraceCategory::EventEmitted, desc);
        trace.details = details;
        trace
    }

    /// Attach the machine involved.
    pub fn with_machine(mut self, machine: MachineKind) -> Self {
        self.machine = Some(machine);
        self
    }

    /// Add a detail to this event.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }
}

/// Describe an event payload for tracing.
fn describe_event_payload(payload: &EventPayload) -> (String, Vec<(String, String)>) {
    match payload {
        EventPayload::Init => ("Init".to_string(), Vec::new()),
        EventPayload::SignalArrival { arrival } => (
            "SignalArrival".to_string(),
            vec![("arrival".to_string(), format!("{}", arrival.0))],
        ),
        EventPayload::Timer { timer_id } => (
            "Timer".to_string(),
            vec![("timer_id".to_string(), format!("{}", timer_id))],
        ),
        EventPayload::Message { from, value } => {
            let from = from.map(|m| m.to_string()).unwrap_or_else(|| "script".to_string());
            (
                "Message".to_string(),
                vec![
                    ("from".to_string(), from),
                    ("value".to_string(), format!("{}", value)),
                ],
            )
        }
        EventPayload::Control(control) => (format!("Control {}", control), Vec::new()),
    }
}

// ============================================================================
// Tracer Configuration
// ============================================================================

/// Which tags and categories to trace.
#[derive(Debug, Clone, Default)]
pub struct TagTracerConfig {
    /// Tag names to trace; `*` traces every tag.
    pub traced_names: HashSet<String>,
    /// Tag IDs to trace.
    pub traced_ids: HashSet<u32>,
    /// Categories to trace. If empty, all categories are traced.
    pub traced_categories: HashSet<TraceCategory>,
}

impl TagTracerConfig {
    /// A config that traces nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of tag names, `tag:N` ids, or `*`.
    ///
    /// ```rust,ignore
    /// let config = TagTracerConfig::from_spec("alice,tag:2");
    /// ```
    pub fn from_spec(spec: &str) -> Self {
        let mut config = Self::none();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix("tag:").map(str::parse::<u32>) {
                Some(Ok(id)) => {
                    config.traced_ids.insert(id);
                }
                Some(Err(_)) => {
                    tracing::warn!("ignoring malformed trace target '{}'", part);
                }
                None => {
                    config.traced_names.insert(part.to_string());
                }
            }
        }
        config
    }

    /// Whether any tag is traced.
    pub fn is_enabled(&self) -> bool {
        !self.traced_names.is_empty() || !self.traced_ids.is_empty()
    }

    /// Whether every tag is traced.
    pub fn traces_all(&self) -> bool {
        self.traced_names.contains("*")
    }

    /// Whether a tag should be traced, by name or id.
    pub fn should_trace(&self, name: Option<&str>, id: TagId) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.traces_all()
            || name.is_some_and(|n| self.traced_names.contains(n))
            || self.traced_ids.contains(&id.0)
    }

    /// Whether a category should be traced.
    pub fn should_trace_category(&self, category: TraceCategory) -> bool {
        self.traced_categories.is_empty() || self.traced_categories.contains(&category)
    }

    /// Restrict tracing to a category (may be called repeatedly).
    pub fn with_category(mut self, category: TraceCategory) -> Self {
        self.traced_categories.insert(category);
        self
    }
}

// ============================================================================
// Tag Tracer
// ============================================================================

/// Shared, cheaply clonable tracer.
#[derive(Clone, Default)]
pub struct TagTracer {
    config: Arc<TagTracerConfig>,
}

impl TagTracer {
    /// Create a tracer with the given configuration.
    pub fn new(config: TagTracerConfig) -> Self {
        TagTracer {
            config: Arc::new(config),
        }
    }

    /// A tracer that traces nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether tracing is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Whether a tag should be traced.
    pub fn should_trace(&self, name: Option<&str>, id: TagId) -> bool {
        self.config.should_trace(name, id)
    }

    /// The tracer configuration.
    pub fn config(&self) -> &TagTracerConfig {
        &self.config
    }

    /// Log a trace event if its tag and category are selected.
    pub fn log(&self, event: TraceEvent) {
        if !self.config.should_trace(event.tag_name.as_deref(), event.tag_id) {
            return;
        }
        if !self.config.should_trace_category(event.category) {
            return;
        }
        emit(&event);
    }

    /// Log an event being delivered to a tag.
    pub fn log_event_received(&self, tag_name: Option<&str>, event: &Event) {
        if self.should_trace(tag_name, event.tag) {
            self.log(TraceEvent::event_received(tag_name, event));
        }
    }

    /// Log an event being scheduled by a tag.
    pub fn log_event_emitted(&self, tag_name: Option<&str>, tag_id: TagId, sim_time: SimTime, event: &Event) {
        if self.should_trace(tag_name, tag_id) {
            self.log(TraceEvent::event_emitted(tag_name, tag_id, sim_time, event));
        }
    }

    /// Log a machine state change.
    pub fn log_state_change(
        &self,
        tag_name: Option<&str>,
        tag_id: TagId,
        machine: MachineKind,
        sim_time: SimTime,
        description: impl Into<String>,
    ) {
        if self.should_trace(tag_name, tag_id) {
            self.log(
                TraceEvent::new(tag_name, tag_id, sim_time, TraceCategory::StateChange, description)
                    .with_machine(machine),
            );
        }
    }

    /// Log an operation with details.
    pub fn log_operation(
        &self,
        tag_name: Option<&str>,
        tag_id: TagId,
        sim_time: SimTime,
        description: impl Into<String>,
        details: Vec<(String, String)>,
    ) {
        if self.should_trace(tag_name, tag_id) {
            let mut trace = TraceEvent::new(tag_name, tag_id, sim_time, TraceCategory::Operation, description);
            trace.details = details;
            self.log(trace);
        }
    }

    /// Log a timer being armed.
    pub fn log_timer_scheduled(
        &self,
        tag_name: Option<&str>,
        tag_id: TagId,
        machine: MachineKind,
        sim_time: SimTime,
        timer_id: u32,
        delay: SimTime,
    ) {
        if self.should_trace(tag_name, tag_id) {
            self.log(
                TraceEvent::new(
                    tag_name,
                    tag_id,
                    sim_time,
                    TraceCategory::Timer,
                    format!("SCHEDULED timer_id={} delay={}", timer_id, delay),
                )
                .with_machine(machine),
            );
        }
    }
}

fn emit(event: &TraceEvent) {
    let tag = match &event.tag_name {
        Some(name) => format!("{} ({})", name, event.tag_id),
        None => event.tag_id.to_string(),
    };
    let machine = event.machine.map(|m| format!("/{}", m)).unwrap_or_default();
    let details = if event.details.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = event.details.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!(" [{}]", parts.join(", "))
    };

    tracing::info!(
        target: "tagsim::trace",
        "{}{} @ {}: {} {}{}",
        tag,
        machine,
        event.sim_time,
        event.category,
        event.description,
        details
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_spec_empty() {
        assert!(!TagTracerConfig::from_spec("").is_enabled());
        assert!(!TagTracerConfig::from_spec(" , ").is_enabled());
    }

    #[test]
    fn test_config_from_spec_mixed() {
        let config = TagTracerConfig::from_spec("alice, tag:4 ,bob");
        assert!(config.should_trace(Some("alice"), TagId::new(0)));
        assert!(config.should_trace(Some("bob"), TagId::new(1)));
        assert!(config.should_trace(None, TagId::new(4)));
        assert!(!config.should_trace(Some("carol"), TagId::new(2)));
    }

    #[test]
    fn test_config_ignores_bad_ids() {
        let config = TagTracerConfig::from_spec("tag:x");
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_config_all() {
        let config = TagTracerConfig::from_spec("*");
        assert!(config.traces_all());
        assert!(config.should_trace(Some("anyone"), TagId::new(77)));
    }

    #[test]
    fn test_category_filter() {
        let config = TagTracerConfig::from_spec("*").with_category(TraceCategory::Timer);
        assert!(config.should_trace_category(TraceCategory::Timer));
        assert!(!config.should_trace_category(TraceCategory::StateChange));
    }
}
