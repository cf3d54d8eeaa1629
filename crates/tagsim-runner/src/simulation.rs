//! The simulation engine.
//!
//! A [`Simulation`] owns every tag, the event queue, the propagation model and
//! a [`LogSink`]. Events are dispatched one at a time: each one activates a
//! single machine of a single tag, and the effects the machine requests are
//! applied in execution order before the next event is popped.

use crate::scheduler::EventQueue;
use crate::stats::{SimulationStats, StopReason};
use serde::Serialize;
use tagsim_common::tag_tracer::TagTracer;
use tagsim_common::{
    Event, EventPayload, EventSource, LogRecord, LogSink, MachineKind, MemorySink, RecordKind,
    SimError, SimTime, TagControl, TagId,
};
use tagsim_fsm::{Activation, Effect, IgnoreReason, Outcome, SignalInput, Stimulus, TagInstance, TagSnapshot};
use tagsim_metrics::metric_defs;
use tagsim_model::{Blueprint, Model};
use tagsim_physics::{PropagationModel, Signal};
use tracing::{debug, info, trace, warn};

// ============================================================================
// Run Control
// ============================================================================

/// When [`Simulation::run`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCondition {
    /// Run until no events remain.
    QueueEmpty,
    /// Stop before the first event later than this time.
    TimeLimit(SimTime),
    /// Stop after this many dispatches.
    EventLimit(u64),
    /// Whichever limit is hit first; an empty queue always stops.
    Bounded {
        /// Time limit.
        time: Option<SimTime>,
        /// Dispatch limit.
        events: Option<u64>,
    },
}

impl StopCondition {
    /// Build the narrowest condition covering both optional limits.
    pub fn from_limits(time: Option<SimTime>, events: Option<u64>) -> Self {
        match (time, events) {
            (None, None) => StopCondition::QueueEmpty,
            (Some(t), None) => StopCondition::TimeLimit(t),
            (None, Some(n)) => StopCondition::EventLimit(n),
            (time, events) => StopCondition::Bounded { time, events },
        }
    }

    fn limits(&self) -> (Option<SimTime>, Option<u64>) {
        match *self {
            StopCondition::QueueEmpty => (None, None),
            StopCondition::TimeLimit(t) => (Some(t), None),
            StopCondition::EventLimit(n) => (None, Some(n)),
            StopCondition::Bounded { time, events } => (time, events),
        }
    }
}

/// What a single [`Simulation::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// The dispatched event.
    pub event: Event,
    /// How it was handled.
    pub dispatch: Dispatch,
}

/// Handling of one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A machine ran (or ignored the event).
    Activated {
        /// Machine that received the event.
        machine: MachineKind,
        /// Result of the activation.
        activation: Activation,
    },
    /// A signal arrival already superposed into an earlier reception.
    MergedArrival,
    /// A tag-level control action was applied.
    Control,
}

/// Observable state of every tag at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSnapshot {
    /// Simulation clock.
    pub time: SimTime,
    /// Tags in id order.
    pub tags: Vec<TagSnapshot>,
}

// ============================================================================
// Simulation
// ============================================================================

/// A loaded, runnable simulation.
pub struct Simulation<S: LogSink = MemorySink> {
    tags: Vec<TagInstance>,
    queue: EventQueue,
    propagation: PropagationModel,
    sink: S,
    tracer: TagTracer,
    stats: SimulationStats,
    max_steps: usize,
    configured_stop: StopCondition,
    next_record: u64,
    seed: u64,
}

impl Simulation<MemorySink> {
    /// Load a model, collecting records in memory.
    pub fn load(model: &Model) -> Result<Self, SimError> {
        Simulation::load_with_sink(model, MemorySink::new())
    }
}

impl<S: LogSink> Simulation<S> {
    /// Load a model, writing records to `sink`.
    ///
    /// Validates the model, seeds an `Init` event at t = 0 for every machine
    /// of every tag (tag order, then input, processing, output), and then
    /// queues the scripted events in model order.
    pub fn load_with_sink(model: &Model, sink: S) -> Result<Self, SimError> {
        let blueprint = Blueprint::build(model)?;
        let seed = model.simulation.seed.unwrap_or(0);
        let propagation = PropagationModel::new(
            model.propagation.clone(),
            model.exciter.clone(),
            blueprint.tags.len(),
            seed,
        )?;

        let time_limit = model.simulation.duration_s.and_then(SimTime::from_secs_f64);
        let configured_stop = StopCondition::from_limits(time_limit, model.simulation.max_events);

        let mut queue = EventQueue::new();
        for tag in &blueprint.tags {
            for kind in MachineKind::ALL {
                queue.schedule(SimTime::ZERO, tag.id(), Some(kind), EventSource::Seed, EventPayload::Init)?;
            }
        }
        for entry in blueprint.script {
            queue.schedule(entry.time, entry.tag, entry.machine, EventSource::Script, entry.payload)?;
        }

        info!(
            tags = blueprint.tags.len(),
            machines = blueprint.machines.len(),
            events = queue.len(),
            seed,
            "simulation loaded"
        );

        Ok(Simulation {
            tags: blueprint.tags,
            queue,
            propagation,
            sink,
            tracer: TagTracer::disabled(),
            stats: SimulationStats::default(),
            max_steps: model.simulation.max_steps_per_activation,
            configured_stop,
            next_record: 0,
            seed,
        })
    }

    /// Attach a per-tag tracer.
    pub fn with_tracer(mut self, tracer: TagTracer) -> Self {
        self.tracer = tracer;
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.queue.now()
    }

    /// Seed driving receiver noise.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Counters collected so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Events still queued.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Stop condition from the model's `simulation` section.
    pub fn configured_stop(&self) -> StopCondition {
        self.configured_stop
    }

    /// All tags, in id order.
    pub fn tags(&self) -> &[TagInstance] {
        &self.tags
    }

    /// Look up a tag by name.
    pub fn tag(&self, name: &str) -> Option<&TagInstance> {
        self.tags.iter().find(|t| t.name() == name)
    }

    /// The log sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the simulation, returning its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Machine states, faults and registers of every tag.
    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            time: self.queue.now(),
            tags: self.tags.iter().map(TagInstance::snapshot).collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------------

    /// Dispatch exactly one event. Returns `Ok(None)` if the queue is empty.
    pub fn step(&mut self) -> Result<Option<StepReport>, SimError> {
        let event = match self.queue.pop() {
            Some(event) => event,
            None => return Ok(None),
        };
        let index = event.tag.index();
        if index >= self.tags.len() {
            self.stats.stop_reason = Some(StopReason::Error);
            return Err(SimError::UnknownTag(event.tag));
        }

        self.stats.events_dispatched += 1;
        metrics::counter!(
            metric_defs::EVENTS_DISPATCHED.name,
            "event_type" => event.payload.kind_name()
        )
        .increment(1);
        debug!(
            id = event.id.0,
            time = %event.time,
            tag = self.tags[index].name(),
            kind = event.payload.kind_name(),
            "dispatch"
        );
        self.tracer.log_event_received(Some(self.tags[index].name()), &event);

        let dispatch = match self.dispatch(index, &event) {
            Ok(dispatch) => dispatch,
            Err(error) => {
                self.abort(index, event.machine, &error);
                return Err(error);
            }
        };
        metrics::gauge!(metric_defs::QUEUE_DEPTH.name).set(self.queue.len() as f64);
        Ok(Some(StepReport { event, dispatch }))
    }

    /// Run until `stop` is met or the queue empties.
    pub fn run(&mut self, stop: StopCondition) -> Result<StopReason, SimError> {
        self.run_observed(stop, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `observer` with each event and its
    /// run-wide dispatch number just before it is dispatched.
    pub fn run_observed<F>(&mut self, stop: StopCondition, mut observer: F) -> Result<StopReason, SimError>
    where
        F: FnMut(&Event, u64),
    {
        let (time_limit, event_limit) = stop.limits();
        info!(
            time_limit = ?time_limit.map(|t| t.to_string()),
            event_limit = ?event_limit,
            pending = self.queue.len(),
            "simulation started"
        );

        let mut dispatched: u64 = 0;
        let reason = loop {
            let next = match self.queue.peek() {
                Some(event) => event,
                None => break StopReason::QueueEmpty,
            };
            if event_limit.is_some_and(|limit| dispatched >= limit) {
                break StopReason::EventLimit;
            }
            if time_limit.is_some_and(|limit| next.time > limit) {
                break StopReason::TimeLimit;
            }
            observer(next, self.stats.events_dispatched + 1);
            self.step()?;
            dispatched += 1;
        };

        self.stats.final_time_s = self.queue.now().as_secs_f64();
        self.stats.stop_reason = Some(reason);
        self.sink.flush()?;

        info!(
            ?reason,
            dispatched,
            time = %self.queue.now(),
            faults = self.stats.faults,
            "simulation finished"
        );
        Ok(reason)
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn dispatch(&mut self, index: usize, event: &Event) -> Result<Dispatch, SimError> {
        let kind = event.machine.unwrap_or(MachineKind::Input);
        let stimulus = match event.payload.clone() {
            EventPayload::Init => Stimulus::Init,
            EventPayload::SignalArrival { arrival } => {
                let tag = &self.tags[index];
                let reception = match self.propagation.receive(tag.id(), &tag.position(), arrival) {
                    Some(reception) => reception,
                    None => {
                        self.stats.arrivals_merged += 1;
                        metrics::counter!(
                            metric_defs::ARRIVALS_MERGED.name,
                            "tag" => tag.name().to_string()
                        )
                        .increment(1);
                        trace!(tag = tag.name(), arrival = arrival.0, "arrival merged");
                        return Ok(Dispatch::MergedArrival);
                    }
                };

                self.stats.arrivals_delivered += 1;
                self.stats.observe_voltage(tag.name(), reception.voltage);
                let labels = [("tag", tag.name().to_string())];
                metrics::counter!(metric_defs::SIGNAL_ARRIVALS.name, &labels).increment(1);
                metrics::histogram!(metric_defs::RX_VOLTAGE.name, &labels).record(reception.voltage);

                Stimulus::Signal(SignalInput {
                    voltage: reception.voltage,
                    phase: reception.phase,
                    frequency_hz: reception.frequency_hz,
                    distance_m: reception.distance_m,
                    previous_distance_m: reception.previous_distance_m,
                    sender: reception.sender,
                    arrivals: reception.arrivals,
                })
            }
            EventPayload::Timer { timer_id } => {
                self.stats.timers_fired += 1;
                Stimulus::Timer { timer_id }
            }
            EventPayload::Message { from, value } => {
                self.stats.messages += 1;
                Stimulus::Message { from, value }
            }
            EventPayload::Control(control) => {
                self.apply_control(index, &control)?;
                return Ok(Dispatch::Control);
            }
        };

        let now = self.queue.now();
        let tag = &mut self.tags[index];
        let state_before = tag.machine(kind).current_state_name().to_string();
        let activation = tag.activate(kind, &stimulus, now, self.max_steps);
        metrics::histogram!(
            metric_defs::INSTRUCTIONS.name,
            "tag" => tag.name().to_string(),
            "machine" => kind.as_str()
        )
        .record(activation.steps as f64);

        for effect in &activation.effects {
            if let Err(error) = self.apply_effect(index, kind, &state_before, effect) {
                // The machine already finished its activation; log the outcome
                // so the record stream matches its state.
                self.finish_activation(index, kind, &state_before, &activation)?;
                return Err(error);
            }
        }
        self.finish_activation(index, kind, &state_before, &activation)?;

        Ok(Dispatch::Activated { machine: kind, activation })
    }

    /// Record a fatal error against the tag whose event caused it, mark the
    /// run as stopped and flush what the sink holds.
    fn abort(&mut self, index: usize, machine: Option<MachineKind>, error: &SimError) {
        let now = self.queue.now();
        warn!(tag = self.tags[index].name(), time = %now, "run aborted: {}", error);
        self.stats.stop_reason = Some(StopReason::Error);
        self.stats.final_time_s = now.as_secs_f64();

        // A failing sink cannot take the abort record.
        if !matches!(error, SimError::Sink(_)) {
            let state = machine.map(|kind| self.tags[index].machine(kind).current_state_name().to_string());
            let kind = RecordKind::Abort { error: error.to_string() };
            if let Err(e) = self.write_record(index, machine, state, kind) {
                warn!("abort record not written: {}", e);
            }
        }
        if let Err(e) = self.sink.flush() {
            warn!("log sink flush failed: {}", e);
        }
    }

    fn finish_activation(
        &mut self,
        index: usize,
        kind: MachineKind,
        state_before: &str,
        activation: &Activation,
    ) -> Result<(), SimError> {
        let now = self.queue.now();
        let tag = &self.tags[index];
        let (tag_id, name) = (tag.id(), tag.name().to_string());

        match &activation.result {
            Ok(Outcome::Transitioned { to, .. }) => {
                let to_name = tag.machine(kind).definition().state(*to).name().to_string();
                self.stats.transitions += 1;
                metrics::counter!(
                    metric_defs::TRANSITIONS.name,
                    "tag" => name.clone(),
                    "machine" => kind.as_str()
                )
                .increment(1);
                self.tracer.log_state_change(
                    Some(&name),
                    tag_id,
                    kind,
                    now,
                    format!("{} -> {}", state_before, to_name),
                );
                self.write_record(
                    index,
                    Some(kind),
                    Some(to_name.clone()),
                    RecordKind::Transition {
                        from: state_before.to_string(),
                        to: to_name,
                    },
                )?;
            }
            Ok(Outcome::Waiting { resume_at }) => {
                trace!(tag = %name, machine = %kind, resume_at, "waiting");
            }
            Ok(Outcome::Halted) => {
                trace!(tag = %name, machine = %kind, steps = activation.steps, "halted");
            }
            Ok(Outcome::Ignored(reason)) => {
                self.stats.ignored_events += 1;
                let reason = match reason {
                    IgnoreReason::Faulted => "faulted",
                    IgnoreReason::WaitMismatch => "wait mismatch",
                };
                debug!(tag = %name, machine = %kind, reason, "event ignored");
            }
            Err(fault) => {
                self.stats.faults += 1;
                warn!(
                    tag = %name,
                    machine = %kind,
                    state = state_before,
                    time = %now,
                    "machine faulted: {}",
                    fault
                );
                metrics::counter!(
                    metric_defs::FAULTS.name,
                    "tag" => name.clone(),
                    "machine" => kind.as_str(),
                    "fault" => fault.code()
                )
                .increment(1);
                self.tracer.log_state_change(
                    Some(&name),
                    tag_id,
                    kind,
                    now,
                    format!("FAULT {}: {}", fault.code(), fault),
                );
                self.write_record(
                    index,
                    Some(kind),
                    Some(state_before.to_string()),
                    RecordKind::Fault {
                        fault: fault.code().to_string(),
                        message: fault.to_string(),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn apply_effect(
        &mut self,
        index: usize,
        kind: MachineKind,
        state: &str,
        effect: &Effect,
    ) -> Result<(), SimError> {
        let now = self.queue.now();
        let tag_id = self.tags[index].id();
        let source = EventSource::Machine { tag: tag_id, machine: kind };

        match effect {
            Effect::Send { amplitude, phase } => self.transmit(index, *amplitude, *phase)?,
            Effect::ArmTimer { delay_s, timer_id } => {
                let event = self.queue.schedule_after(
                    *delay_s,
                    tag_id,
                    Some(kind),
                    source,
                    EventPayload::Timer { timer_id: *timer_id },
                )?;
                self.stats.timers_armed += 1;
                let name = self.tags[index].name();
                metrics::counter!(
                    metric_defs::TIMERS_ARMED.name,
                    "tag" => name.to_string(),
                    "machine" => kind.as_str()
                )
                .increment(1);
                let delay = SimTime::from_nanos(event.time.as_nanos() - now.as_nanos());
                self.tracer
                    .log_timer_scheduled(Some(name), tag_id, kind, now, *timer_id, delay);
            }
            Effect::Forward { to, value } => {
                let event = self.queue.schedule(
                    now,
                    tag_id,
                    Some(*to),
                    source,
                    EventPayload::Message { from: Some(kind), value: *value },
                )?;
                self.tracer
                    .log_event_emitted(Some(self.tags[index].name()), tag_id, now, &event);
            }
            Effect::SetAntenna { index: antenna } => {
                let tag = &mut self.tags[index];
                if tag.set_antenna(*antenna) {
                    trace!(tag = tag.name(), antenna, "antenna switched");
                } else {
                    warn!(tag = tag.name(), antenna, "antenna index out of range");
                }
            }
            Effect::Log(emission) => {
                self.write_record(
                    index,
                    Some(kind),
                    Some(state.to_string()),
                    RecordKind::Emit(emission.clone()),
                )?;
            }
        }
        Ok(())
    }

    fn transmit(&mut self, index: usize, amplitude: Option<f64>, phase: f64) -> Result<(), SimError> {
        let now = self.queue.now();
        let tag = &self.tags[index];
        let position = tag.position();
        let amplitude = amplitude.unwrap_or(tag.params().amplitude);
        let signal = Signal {
            sender: tag.id(),
            position,
            frequency_hz: tag.params().frequency_hz,
            phasor: self
                .propagation
                .emitted_phasor(&position, amplitude, tag.reflection(), phase),
            emitted_at: now,
        };

        let arrivals = self
            .propagation
            .transmit(&signal, self.tags.iter().map(|t| (t.id(), t.position())));

        self.stats.signals_sent += 1;
        let name = self.tags[index].name();
        metrics::counter!(metric_defs::SIGNALS_SENT.name, "tag" => name.to_string()).increment(1);
        if self.tracer.is_enabled() {
            self.tracer.log_operation(
                Some(name),
                signal.sender,
                now,
                "SEND",
                vec![
                    ("amplitude".to_string(), format!("{}", amplitude)),
                    ("phase".to_string(), format!("{:.4}", phase)),
                    ("receivers".to_string(), arrivals.len().to_string()),
                ],
            );
        }

        for arrival in arrivals {
            let event = self.queue.schedule(
                arrival.time,
                arrival.receiver,
                Some(MachineKind::Input),
                EventSource::Propagation { sender: signal.sender },
                EventPayload::SignalArrival { arrival: arrival.arrival },
            )?;
            self.tracer
                .log_event_emitted(Some(self.tags[index].name()), signal.sender, now, &event);
        }
        Ok(())
    }

    fn apply_control(&mut self, index: usize, control: &TagControl) -> Result<(), SimError> {
        let now = self.queue.now();
        let tag = &mut self.tags[index];
        match control {
            TagControl::SetAntenna { index: antenna } => {
                if !tag.set_antenna(*antenna) {
                    warn!(tag = tag.name(), antenna, "antenna index out of range");
                }
            }
            TagControl::Move { position } => tag.set_position(*position),
        }
        debug!(tag = tag.name(), action = %control, "control applied");
        self.tracer
            .log_operation(Some(tag.name()), tag.id(), now, control.to_string(), Vec::new());
        self.write_record(index, None, None, RecordKind::Control { action: control.to_string() })
    }

    fn write_record(
        &mut self,
        index: usize,
        machine: Option<MachineKind>,
        state: Option<String>,
        kind: RecordKind,
    ) -> Result<(), SimError> {
        let tag = &self.tags[index];
        let record = LogRecord {
            seq: self.next_record,
            time: self.queue.now(),
            tag: tag.name().to_string(),
            tag_id: tag.id(),
            machine,
            state,
            kind,
        };
        self.sink.record(&record)?;
        self.next_record += 1;
        self.stats.log_records += 1;
        metrics::counter!(metric_defs::LOG_RECORDS.name, "record" => record.kind.name()).increment(1);
        Ok(())
    }

    /// Name of a tag, for diagnostics.
    pub fn tag_name(&self, id: TagId) -> Option<&str> {
        self.tags.get(id.index()).map(TagInstance::name)
    }
}
