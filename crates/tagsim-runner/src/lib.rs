//! Discrete-event engine for simulating backscatter tag networks.
//!
//! Load a [`Model`], build a [`Simulation`] from it and drive it with
//! [`Simulation::step`] or [`Simulation::run`]. Log records go to a
//! [`LogSink`]: [`MemorySink`] for tests and analysis in-process,
//! [`JsonLinesSink`] for files.
//!
//! ```no_run
//! use tagsim_runner::{load_model, Simulation, StopCondition};
//!
//! let model = load_model("models/phase_cancellation.yaml".as_ref()).unwrap();
//! let mut sim = Simulation::load(&model).unwrap();
//! sim.run(StopCondition::QueueEmpty).unwrap();
//! println!("{:?}", sim.stats().modulation_depth("receiver"));
//! ```

pub mod error;
pub mod metrics_export;
pub mod scheduler;
pub mod simulation;
pub mod sink;
pub mod stats;
pub mod watchdog;

pub use error::RunnerError;
pub use metrics_export::{InMemoryRecorder, MetricSpec, MetricsExport};
pub use scheduler::EventQueue;
pub use simulation::{Dispatch, Simulation, SimulationSnapshot, StepReport, StopCondition};
pub use sink::JsonLinesSink;
pub use stats::{SimulationStats, StopReason, VoltageSummary};
pub use watchdog::{CurrentEventInfo, Watchdog, WatchdogState};

pub use tagsim_common::{
    Event, EventPayload, LogRecord, LogSink, MachineKind, MemorySink, RecordKind, SimError, SimTime,
    TagId,
};
pub use tagsim_model::{load_model, load_model_from_str, load_models, load_models_from_str, Model};
