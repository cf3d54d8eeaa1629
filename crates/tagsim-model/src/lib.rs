//! # tagsim-model
//!
//! YAML model loading for tagsim.
//!
//! This crate provides:
//! - the schema of model files (simulation settings, propagation, an optional
//!   exciter, machine definitions, tags and scripted events)
//! - loading from files and strings, with multi-file merging
//! - building validated tag instances and scripted events from a loaded model
//!
//! ## Example
//!
//! ```yaml
//! simulation:
//!   seed: 7
//! machines:
//!   - name: beacon
//!     kind: output
//!     entry: idle
//!     states:
//!       - name: idle
//!         program:
//!           - { op: send }
//! tags:
//!   - name: alice
//!     position: [0, 0, 0]
//!     machines: { input: listen, processing: pass, output: beacon }
//! ```

pub mod build;

pub use build::{Blueprint, ScriptEntry};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tagsim_common::{ConfigError, MachineKind, Position};
use tagsim_fsm::MachineSpec;
use tagsim_physics::{ExciterConfig, PropagationConfig};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Semantic validation failed.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// Schema
// ============================================================================

fn default_register_count() -> usize {
    8
}

fn default_max_steps() -> usize {
    10_000
}

fn default_frequency() -> f64 {
    915e6
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_reflection() -> Vec<f64> {
    vec![1.0]
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSection {
    /// General registers per machine.
    #[serde(default = "default_register_count")]
    pub register_count: usize,
    /// Instruction cap per activation.
    #[serde(default = "default_max_steps")]
    pub max_steps_per_activation: usize,
    /// Seed for receiver noise.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Stop after this much simulated time.
    #[serde(default)]
    pub duration_s: Option<f64>,
    /// Stop after this many events.
    #[serde(default)]
    pub max_events: Option<u64>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        SimulationSection {
            register_count: default_register_count(),
            max_steps_per_activation: default_max_steps(),
            seed: None,
            duration_s: None,
            max_events: None,
        }
    }
}

/// Machine definitions a tag runs, by name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagMachines {
    /// Input machine.
    pub input: String,
    /// Processing machine.
    pub processing: String,
    /// Output machine.
    pub output: String,
}

impl TagMachines {
    /// Machine name for a slot.
    pub fn get(&self, kind: MachineKind) -> &str {
        match kind {
            MachineKind::Input => &self.input,
            MachineKind::Processing => &self.processing,
            MachineKind::Output => &self.output,
        }
    }
}

/// A tag as written in a model file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagSpec {
    /// Tag name (must be unique).
    pub name: String,
    /// When true, removes a tag of the same name defined by an earlier file.
    #[serde(default)]
    pub remove: bool,
    /// Location, metres.
    #[serde(default)]
    pub position: Position,
    /// Carrier frequency, Hz.
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    /// Default transmit amplitude.
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    /// Reflection coefficient per antenna state.
    #[serde(default = "default_reflection")]
    pub reflection_coefficients: Vec<f64>,
    /// Initial antenna state.
    #[serde(default)]
    pub antenna: usize,
    /// Machine definitions to run. Required unless `remove` is set.
    #[serde(default)]
    pub machines: Option<TagMachines>,
    /// Starting state per machine, overriding the entry state.
    #[serde(default)]
    pub start_states: BTreeMap<MachineKind, String>,
    /// Initial register values per machine, e.g. `{ processing: { r0: 1.5 } }`.
    #[serde(default)]
    pub registers: BTreeMap<MachineKind, BTreeMap<String, f64>>,
}

/// An action applied by a scripted event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptAction {
    /// Switch the tag's antenna state.
    SetAntenna {
        /// Reflection table index.
        index: usize,
    },
    /// Relocate the tag.
    Move {
        /// New position.
        position: Position,
    },
    /// Deliver a message to one of the tag's machines.
    Inject {
        /// Target machine.
        machine: MachineKind,
        /// Value bound to `in.value`.
        value: f64,
    },
}

/// An event scheduled from the model file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedEvent {
    /// Firing time, seconds.
    pub time_s: f64,
    /// Target tag name.
    pub tag: String,
    /// What happens.
    pub action: ScriptAction,
}

/// One model file before merging.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    #[serde(default)]
    simulation: Option<SimulationSection>,
    #[serde(default)]
    propagation: Option<PropagationConfig>,
    #[serde(default)]
    exciter: Option<ExciterConfig>,
    #[serde(default)]
    machines: Vec<MachineSpec>,
    #[serde(default)]
    tags: Vec<TagSpec>,
    #[serde(default)]
    events: Vec<ScriptedEvent>,
}

/// A loaded, merged model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    /// Run-wide settings.
    pub simulation: SimulationSection,
    /// Propagation parameters.
    pub propagation: PropagationConfig,
    /// Carrier source, if any.
    pub exciter: Option<ExciterConfig>,
    /// Machine definitions in declaration order.
    pub machines: Vec<MachineSpec>,
    /// Tags in declaration order. Tag ids follow this order.
    pub tags: Vec<TagSpec>,
    /// Scripted events in declaration order.
    pub events: Vec<ScriptedEvent>,
}

impl Model {
    /// Look up a machine spec by name.
    pub fn machine(&self, name: &str) -> Option<&MachineSpec> {
        self.machines.iter().find(|m| m.name == name)
    }

    /// Look up a tag spec by name.
    pub fn tag(&self, name: &str) -> Option<&TagSpec> {
        self.tags.iter().find(|t| t.name == name)
    }
}

// ============================================================================
// Model Loading
// ============================================================================

/// Load a model from a file.
pub fn load_model(path: &Path) -> Result<Model, ModelError> {
    load_models(&[path])
}

/// Parse a model from a YAML string.
pub fn load_model_from_str(yaml_str: &str) -> Result<Model, ModelError> {
    load_models_from_str(&[yaml_str])
}

/// Load and merge multiple model files.
///
/// Files ending in `.json` are parsed as JSON, everything else as YAML.
/// Merge rules are those of [`load_models_from_str`].
pub fn load_models(paths: &[&Path]) -> Result<Model, ModelError> {
    if paths.is_empty() {
        return Err(ModelError::InvalidConfig("No model files provided".to_string()));
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let file: ModelFile = if is_json {
            serde_json::from_str(&text)?
        } else {
            serde_yaml::from_str(&text)?
        };
        debug!(path = %path.display(), "loaded model file");
        files.push(file);
    }
    merge(files)
}

/// Load and merge multiple models from YAML strings.
///
/// Later strings override earlier ones:
/// - `simulation`, `propagation` and `exciter` sections replace earlier ones
/// - machines and tags with the same name replace earlier ones, keeping
///   their original position; a tag with `remove: true` deletes it
/// - events are accumulated
///
/// Cross references are checked when the model is built, not here.
pub fn load_models_from_str(yaml_strs: &[&str]) -> Result<Model, ModelError> {
    if yaml_strs.is_empty() {
        return Err(ModelError::InvalidConfig("No model strings provided".to_string()));
    }
    let files = yaml_strs
        .iter()
        .map(|s| serde_yaml::from_str::<ModelFile>(s))
        .collect::<Result<Vec<_>, _>>()?;
    merge(files)
}

fn merge(files: Vec<ModelFile>) -> Result<Model, ModelError> {
    let mut model = Model::default();

    for file in files {
        if let Some(simulation) = file.simulation {
            model.simulation = simulation;
        }
        if let Some(propagation) = file.propagation {
            model.propagation = propagation;
        }
        if file.exciter.is_some() {
            model.exciter = file.exciter;
        }

        let mut seen = Vec::new();
        for machine in file.machines {
            if seen.contains(&machine.name) {
                return Err(ConfigError::DuplicateMachine(machine.name).into());
            }
            seen.push(machine.name.clone());
            match model.machines.iter_mut().find(|m| m.name == machine.name) {
                Some(existing) => *existing = machine,
                None => model.machines.push(machine),
            }
        }

        let mut seen = Vec::new();
        for tag in file.tags {
            if seen.contains(&tag.name) {
                return Err(ConfigError::DuplicateTag(tag.name).into());
            }
            seen.push(tag.name.clone());
            let existing = model.tags.iter().position(|t| t.name == tag.name);
            match (existing, tag.remove) {
                (Some(i), true) => {
                    model.tags.remove(i);
                }
                (None, true) => return Err(ConfigError::UnknownTag(tag.name).into()),
                (Some(i), false) => model.tags[i] = tag,
                (None, false) => model.tags.push(tag),
            }
        }

        model.events.extend(file.events);
    }

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagsim_physics::{Detector, PathLoss};

    const BASE: &str = r#"
simulation:
  seed: 42
  duration_s: 0.001
propagation:
  range_m: 50
  path_loss: lossless
  detector: { kind: rectified, impedance_ohm: 50 }
machines:
  - name: listen
    kind: input
    entry: idle
    states:
      - name: idle
        program:
          - { op: log, label: rx, values: [in.voltage] }
  - name: pass
    kind: processing
    entry: idle
    states:
      - name: idle
  - name: beacon
    kind: output
    entry: idle
    states:
      - name: idle
        program:
          - { op: send }
tags:
  - name: alice
    position: [0, 0, 0]
    reflection_coefficients: [0.0, 0.8]
    antenna: 1
    machines: { input: listen, processing: pass, output: beacon }
    registers:
      processing: { r0: 1.5 }
  - name: bob
    position: { x: 3, y: 4 }
    machines: { input: listen, processing: pass, output: beacon }
events:
  - { time_s: 0.0005, tag: bob, action: { type: move, position: [6, 8] } }
"#;

    #[test]
    fn test_load_model_from_str() {
        let model = load_model_from_str(BASE).unwrap();
        assert_eq!(model.simulation.seed, Some(42));
        assert_eq!(model.simulation.register_count, 8);
        assert_eq!(model.propagation.range_m, 50.0);
        assert_eq!(model.propagation.path_loss, PathLoss::Lossless);
        assert_eq!(
            model.propagation.detector,
            Detector::Rectified { impedance_ohm: 50.0 }
        );
        assert_eq!(model.machines.len(), 3);
        assert_eq!(model.tags.len(), 2);

        let alice = model.tag("alice").unwrap();
        assert_eq!(alice.antenna, 1);
        assert_eq!(alice.frequency_hz, 915e6);
        assert_eq!(alice.registers[&MachineKind::Processing]["r0"], 1.5);

        let bob = model.tag("bob").unwrap();
        assert_eq!(bob.position, Position::new(3.0, 4.0, 0.0));
        assert_eq!(
            model.events[0].action,
            ScriptAction::Move {
                position: Position::new(6.0, 8.0, 0.0)
            }
        );
    }

    #[test]
    fn test_merge_overrides() {
        let overlay = r#"
simulation:
  seed: 9
tags:
  - name: bob
    remove: true
  - name: carol
    position: [1, 0, 0]
    machines: { input: listen, processing: pass, output: beacon }
events:
  - { time_s: 0.0, tag: carol, action: { type: inject, machine: processing, value: 2 } }
"#;
        let model = load_models_from_str(&[BASE, overlay]).unwrap();
        assert_eq!(model.simulation.seed, Some(9));
        // Untouched sections survive.
        assert_eq!(model.propagation.range_m, 50.0);
        let names: Vec<_> = model.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol"]);
        assert_eq!(model.events.len(), 2);
    }

    #[test]
    fn test_duplicate_names_in_one_file() {
        let yaml = r#"
machines:
  - { name: m, kind: input, entry: a, states: [{ name: a }] }
  - { name: m, kind: input, entry: a, states: [{ name: a }] }
"#;
        assert!(matches!(
            load_model_from_str(yaml),
            Err(ModelError::Config(ConfigError::DuplicateMachine(_)))
        ));
    }

    #[test]
    fn test_remove_unknown_tag() {
        let yaml = "tags:\n  - { name: ghost, remove: true }\n";
        assert!(matches!(
            load_model_from_str(yaml),
            Err(ModelError::Config(ConfigError::UnknownTag(_)))
        ));
    }

    #[test]
    fn test_unknown_section_rejected() {
        assert!(matches!(
            load_model_from_str("nodes: []\n"),
            Err(ModelError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_models_requires_input() {
        assert!(matches!(
            load_models(&[]),
            Err(ModelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_json_file() {
        let dir = std::env::temp_dir().join(format!("tagsim-model-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.json");
        std::fs::write(
            &path,
            r#"{"simulation": {"max_events": 10}, "propagation": {"range_m": 5}}"#,
        )
        .unwrap();
        let model = load_model(&path).unwrap();
        assert_eq!(model.simulation.max_events, Some(10));
        assert_eq!(model.propagation.range_m, 5.0);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
