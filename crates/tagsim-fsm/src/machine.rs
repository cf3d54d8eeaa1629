//! Machine and state definitions.
//!
//! A [`MachineSpec`] is the plain deserialized form. [`MachineDef::compile`]
//! validates it and resolves state names, producing the immutable definition
//! shared by every tag that runs the machine.

use crate::instruction::Instruction;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tagsim_common::{ConfigError, MachineKind};

/// A state as written in a model file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    /// State name, unique within its machine.
    pub name: String,
    /// States this one may transition to.
    #[serde(default)]
    pub transitions: Vec<String>,
    /// Instructions executed on each activation.
    #[serde(default)]
    pub program: Vec<Instruction>,
}

/// A machine as written in a model file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineSpec {
    /// Machine name, referenced by tags.
    pub name: String,
    /// Slot the machine fills in a tag.
    pub kind: MachineKind,
    /// Initial state.
    pub entry: String,
    /// All states.
    pub states: Vec<StateSpec>,
}

/// Index of a state within its machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub usize);

/// A validated state.
#[derive(Debug, Clone)]
pub struct StateDef {
    name: String,
    program: Vec<Instruction>,
    transitions: BTreeSet<StateId>,
}

impl StateDef {
    /// State name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The state's program.
    pub fn program(&self) -> &[Instruction] {
        &self.program
    }

    /// Declared transition targets.
    pub fn transitions(&self) -> &BTreeSet<StateId> {
        &self.transitions
    }
}

/// A validated, immutable machine definition.
#[derive(Debug, Clone)]
pub struct MachineDef {
    name: String,
    kind: MachineKind,
    entry: StateId,
    states: Vec<StateDef>,
    by_name: HashMap<String, StateId>,
}

impl MachineDef {
    /// Validate a spec against a register bank of `register_count` registers.
    ///
    /// Transition *instructions* are not checked here: a program may name any
    /// state, and an illegal one faults the machine when it executes.
    pub fn compile(spec: &MachineSpec, register_count: usize) -> Result<Self, ConfigError> {
        if spec.states.is_empty() {
            return Err(ConfigError::Empty(format!("machine '{}' states", spec.name)));
        }

        let mut by_name = HashMap::with_capacity(spec.states.len());
        for (i, state) in spec.states.iter().enumerate() {
            if by_name.insert(state.name.clone(), StateId(i)).is_some() {
                return Err(ConfigError::DuplicateState {
                    machine: spec.name.clone(),
                    state: state.name.clone(),
                });
            }
        }

        let entry = *by_name
            .get(&spec.entry)
            .ok_or_else(|| ConfigError::MissingEntryState {
                machine: spec.name.clone(),
                entry: spec.entry.clone(),
            })?;

        let mut states = Vec::with_capacity(spec.states.len());
        for state in &spec.states {
            let mut transitions = BTreeSet::new();
            for target in &state.transitions {
                let id = by_name
                    .get(target)
                    .ok_or_else(|| ConfigError::UnknownTransitionTarget {
                        machine: spec.name.clone(),
                        state: state.name.clone(),
                        target: target.clone(),
                    })?;
                transitions.insert(*id);
            }

            for (pc, instruction) in state.program.iter().enumerate() {
                if let Some(register) = instruction
                    .registers()
                    .into_iter()
                    .find(|r| r.index() >= register_count)
                {
                    return Err(ConfigError::RegisterOutOfRange {
                        machine: spec.name.clone(),
                        state: state.name.clone(),
                        pc,
                        register: register.0,
                        count: register_count,
                    });
                }
            }

            states.push(StateDef {
                name: state.name.clone(),
                program: state.program.clone(),
                transitions,
            });
        }

        Ok(MachineDef {
            name: spec.name.clone(),
            kind: spec.kind,
            entry,
            states,
            by_name,
        })
    }

    /// Machine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot the machine fills.
    pub fn kind(&self) -> MachineKind {
        self.kind
    }

    /// Entry state.
    pub fn entry(&self) -> StateId {
        self.entry
    }

    /// Look up a state. Ids come from this definition, so the index is valid.
    pub fn state(&self, id: StateId) -> &StateDef {
        &self.states[id.0]
    }

    /// Resolve a state name.
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a state name, failing with a configuration error.
    pub fn require_state(&self, name: &str) -> Result<StateId, ConfigError> {
        self.state_id(name).ok_or_else(|| ConfigError::UnknownState {
            machine: self.name.clone(),
            state: name.to_string(),
        })
    }

    /// Number of states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Whether `to` is a declared transition target of `from`.
    pub fn can_transition(&self, from: StateId, to: StateId) -> bool {
        self.states
            .get(from.0)
            .is_some_and(|s| s.transitions.contains(&to))
    }
}
