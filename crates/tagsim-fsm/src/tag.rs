//! The tag aggregate: three machine instances plus physical parameters.

use crate::interpreter::{Activation, ActivationContext, MachineInstance, MachineStatus, Stimulus};
use serde::Serialize;
use tagsim_common::{ConfigError, MachineKind, Position, SimTime, TagId};

/// Physical parameters of a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagParams {
    /// Location.
    pub position: Position,
    /// Carrier frequency, Hz.
    pub frequency_hz: f64,
    /// Default transmit amplitude.
    pub amplitude: f64,
    /// Reflection coefficient per antenna state.
    pub reflection_coefficients: Vec<f64>,
    /// Active antenna state.
    pub antenna: usize,
}

impl Default for TagParams {
    fn default() -> Self {
        TagParams {
            position: Position::default(),
            frequency_hz: 915e6,
            amplitude: 1.0,
            reflection_coefficients: vec![1.0],
            antenna: 0,
        }
    }
}

impl TagParams {
    /// Check the parameters of tag `name`.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: String| ConfigError::InvalidParameter {
            name: format!("tags.{}.{}", name, field),
            reason,
        };
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(invalid("frequency_hz", format!("must be positive, got {}", self.frequency_hz)));
        }
        if !self.amplitude.is_finite() || self.amplitude < 0.0 {
            return Err(invalid("amplitude", format!("must be non-negative, got {}", self.amplitude)));
        }
        if self.reflection_coefficients.is_empty() {
            return Err(invalid("reflection_coefficients", "must not be empty".to_string()));
        }
        if self.reflection_coefficients.iter().any(|c| !c.is_finite()) {
            return Err(invalid("reflection_coefficients", "must be finite".to_string()));
        }
        if self.antenna >= self.reflection_coefficients.len() {
            return Err(invalid(
                "antenna",
                format!(
                    "index {} outside reflection table of {} entries",
                    self.antenna,
                    self.reflection_coefficients.len()
                ),
            ));
        }
        let p = self.position;
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
            return Err(invalid("position", "must be finite".to_string()));
        }
        Ok(())
    }
}

/// A simulated tag.
#[derive(Debug, Clone)]
pub struct TagInstance {
    id: TagId,
    name: String,
    params: TagParams,
    machines: [MachineInstance; 3],
}

impl TagInstance {
    /// Assemble a tag. `machines` must be ordered input, processing, output.
    pub fn new(
        id: TagId,
        name: impl Into<String>,
        params: TagParams,
        machines: [MachineInstance; 3],
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        params.validate(&name)?;
        for (expected, machine) in MachineKind::ALL.iter().zip(machines.iter()) {
            if machine.kind() != *expected {
                return Err(ConfigError::MachineKindMismatch {
                    tag: name,
                    machine: machine.definition().name().to_string(),
                    expected: *expected,
                    actual: machine.kind(),
                });
            }
        }
        Ok(TagInstance {
            id,
            name,
            params,
            machines,
        })
    }

    /// Tag id.
    pub fn id(&self) -> TagId {
        self.id
    }

    /// Tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical parameters.
    pub fn params(&self) -> &TagParams {
        &self.params
    }

    /// Current position.
    pub fn position(&self) -> Position {
        self.params.position
    }

    /// One of the tag's machines.
    pub fn machine(&self, kind: MachineKind) -> &MachineInstance {
        &self.machines[kind.index()]
    }

    /// All three machines, input first.
    pub fn machines(&self) -> &[MachineInstance; 3] {
        &self.machines
    }

    /// Reflection coefficient of the active antenna state.
    pub fn reflection(&self) -> f64 {
        self.params
            .reflection_coefficients
            .get(self.params.antenna)
            .copied()
            .unwrap_or(1.0)
    }

    /// Switch antenna state. Returns false if `index` is out of range.
    pub fn set_antenna(&mut self, index: usize) -> bool {
        if index < self.params.reflection_coefficients.len() {
            self.params.antenna = index;
            true
        } else {
            false
        }
    }

    /// Relocate the tag.
    pub fn set_position(&mut self, position: Position) {
        self.params.position = position;
    }

    /// Run one of the tag's machines against an event.
    pub fn activate(
        &mut self,
        kind: MachineKind,
        stimulus: &Stimulus,
        now: SimTime,
        max_steps: usize,
    ) -> Activation {
        let ctx = ActivationContext {
            now,
            max_steps,
            antenna_states: self.params.reflection_coefficients.len(),
        };
        self.machines[kind.index()].activate(stimulus, &ctx)
    }

    /// Observable state of the tag.
    pub fn snapshot(&self) -> TagSnapshot {
        TagSnapshot {
            name: self.name.clone(),
            antenna: self.params.antenna,
            position: [self.params.position.x, self.params.position.y, self.params.position.z],
            machines: self
                .machines
                .iter()
                .map(|m| MachineSnapshot {
                    kind: m.kind(),
                    machine: m.definition().name().to_string(),
                    state: m.current_state_name().to_string(),
                    waiting: matches!(m.status(), MachineStatus::Waiting { .. }),
                    fault: match m.status() {
                        MachineStatus::Faulted(fault) => Some(fault.code().to_string()),
                        _ => None,
                    },
                    registers: m.registers().values().to_vec(),
                })
                .collect(),
        }
    }
}

/// Observable state of a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagSnapshot {
    /// Tag name.
    pub name: String,
    /// Active antenna state.
    pub antenna: usize,
    /// Position.
    pub position: [f64; 3],
    /// Machines, input first.
    pub machines: Vec<MachineSnapshot>,
}

/// Observable state of one machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSnapshot {
    /// Machine slot.
    pub kind: MachineKind,
    /// Definition name.
    pub machine: String,
    /// Current state.
    pub state: String,
    /// Suspended on a wait.
    pub waiting: bool,
    /// Fault code, if faulted.
    pub fault: Option<String>,
    /// General registers.
    pub registers: Vec<Option<f64>>,
}
