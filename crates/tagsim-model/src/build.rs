//! Building runtime objects from a loaded model.

use crate::{Model, ScriptAction, TagSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tagsim_common::{ConfigError, EventPayload, MachineKind, SimTime, TagControl, TagId};
use tagsim_fsm::{MachineDef, MachineInstance, RegisterBank, Register, TagInstance, TagParams};
use tracing::debug;

/// A scripted event resolved against the tag table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    /// Firing time.
    pub time: SimTime,
    /// Target tag.
    pub tag: TagId,
    /// Target machine, for injected messages.
    pub machine: Option<MachineKind>,
    /// Payload.
    pub payload: EventPayload,
}

/// Everything a simulation needs from a model, validated.
#[derive(Debug, Clone)]
pub struct Blueprint {
    /// Compiled machine definitions by name.
    pub machines: BTreeMap<String, Arc<MachineDef>>,
    /// Tags in model order; `tags[i].id() == TagId(i)`.
    pub tags: Vec<TagInstance>,
    /// Scripted events in model order.
    pub script: Vec<ScriptEntry>,
}

impl Blueprint {
    /// Validate `model` and build its tags.
    pub fn build(model: &Model) -> Result<Self, ConfigError> {
        let sim = &model.simulation;
        if sim.register_count == 0 || sim.register_count > usize::from(u8::MAX) + 1 {
            return Err(invalid(
                "simulation.register_count",
                format!("must be between 1 and 256, got {}", sim.register_count),
            ));
        }
        if sim.max_steps_per_activation == 0 {
            return Err(invalid("simulation.max_steps_per_activation", "must be positive".to_string()));
        }
        if let Some(duration) = sim.duration_s {
            if SimTime::from_secs_f64(duration).is_none() {
                return Err(invalid("simulation.duration_s", format!("invalid duration {}", duration)));
            }
        }
        model.propagation.validate()?;
        if let Some(exciter) = &model.exciter {
            exciter.validate()?;
        }

        let mut machines = BTreeMap::new();
        for spec in &model.machines {
            let def = MachineDef::compile(spec, sim.register_count)?;
            if machines.insert(spec.name.clone(), Arc::new(def)).is_some() {
                return Err(ConfigError::DuplicateMachine(spec.name.clone()));
            }
        }

        if model.tags.is_empty() {
            return Err(ConfigError::Empty("tags".to_string()));
        }
        let mut tags: Vec<TagInstance> = Vec::with_capacity(model.tags.len());
        for (i, spec) in model.tags.iter().enumerate() {
            if tags.iter().any(|t| t.name() == spec.name) {
                return Err(ConfigError::DuplicateTag(spec.name.clone()));
            }
            let id = TagId::new(i as u32);
            tags.push(build_tag(id, spec, &machines, sim.register_count)?);
        }

        let mut script = Vec::with_capacity(model.events.len());
        for event in &model.events {
            let tag = tags
                .iter()
                .find(|t| t.name() == event.tag)
                .ok_or_else(|| ConfigError::UnknownTag(event.tag.clone()))?;
            let time = SimTime::from_secs_f64(event.time_s).ok_or_else(|| {
                invalid(
                    &format!("events[{}].time_s", event.tag),
                    format!("invalid time {}", event.time_s),
                )
            })?;
            let (machine, payload) = match &event.action {
                ScriptAction::SetAntenna { index } => {
                    if *index >= tag.params().reflection_coefficients.len() {
                        return Err(invalid(
                            &format!("events[{}].action.index", event.tag),
                            format!(
                                "index {} outside reflection table of {} entries",
                                index,
                                tag.params().reflection_coefficients.len()
                            ),
                        ));
                    }
                    (None, EventPayload::Control(TagControl::SetAntenna { index: *index }))
                }
                ScriptAction::Move { position } => {
                    (None, EventPayload::Control(TagControl::Move { position: *position }))
                }
                ScriptAction::Inject { machine, value } => (
                    Some(*machine),
                    EventPayload::Message {
                        from: None,
                        value: *value,
                    },
                ),
            };
            script.push(ScriptEntry {
                time,
                tag: tag.id(),
                machine,
                payload,
            });
        }

        debug!(
            machines = machines.len(),
            tags = tags.len(),
            events = script.len(),
            "model built"
        );
        Ok(Blueprint {
            machines,
            tags,
            script,
        })
    }
}

fn build_tag(
    id: TagId,
    spec: &TagSpec,
    machines: &BTreeMap<String, Arc<MachineDef>>,
    register_count: usize,
) -> Result<TagInstance, ConfigError> {
    let names = spec
        .machines
        .as_ref()
        .ok_or_else(|| invalid(&format!("tags.{}.machines", spec.name), "is required".to_string()))?;

    let mut instances = Vec::with_capacity(3);
    for kind in MachineKind::ALL {
        let name = names.get(kind);
        let def = machines
            .get(name)
            .ok_or_else(|| ConfigError::UnknownMachine {
                tag: spec.name.clone(),
                kind,
                machine: name.to_string(),
            })?;
        if def.kind() != kind {
            return Err(ConfigError::MachineKindMismatch {
                tag: spec.name.clone(),
                machine: name.to_string(),
                expected: kind,
                actual: def.kind(),
            });
        }

        let start = match spec.start_states.get(&kind) {
            Some(state) => def.require_state(state)?,
            None => def.entry(),
        };

        let mut registers = RegisterBank::new(register_count);
        for (reg, value) in spec.registers.get(&kind).into_iter().flatten() {
            let field = format!("tags.{}.registers.{}.{}", spec.name, kind, reg);
            let register: Register = reg.parse().map_err(|e: String| invalid(&field, e))?;
            if !value.is_finite() {
                return Err(invalid(&field, format!("must be finite, got {}", value)));
            }
            if !registers.set(register, *value) {
                return Err(invalid(
                    &field,
                    format!("outside bank of {} registers", register_count),
                ));
            }
        }

        instances.push(MachineInstance::new(Arc::clone(def), start, registers));
    }

    let machines: [MachineInstance; 3] = instances
        .try_into()
        .map_err(|_| invalid(&format!("tags.{}.machines", spec.name), "expected three machines".to_string()))?;

    let params = TagParams {
        position: spec.position,
        frequency_hz: spec.frequency_hz,
        amplitude: spec.amplitude,
        reflection_coefficients: spec.reflection_coefficients.clone(),
        antenna: spec.antenna,
    };
    TagInstance::new(id, spec.name.clone(), params, machines)
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidParameter {
        name: name.to_string(),
        reason,
    }
}
