//! Execution of one machine instance.
//!
//! An activation binds the triggering event into the input registers and runs
//! the current state's program from pc 0, or from the stored resume point if
//! the machine was waiting, until it transitions, waits, halts, runs off the
//! end of the program, or faults. Side effects are collected in execution
//! order and applied by the caller.

use crate::fault::MachineFault;
use crate::instruction::{InputField, Instruction, Operand, Register, WaitCondition};
use crate::machine::{MachineDef, StateId};
use std::sync::Arc;
use tagsim_common::{Emission, MachineKind, SimTime, TagId};
use tracing::trace;

// ============================================================================
// Registers
// ============================================================================

/// A machine's general registers. Unwritten registers hold `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterBank {
    values: Vec<Option<f64>>,
}

impl RegisterBank {
    /// A bank of `count` uninitialised registers.
    pub fn new(count: usize) -> Self {
        RegisterBank {
            values: vec![None; count],
        }
    }

    /// Read a register.
    pub fn get(&self, register: Register) -> Option<f64> {
        self.values.get(register.index()).copied().flatten()
    }

    /// Write a register. Returns false if it is outside the bank.
    pub fn set(&mut self, register: Register, value: f64) -> bool {
        match self.values.get_mut(register.index()) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bank has no registers.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All register values.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }
}

/// Reception data handed to the input machine.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalInput {
    /// Detected voltage.
    pub voltage: f64,
    /// Phase of the net field, radians.
    pub phase: f64,
    /// Sender carrier frequency, Hz.
    pub frequency_hz: f64,
    /// Distance to the sender, metres.
    pub distance_m: f64,
    /// Distance at the sender's previous transmission.
    pub previous_distance_m: Option<f64>,
    /// Sending tag.
    pub sender: TagId,
    /// Arrivals merged into the reception.
    pub arrivals: usize,
}

/// What woke a machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Stimulus {
    /// Start of the run.
    Init,
    /// A signal reception.
    Signal(SignalInput),
    /// A timer expiry.
    Timer {
        /// Timer identifier.
        timer_id: u32,
    },
    /// A forwarded or injected value.
    Message {
        /// Forwarding machine, `None` when injected by a script.
        from: Option<MachineKind>,
        /// The value.
        value: f64,
    },
}

impl WaitCondition {
    /// Whether `stimulus` ends a wait on this condition.
    pub fn matches(&self, stimulus: &Stimulus) -> bool {
        match self {
            WaitCondition::Any => true,
            WaitCondition::Signal => matches!(stimulus, Stimulus::Signal(_)),
            WaitCondition::Timer => matches!(stimulus, Stimulus::Timer { .. }),
            WaitCondition::Message => matches!(stimulus, Stimulus::Message { .. }),
        }
    }
}

/// Read-only registers bound from the current stimulus.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRegisters {
    signal: Option<SignalInput>,
    value: Option<f64>,
    from: Option<f64>,
    timer: Option<f64>,
    now: f64,
}

impl InputRegisters {
    fn bind(stimulus: &Stimulus, now: SimTime) -> Self {
        let mut inputs = InputRegisters {
            now: now.as_secs_f64(),
            ..Default::default()
        };
        match stimulus {
            Stimulus::Init => {}
            Stimulus::Signal(signal) => inputs.signal = Some(signal.clone()),
            Stimulus::Timer { timer_id } => inputs.timer = Some(f64::from(*timer_id)),
            Stimulus::Message { from, value } => {
                inputs.value = Some(*value);
                inputs.from = from.map(|m| m.index() as f64);
            }
        }
        inputs
    }

    /// Read an input register.
    pub fn get(&self, field: InputField) -> Option<f64> {
        let signal = self.signal.as_ref();
        match field {
            InputField::Voltage => signal.map(|s| s.voltage),
            InputField::Phase => signal.map(|s| s.phase),
            InputField::Frequency => signal.map(|s| s.frequency_hz),
            InputField::Distance => signal.map(|s| s.distance_m),
            InputField::PreviousDistance => signal.and_then(|s| s.previous_distance_m),
            InputField::Sender => signal.map(|s| f64::from(s.sender.0)),
            InputField::Arrivals => signal.map(|s| s.arrivals as f64),
            InputField::Value => self.value,
            InputField::From => self.from,
            InputField::Timer => self.timer,
            InputField::Now => Some(self.now),
        }
    }

    fn emission(&self, label: Option<String>, values: Vec<f64>) -> Emission {
        let signal = self.signal.as_ref();
        Emission {
            label,
            voltage: signal.map(|s| s.voltage),
            phase: signal.map(|s| s.phase),
            distance_from_sender: signal.map(|s| s.distance_m),
            previous_distance_from_sender: signal.and_then(|s| s.previous_distance_m),
            sender_frequency: signal.map(|s| s.frequency_hz),
            sender: signal.map(|s| s.sender),
            values,
        }
    }
}

// ============================================================================
// Activation Results
// ============================================================================

/// A side effect requested by an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Transmit; `None` amplitude means the tag's own.
    Send {
        /// Requested amplitude.
        amplitude: Option<f64>,
        /// Emitted phase, radians.
        phase: f64,
    },
    /// Arm a timer on this machine.
    ArmTimer {
        /// Delay in seconds; negative delays are the scheduler's to reject.
        delay_s: f64,
        /// Timer identifier.
        timer_id: u32,
    },
    /// Deliver a value to a machine of the same tag.
    Forward {
        /// Target machine.
        to: MachineKind,
        /// Value.
        value: f64,
    },
    /// Switch the tag's antenna state.
    SetAntenna {
        /// Reflection table index.
        index: usize,
    },
    /// Emit a log record.
    Log(Emission),
}

/// How an activation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The machine moved to a new state.
    Transitioned {
        /// Previous state.
        from: StateId,
        /// New state.
        to: StateId,
    },
    /// The machine suspended on a `wait`.
    Waiting {
        /// Instruction to resume at.
        resume_at: usize,
    },
    /// The program halted (explicitly or by running off its end).
    Halted,
    /// The event was dropped without running anything.
    Ignored(IgnoreReason),
}

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The machine has faulted.
    Faulted,
    /// The machine is waiting for a different kind of event.
    WaitMismatch,
}

/// Result of one activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    /// Outcome or fault.
    pub result: Result<Outcome, MachineFault>,
    /// Side effects, in execution order.
    pub effects: Vec<Effect>,
    /// Instructions executed.
    pub steps: usize,
}

impl Activation {
    fn ignored(reason: IgnoreReason) -> Self {
        Activation {
            result: Ok(Outcome::Ignored(reason)),
            effects: Vec::new(),
            steps: 0,
        }
    }
}

/// Limits an activation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationContext {
    /// Current simulation time.
    pub now: SimTime,
    /// Maximum instructions per activation.
    pub max_steps: usize,
    /// Size of the tag's reflection table.
    pub antenna_states: usize,
}

// ============================================================================
// Machine Instance
// ============================================================================

/// Run state of a machine instance.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineStatus {
    /// Will start at pc 0 on the next event.
    Ready,
    /// Suspended on a `wait`.
    Waiting {
        /// Instruction to resume at.
        resume_at: usize,
        /// Events that end the wait.
        on: WaitCondition,
    },
    /// Stopped by a fault.
    Faulted(MachineFault),
}

/// A running copy of a machine definition, owned by one tag.
#[derive(Debug, Clone)]
pub struct MachineInstance {
    definition: Arc<MachineDef>,
    current: StateId,
    status: MachineStatus,
    registers: RegisterBank,
    inputs: InputRegisters,
}

impl MachineInstance {
    /// Create an instance starting in `start`.
    pub fn new(definition: Arc<MachineDef>, start: StateId, registers: RegisterBank) -> Self {
        MachineInstance {
            definition,
            current: start,
            status: MachineStatus::Ready,
            registers,
            inputs: InputRegisters::default(),
        }
    }

    /// The shared definition.
    pub fn definition(&self) -> &MachineDef {
        &self.definition
    }

    /// Machine kind.
    pub fn kind(&self) -> MachineKind {
        self.definition.kind()
    }

    /// Current state.
    pub fn current_state(&self) -> StateId {
        self.current
    }

    /// Name of the current state.
    pub fn current_state_name(&self) -> &str {
        self.definition.state(self.current).name()
    }

    /// Run status.
    pub fn status(&self) -> &MachineStatus {
        &self.status
    }

    /// Whether the machine has faulted.
    pub fn is_faulted(&self) -> bool {
        matches!(self.status, MachineStatus::Faulted(_))
    }

    /// General registers.
    pub fn registers(&self) -> &RegisterBank {
        &self.registers
    }

    /// Input registers of the last accepted activation.
    pub fn inputs(&self) -> &InputRegisters {
        &self.inputs
    }

    /// Handle one event.
    pub fn activate(&mut self, stimulus: &Stimulus, ctx: &ActivationContext) -> Activation {
        let start = match &self.status {
            MachineStatus::Faulted(_) => return Activation::ignored(IgnoreReason::Faulted),
            MachineStatus::Waiting { resume_at, on } => {
                if !on.matches(stimulus) {
                    return Activation::ignored(IgnoreReason::WaitMismatch);
                }
                *resume_at
            }
            MachineStatus::Ready => 0,
        };

        self.inputs = InputRegisters::bind(stimulus, ctx.now);
        self.status = MachineStatus::Ready;

        let mut effects = Vec::new();
        let mut steps = 0;
        let result = self.execute(start, ctx, &mut effects, &mut steps);
        if let Err(fault) = &result {
            self.status = MachineStatus::Faulted(fault.clone());
        }

        Activation {
            result,
            effects,
            steps,
        }
    }

    fn execute(
        &mut self,
        start: usize,
        ctx: &ActivationContext,
        effects: &mut Vec<Effect>,
        steps: &mut usize,
    ) -> Result<Outcome, MachineFault> {
        let definition = Arc::clone(&self.definition);
        let state = definition.state(self.current);
        let program = state.program();
        let mut pc = start;

        loop {
            let Some(instruction) = program.get(pc) else {
                if pc == program.len() {
                    return Ok(Outcome::Halted);
                }
                return Err(MachineFault::Program {
                    pc,
                    reason: format!("offset outside program of length {}", program.len()),
                });
            };
            if *steps >= ctx.max_steps {
                return Err(MachineFault::Program {
                    pc,
                    reason: format!("step limit of {} exceeded", ctx.max_steps),
                });
            }
            *steps += 1;
            trace!(state = state.name(), pc, op = %instruction.opcode(), "execute");

            if let Some((op, dst, a, b)) = instruction.as_binary() {
                let value = op
                    .apply(self.read(a, pc)?, self.read(b, pc)?)
                    .map_err(|reason| MachineFault::Arithmetic { pc, reason })?;
                self.write(dst, value, pc)?;
                pc += 1;
                continue;
            }
            if let Some((op, dst, src)) = instruction.as_unary() {
                let value = op
                    .apply(self.read(src, pc)?)
                    .map_err(|reason| MachineFault::Arithmetic { pc, reason })?;
                self.write(dst, value, pc)?;
                pc += 1;
                continue;
            }

            match instruction {
                Instruction::Set { dst, src } => {
                    let value = self.read(*src, pc)?;
                    self.write(*dst, value, pc)?;
                }
                Instruction::Branch { cmp, a, b, target } => {
                    if cmp.holds(self.read(*a, pc)?, self.read(*b, pc)?) {
                        pc = jump_target(*target, program.len(), pc)?;
                        continue;
                    }
                }
                Instruction::Jump { target } => {
                    pc = jump_target(*target, program.len(), pc)?;
                    continue;
                }
                Instruction::Transition { target } => {
                    let from = self.current;
                    let to = definition
                        .state_id(target)
                        .filter(|to| definition.can_transition(from, *to))
                        .ok_or_else(|| MachineFault::InvalidTransition {
                            pc,
                            from: state.name().to_string(),
                            to: target.clone(),
                        })?;
                    self.current = to;
                    return Ok(Outcome::Transitioned { from, to });
                }
                Instruction::Send { amplitude, phase } => {
                    let amplitude = match amplitude {
                        Some(op) => Some(self.read(*op, pc)?),
                        None => None,
                    };
                    let phase = match phase {
                        Some(op) => self.read(*op, pc)?,
                        None => 0.0,
                    };
                    effects.push(Effect::Send { amplitude, phase });
                }
                Instruction::Wait { on } => {
                    self.status = MachineStatus::Waiting {
                        resume_at: pc + 1,
                        on: *on,
                    };
                    return Ok(Outcome::Waiting { resume_at: pc + 1 });
                }
                Instruction::SetTimer { delay, id } => {
                    let delay_s = self.read(*delay, pc)?;
                    if !delay_s.is_finite() {
                        return Err(MachineFault::Arithmetic {
                            pc,
                            reason: format!("non-finite timer delay {}", delay_s),
                        });
                    }
                    effects.push(Effect::ArmTimer {
                        delay_s,
                        timer_id: *id,
                    });
                }
                Instruction::SetAntenna { index } => {
                    let raw = self.read(*index, pc)?;
                    let valid = raw >= 0.0 && raw.fract() == 0.0 && (raw as usize) < ctx.antenna_states;
                    if !valid {
                        return Err(MachineFault::Program {
                            pc,
                            reason: format!(
                                "antenna index {} outside reflection table of {} entries",
                                raw, ctx.antenna_states
                            ),
                        });
                    }
                    effects.push(Effect::SetAntenna { index: raw as usize });
                }
                Instruction::Forward { to, value } => {
                    let value = self.read(*value, pc)?;
                    effects.push(Effect::Forward { to: *to, value });
                }
                Instruction::Log { label, values } => {
                    let values = values
                        .iter()
                        .map(|op| self.read(*op, pc))
                        .collect::<Result<Vec<f64>, MachineFault>>()?;
                    effects.push(Effect::Log(self.inputs.emission(label.clone(), values)));
                }
                Instruction::Halt => return Ok(Outcome::Halted),
                // Arithmetic was dispatched above.
                _ => {}
            }
            pc += 1;
        }
    }

    fn read(&self, operand: Operand, pc: usize) -> Result<f64, MachineFault> {
        match operand {
            Operand::Imm(value) => Ok(value),
            Operand::Reg(register) => {
                self.registers
                    .get(register)
                    .ok_or_else(|| MachineFault::UninitializedRegister {
                        pc,
                        register: register.to_string(),
                    })
            }
            Operand::Input(field) => {
                self.inputs
                    .get(field)
                    .ok_or_else(|| MachineFault::UninitializedRegister {
                        pc,
                        register: field.to_string(),
                    })
            }
        }
    }

    fn write(&mut self, register: Register, value: f64, pc: usize) -> Result<(), MachineFault> {
        if self.registers.set(register, value) {
            Ok(())
        } else {
            Err(MachineFault::Program {
                pc,
                reason: format!("register {} outside bank of {}", register, self.registers.len()),
            })
        }
    }
}

fn jump_target(target: usize, len: usize, pc: usize) -> Result<usize, MachineFault> {
    if target < len {
        Ok(target)
    } else {
        Err(MachineFault::Program {
            pc,
            reason: format!("branch target {} outside program of length {}", target, len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineSpec;

    fn instance(yaml: &str) -> MachineInstance {
        let spec: MachineSpec = serde_yaml::from_str(yaml).unwrap();
        let def = Arc::new(MachineDef::compile(&spec, 8).unwrap());
        let entry = def.entry();
        MachineInstance::new(def, entry, RegisterBank::new(8))
    }

    fn ctx() -> ActivationContext {
        ActivationContext {
            now: SimTime::from_micros(5),
            max_steps: 1_000,
            antenna_states: 2,
        }
    }

    fn signal(voltage: f64) -> Stimulus {
        Stimulus::Signal(SignalInput {
            voltage,
            phase: 0.5,
            frequency_hz: 915e6,
            distance_m: 2.0,
            previous_distance_m: None,
            sender: TagId::new(1),
            arrivals: 1,
        })
    }

    const WAITER: &str = r#"
name: waiter
kind: input
entry: idle
states:
  - name: idle
    transitions: [done]
    program:
      - { op: set, dst: r0, src: 1 }
      - { op: wait, on: signal }
      - { op: set, dst: r1, src: in.voltage }
      - { op: add, dst: r0, a: r0, b: 1 }
      - { op: transition, target: done }
  - name: done
    program:
      - { op: log, label: done, values: [r0, r1] }
"#;

    #[test]
    fn test_wait_suspends_and_resumes_after_wait() {
        let mut m = instance(WAITER);
        let first = m.activate(&Stimulus::Init, &ctx());
        assert_eq!(first.result, Ok(Outcome::Waiting { resume_at: 2 }));
        assert_eq!(m.registers().values()[0], Some(1.0));

        let before = m.registers().clone();
        let ignored = m.activate(&Stimulus::Timer { timer_id: 3 }, &ctx());
        assert_eq!(ignored.result, Ok(Outcome::Ignored(IgnoreReason::WaitMismatch)));
        assert_eq!(ignored.steps, 0);
        assert_eq!(m.registers(), &before);

        let resumed = m.activate(&signal(0.75), &ctx());
        assert!(matches!(resumed.result, Ok(Outcome::Transitioned { .. })));
        // Resumed after the wait: r0 was incremented once, not reset to 1 first.
        assert_eq!(m.registers().values()[0], Some(2.0));
        assert_eq!(m.registers().values()[1], Some(0.75));
        assert_eq!(m.current_state_name(), "done");
    }

    #[test]
    fn test_log_carries_reception_fields() {
        let mut m = instance(WAITER);
        m.activate(&Stimulus::Init, &ctx());
        m.activate(&signal(0.25), &ctx());
        let act = m.activate(&signal(0.5), &ctx());
        assert_eq!(act.result, Ok(Outcome::Halted));
        match &act.effects[..] {
            [Effect::Log(emission)] => {
                assert_eq!(emission.label.as_deref(), Some("done"));
                assert_eq!(emission.voltage, Some(0.5));
                assert_eq!(emission.distance_from_sender, Some(2.0));
                assert_eq!(emission.values, vec![2.0, 0.25]);
            }
            other => panic!("unexpected effects {:?}", other),
        }
    }

    #[test]
    fn test_invalid_transition_faults_machine() {
        let mut m = instance(
            r#"
name: bad
kind: processing
entry: a
states:
  - name: a
    transitions: [b]
    program:
      - { op: transition, target: c }
  - name: b
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert_eq!(
            act.result,
            Err(MachineFault::InvalidTransition {
                pc: 0,
                from: "a".to_string(),
                to: "c".to_string()
            })
        );
        assert!(m.is_faulted());
        assert_eq!(m.current_state_name(), "a");

        let later = m.activate(&Stimulus::Init, &ctx());
        assert_eq!(later.result, Ok(Outcome::Ignored(IgnoreReason::Faulted)));
    }

    #[test]
    fn test_transition_to_undeclared_but_existing_state_faults() {
        let mut m = instance(
            r#"
name: strict
kind: processing
entry: a
states:
  - name: a
    transitions: [b]
    program:
      - { op: transition, target: c }
  - name: b
  - name: c
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert!(matches!(act.result, Err(MachineFault::InvalidTransition { .. })));
    }

    #[test]
    fn test_uninitialized_register_and_input() {
        let mut m = instance(
            r#"
name: reader
kind: processing
entry: a
states:
  - name: a
    program:
      - { op: add, dst: r1, a: r0, b: 1 }
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert_eq!(
            act.result,
            Err(MachineFault::UninitializedRegister {
                pc: 0,
                register: "r0".to_string()
            })
        );

        let mut m = instance(
            r#"
name: reader
kind: processing
entry: a
states:
  - name: a
    program:
      - { op: set, dst: r1, src: in.voltage }
"#,
        );
        let act = m.activate(&Stimulus::Timer { timer_id: 0 }, &ctx());
        assert!(matches!(
            act.result,
            Err(MachineFault::UninitializedRegister { ref register, .. }) if register == "in.voltage"
        ));
    }

    #[test]
    fn test_division_by_zero() {
        let mut m = instance(
            r#"
name: divider
kind: processing
entry: a
states:
  - name: a
    program:
      - { op: set, dst: r0, src: 0 }
      - { op: div, dst: r1, a: 1, b: r0 }
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert!(matches!(act.result, Err(MachineFault::Arithmetic { pc: 1, .. })));
        assert_eq!(act.result.unwrap_err().code(), "arithmetic_error");
    }

    #[test]
    fn test_branch_out_of_range_is_program_error() {
        let mut m = instance(
            r#"
name: jumper
kind: processing
entry: a
states:
  - name: a
    program:
      - { op: branch, cmp: lt, a: 0, b: 1, target: 9 }
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert!(matches!(act.result, Err(MachineFault::Program { pc: 0, .. })));
    }

    #[test]
    fn test_runaway_loop_hits_step_limit() {
        let mut m = instance(
            r#"
name: spinner
kind: processing
entry: a
states:
  - name: a
    program:
      - { op: jump, target: 0 }
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert_eq!(act.steps, 1_000);
        assert!(matches!(act.result, Err(MachineFault::Program { .. })));
    }

    #[test]
    fn test_effects_in_order_and_loop_counts() {
        let mut m = instance(
            r#"
name: pulses
kind: output
entry: a
states:
  - name: a
    program:
      - { op: set, dst: r0, src: 3 }
      - { op: set_antenna, index: 1 }
      - { op: send, phase: 3.14 }
      - { op: sub, dst: r0, a: r0, b: 1 }
      - { op: branch, cmp: gt, a: r0, b: 0, target: 2 }
      - { op: set_timer, delay: 0.001, id: 4 }
      - { op: forward, to: input, value: r0 }
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert_eq!(act.result, Ok(Outcome::Halted));
        let sends = act.effects.iter().filter(|e| matches!(e, Effect::Send { .. })).count();
        assert_eq!(sends, 3);
        assert_eq!(act.effects[0], Effect::SetAntenna { index: 1 });
        assert_eq!(
            act.effects.last(),
            Some(&Effect::Forward {
                to: MachineKind::Input,
                value: 0.0
            })
        );
        assert!(act.effects.contains(&Effect::ArmTimer {
            delay_s: 0.001,
            timer_id: 4
        }));
    }

    #[test]
    fn test_bad_antenna_index() {
        let mut m = instance(
            r#"
name: antenna
kind: output
entry: a
states:
  - name: a
    program:
      - { op: set_antenna, index: 2 }
"#,
        );
        let act = m.activate(&Stimulus::Init, &ctx());
        assert!(matches!(act.result, Err(MachineFault::Program { .. })));
    }

    #[test]
    fn test_message_inputs() {
        let mut m = instance(
            r#"
name: relay
kind: output
entry: a
states:
  - name: a
    program:
      - { op: log, values: [in.value, in.from, now] }
"#,
        );
        let act = m.activate(
            &Stimulus::Message {
                from: Some(MachineKind::Processing),
                value: 4.5,
            },
            &ctx(),
        );
        match &act.effects[..] {
            [Effect::Log(emission)] => {
                assert_eq!(emission.values, vec![4.5, 1.0, 5e-6]);
                assert_eq!(emission.voltage, None);
            }
            other => panic!("unexpected effects {:?}", other),
        }
    }
}
