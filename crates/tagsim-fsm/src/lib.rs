//! Programmable tag behaviour.
//!
//! Every tag runs three finite-state machines (input, processing and output).
//! Each state of a machine holds a short program in a small assembly-like
//! instruction set. A machine is defined once in [`MachineDef`] and shared by
//! every tag that uses it; a [`MachineInstance`] carries one tag's current
//! state, registers and wait point.

pub mod fault;
pub mod instruction;
pub mod interpreter;
pub mod machine;
pub mod tag;

pub use fault::MachineFault;
pub use instruction::{
    BinaryOp, Comparison, InputField, Instruction, Opcode, Operand, Register, UnaryOp,
    WaitCondition,
};
pub use interpreter::{
    Activation, ActivationContext, Effect, IgnoreReason, InputRegisters, MachineInstance,
    MachineStatus, Outcome, RegisterBank, SignalInput, Stimulus,
};
pub use machine::{MachineDef, MachineSpec, StateDef, StateId, StateSpec};
pub use tag::{MachineSnapshot, TagInstance, TagParams, TagSnapshot};
