//! Faults that stop a single machine instance.

use thiserror::Error;

/// A runtime fault in one machine's program.
///
/// A faulted machine ignores every later event; the rest of the simulation
/// carries on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineFault {
    /// Bad instruction offset, bad operand value, or runaway program.
    #[error("program error at instruction {pc}: {reason}")]
    Program {
        /// Offending instruction.
        pc: usize,
        /// What went wrong.
        reason: String,
    },

    /// A transition named a state that is not reachable from the current one.
    #[error("invalid transition from '{from}' to '{to}' at instruction {pc}")]
    InvalidTransition {
        /// Offending instruction.
        pc: usize,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Division by zero or a non-finite result.
    #[error("arithmetic error at instruction {pc}: {reason}")]
    Arithmetic {
        /// Offending instruction.
        pc: usize,
        /// What went wrong.
        reason: String,
    },

    /// A register was read before anything wrote it.
    #[error("read of uninitialized register {register} at instruction {pc}")]
    UninitializedRegister {
        /// Offending instruction.
        pc: usize,
        /// Register name.
        register: String,
    },
}

impl MachineFault {
    /// Stable code written to fault records.
    pub const fn code(&self) -> &'static str {
        match self {
            MachineFault::Program { .. } => "program_error",
            MachineFault::InvalidTransition { .. } => "invalid_transition",
            MachineFault::Arithmetic { .. } => "arithmetic_error",
            MachineFault::UninitializedRegister { .. } => "uninitialized_register",
        }
    }

    /// Instruction at which the fault occurred.
    pub const fn pc(&self) -> usize {
        match self {
            MachineFault::Program { pc, .. }
            | MachineFault::InvalidTransition { pc, .. }
            | MachineFault::Arithmetic { pc, .. }
            | MachineFault::UninitializedRegister { pc, .. } => *pc,
        }
    }
}
