//! The instruction set executed by state programs.
//!
//! Instructions deserialize from maps tagged by `op`:
//!
//! ```yaml
//! - { op: set, dst: r0, src: in.voltage }
//! - { op: branch, cmp: gt, a: r0, b: 0.5, target: 4 }
//! - { op: transition, target: decode }
//! ```
//!
//! Operands are register names (`r0`..), input register names (`in.voltage`,
//! `now`, ...) or numeric literals.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tagsim_common::MachineKind;

// ============================================================================
// Operands
// ============================================================================

/// A general-purpose register, `r0` upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct Register(pub u8);

impl Register {
    /// Index into the register bank.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl FromStr for Register {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('r')
            .and_then(|n| n.parse::<u8>().ok())
            .map(Register)
            .ok_or_else(|| format!("invalid register '{}'", s))
    }
}

impl TryFrom<String> for Register {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Read-only registers bound from the event that started an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputField {
    /// Detected voltage of a signal reception.
    Voltage,
    /// Phase of a signal reception, radians.
    Phase,
    /// Sender carrier frequency, Hz.
    Frequency,
    /// Distance to the sender, metres.
    Distance,
    /// Distance to the sender at its previous transmission.
    PreviousDistance,
    /// Sender tag id.
    Sender,
    /// Number of arrivals merged into the reception.
    Arrivals,
    /// Value carried by a forwarded message.
    Value,
    /// Machine that forwarded the message (0 input, 1 processing, 2 output).
    From,
    /// Identifier of an expired timer.
    Timer,
    /// Current simulation time, seconds.
    Now,
}

impl InputField {
    /// Every input register.
    pub const ALL: [InputField; 11] = [
        InputField::Voltage,
        InputField::Phase,
        InputField::Frequency,
        InputField::Distance,
        InputField::PreviousDistance,
        InputField::Sender,
        InputField::Arrivals,
        InputField::Value,
        InputField::From,
        InputField::Timer,
        InputField::Now,
    ];

    /// Name used in programs.
    pub const fn name(&self) -> &'static str {
        match self {
            InputField::Voltage => "in.voltage",
            InputField::Phase => "in.phase",
            InputField::Frequency => "in.frequency",
            InputField::Distance => "in.distance",
            InputField::PreviousDistance => "in.previous_distance",
            InputField::Sender => "in.sender",
            InputField::Arrivals => "in.arrivals",
            InputField::Value => "in.value",
            InputField::From => "in.from",
            InputField::Timer => "in.timer",
            InputField::Now => "now",
        }
    }
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "OperandRepr")]
pub enum Operand {
    /// General register.
    Reg(Register),
    /// Input register.
    Input(InputField),
    /// Literal value.
    Imm(f64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Input(field) => write!(f, "{}", field),
            Operand::Imm(v) => write!(f, "{}", v),
        }
    }
}

impl FromStr for Operand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(field) = InputField::ALL.iter().find(|f| f.name() == s) {
            return Ok(Operand::Input(*field));
        }
        if let Ok(value) = s.parse::<f64>() {
            return Ok(Operand::Imm(value));
        }
        s.parse::<Register>()
            .map(Operand::Reg)
            .map_err(|_| format!("invalid operand '{}'", s))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OperandRepr {
    Number(f64),
    Name(String),
}

impl TryFrom<OperandRepr> for Operand {
    type Error = String;

    fn try_from(repr: OperandRepr) -> Result<Self, Self::Error> {
        match repr {
            OperandRepr::Number(v) => Ok(Operand::Imm(v)),
            OperandRepr::Name(s) => s.parse(),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Relational operators for `branch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// a < b
    Lt,
    /// a <= b
    Le,
    /// a == b
    Eq,
    /// a != b
    Ne,
    /// a >= b
    Ge,
    /// a > b
    Gt,
}

impl Comparison {
    /// Evaluate the comparison.
    pub fn holds(&self, a: f64, b: f64) -> bool {
        match self {
            Comparison::Lt => a < b,
            Comparison::Le => a <= b,
            Comparison::Eq => a == b,
            Comparison::Ne => a != b,
            Comparison::Ge => a >= b,
            Comparison::Gt => a > b,
        }
    }
}

/// Two-operand arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
}

impl BinaryOp {
    /// Apply the operator; errors describe arithmetic faults.
    pub fn apply(&self, a: f64, b: f64) -> Result<f64, String> {
        let result = match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                return Err("division by zero".to_string());
            }
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        };
        finite(result)
    }
}

/// One-operand arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Floor,
    Abs,
    Neg,
    Sqrt,
}

impl UnaryOp {
    /// Apply the operator; errors describe arithmetic faults.
    pub fn apply(&self, v: f64) -> Result<f64, String> {
        match self {
            UnaryOp::Floor => finite(v.floor()),
            UnaryOp::Abs => finite(v.abs()),
            UnaryOp::Neg => finite(-v),
            UnaryOp::Sqrt if v < 0.0 => Err(format!("square root of negative value {}", v)),
            UnaryOp::Sqrt => finite(v.sqrt()),
        }
    }
}

fn finite(v: f64) -> Result<f64, String> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("non-finite result {}", v))
    }
}

/// Which events end a `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// Any event.
    #[default]
    Any,
    /// A signal reception.
    Signal,
    /// A timer expiry.
    Timer,
    /// A forwarded or injected message.
    Message,
}

// ============================================================================
// Instructions
// ============================================================================

/// One program instruction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    /// `dst = src`
    Set { dst: Register, src: Operand },
    /// `dst = a + b`
    Add { dst: Register, a: Operand, b: Operand },
    /// `dst = a - b`
    Sub { dst: Register, a: Operand, b: Operand },
    /// `dst = a * b`
    Mul { dst: Register, a: Operand, b: Operand },
    /// `dst = a / b`
    Div { dst: Register, a: Operand, b: Operand },
    /// `dst = a % b`
    Rem { dst: Register, a: Operand, b: Operand },
    /// `dst = min(a, b)`
    Min { dst: Register, a: Operand, b: Operand },
    /// `dst = max(a, b)`
    Max { dst: Register, a: Operand, b: Operand },
    /// `dst = floor(src)`
    Floor { dst: Register, src: Operand },
    /// `dst = |src|`
    Abs { dst: Register, src: Operand },
    /// `dst = -src`
    Neg { dst: Register, src: Operand },
    /// `dst = sqrt(src)`
    Sqrt { dst: Register, src: Operand },
    /// Jump to `target` if `a cmp b`.
    Branch {
        cmp: Comparison,
        a: Operand,
        b: Operand,
        target: usize,
    },
    /// Jump to `target`.
    Jump { target: usize },
    /// Move to another state and end the activation.
    Transition { target: String },
    /// Transmit. Amplitude defaults to the tag's own, phase to 0.
    Send {
        #[serde(default)]
        amplitude: Option<Operand>,
        #[serde(default)]
        phase: Option<Operand>,
    },
    /// Suspend until a matching event arrives.
    Wait {
        #[serde(default)]
        on: WaitCondition,
    },
    /// Arm a self-targeted timer `delay` seconds from now.
    SetTimer {
        delay: Operand,
        #[serde(default)]
        id: u32,
    },
    /// Select an entry of the tag's reflection table.
    SetAntenna { index: Operand },
    /// Deliver a value to a machine of the same tag.
    Forward { to: MachineKind, value: Operand },
    /// Emit a log record.
    Log {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        values: Vec<Operand>,
    },
    /// End the activation without changing state.
    Halt,
}

impl Instruction {
    /// The opcode of this instruction.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Set { .. } => Opcode::Set,
            Instruction::Add { .. } => Opcode::Add,
            Instruction::Sub { .. } => Opcode::Sub,
            Instruction::Mul { .. } => Opcode::Mul,
            Instruction::Div { .. } => Opcode::Div,
            Instruction::Rem { .. } => Opcode::Rem,
            Instruction::Min { .. } => Opcode::Min,
            Instruction::Max { .. } => Opcode::Max,
            Instruction::Floor { .. } => Opcode::Floor,
            Instruction::Abs { .. } => Opcode::Abs,
            Instruction::Neg { .. } => Opcode::Neg,
            Instruction::Sqrt { .. } => Opcode::Sqrt,
            Instruction::Branch { .. } => Opcode::Branch,
            Instruction::Jump { .. } => Opcode::Jump,
            Instruction::Transition { .. } => Opcode::Transition,
            Instruction::Send { .. } => Opcode::Send,
            Instruction::Wait { .. } => Opcode::Wait,
            Instruction::SetTimer { .. } => Opcode::SetTimer,
            Instruction::SetAntenna { .. } => Opcode::SetAntenna,
            Instruction::Forward { .. } => Opcode::Forward,
            Instruction::Log { .. } => Opcode::Log,
            Instruction::Halt => Opcode::Halt,
        }
    }

    /// Decompose a two-operand arithmetic instruction.
    pub fn as_binary(&self) -> Option<(BinaryOp, Register, Operand, Operand)> {
        let (op, dst, a, b) = match self {
            Instruction::Add { dst, a, b } => (BinaryOp::Add, dst, a, b),
            Instruction::Sub { dst, a, b } => (BinaryOp::Sub, dst, a, b),
            Instruction::Mul { dst, a, b } => (BinaryOp::Mul, dst, a, b),
            Instruction::Div { dst, a, b } => (BinaryOp::Div, dst, a, b),
            Instruction::Rem { dst, a, b } => (BinaryOp::Rem, dst, a, b),
            Instruction::Min { dst, a, b } => (BinaryOp::Min, dst, a, b),
            Instruction::Max { dst, a, b } => (BinaryOp::Max, dst, a, b),
            _ => return None,
        };
        Some((op, *dst, *a, *b))
    }

    /// Decompose a one-operand arithmetic instruction.
    pub fn as_unary(&self) -> Option<(UnaryOp, Register, Operand)> {
        let (op, dst, src) = match self {
            Instruction::Floor { dst, src } => (UnaryOp::Floor, dst, src),
            Instruction::Abs { dst, src } => (UnaryOp::Abs, dst, src),
            Instruction::Neg { dst, src } => (UnaryOp::Neg, dst, src),
            Instruction::Sqrt { dst, src } => (UnaryOp::Sqrt, dst, src),
            _ => return None,
        };
        Some((op, *dst, *src))
    }

    /// Every general register the instruction reads or writes.
    pub fn registers(&self) -> Vec<Register> {
        fn reg(op: &Operand) -> Option<Register> {
            match op {
                Operand::Reg(r) => Some(*r),
                _ => None,
            }
        }

        if let Some((_, dst, a, b)) = self.as_binary() {
            return [Some(dst), reg(&a), reg(&b)].into_iter().flatten().collect();
        }
        if let Some((_, dst, src)) = self.as_unary() {
            return [Some(dst), reg(&src)].into_iter().flatten().collect();
        }
        match self {
            Instruction::Set { dst, src } => [Some(*dst), reg(src)].into_iter().flatten().collect(),
            Instruction::Branch { a, b, .. } => [reg(a), reg(b)].into_iter().flatten().collect(),
            Instruction::Send { amplitude, phase } => amplitude
                .iter()
                .chain(phase.iter())
                .filter_map(reg)
                .collect(),
            Instruction::SetTimer { delay, .. } => reg(delay).into_iter().collect(),
            Instruction::SetAntenna { index } => reg(index).into_iter().collect(),
            Instruction::Forward { value, .. } => reg(value).into_iter().collect(),
            Instruction::Log { values, .. } => values.iter().filter_map(reg).collect(),
            _ => Vec::new(),
        }
    }
}

/// Instruction opcodes, for listings and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    Floor,
    Abs,
    Neg,
    Sqrt,
    Branch,
    Jump,
    Transition,
    Send,
    Wait,
    SetTimer,
    SetAntenna,
    Forward,
    Log,
    Halt,
}

impl Opcode {
    /// Every opcode.
    pub const ALL: [Opcode; 22] = [
        Opcode::Set,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Rem,
        Opcode::Min,
        Opcode::Max,
        Opcode::Floor,
        Opcode::Abs,
        Opcode::Neg,
        Opcode::Sqrt,
        Opcode::Branch,
        Opcode::Jump,
        Opcode::Transition,
        Opcode::Send,
        Opcode::Wait,
        Opcode::SetTimer,
        Opcode::SetAntenna,
        Opcode::Forward,
        Opcode::Log,
        Opcode::Halt,
    ];

    /// Name as written in programs.
    pub const fn name(&self) -> &'static str {
        match self {
            Opcode::Set => "set",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Rem => "rem",
            Opcode::Min => "min",
            Opcode::Max => "max",
            Opcode::Floor => "floor",
            Opcode::Abs => "abs",
            Opcode::Neg => "neg",
            Opcode::Sqrt => "sqrt",
            Opcode::Branch => "branch",
            Opcode::Jump => "jump",
            Opcode::Transition => "transition",
            Opcode::Send => "send",
            Opcode::Wait => "wait",
            Opcode::SetTimer => "set_timer",
            Opcode::SetAntenna => "set_antenna",
            Opcode::Forward => "forward",
            Opcode::Log => "log",
            Opcode::Halt => "halt",
        }
    }

    /// Operand synopsis.
    pub const fn synopsis(&self) -> &'static str {
        match self {
            Opcode::Set => "dst, src",
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Rem | Opcode::Min | Opcode::Max => {
                "dst, a, b"
            }
            Opcode::Floor | Opcode::Abs | Opcode::Neg | Opcode::Sqrt => "dst, src",
            Opcode::Branch => "cmp (lt|le|eq|ne|ge|gt), a, b, target",
            Opcode::Jump => "target",
            Opcode::Transition => "target (state name)",
            Opcode::Send => "[amplitude], [phase]",
            Opcode::Wait => "[on: any|signal|timer|message]",
            Opcode::SetTimer => "delay (seconds), [id]",
            Opcode::SetAntenna => "index",
            Opcode::Forward => "to (input|processing|output), value",
            Opcode::Log => "[label], [values]",
            Opcode::Halt => "",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_parsing() {
        assert_eq!("r3".parse::<Operand>(), Ok(Operand::Reg(Register(3))));
        assert_eq!("in.voltage".parse::<Operand>(), Ok(Operand::Input(InputField::Voltage)));
        assert_eq!("now".parse::<Operand>(), Ok(Operand::Input(InputField::Now)));
        assert_eq!("-2.5".parse::<Operand>(), Ok(Operand::Imm(-2.5)));
        assert!("x9".parse::<Operand>().is_err());
        assert!("r300".parse::<Operand>().is_err());
    }

    #[test]
    fn test_instruction_yaml() {
        let program: Vec<Instruction> = serde_yaml::from_str(
            r#"
- { op: set, dst: r0, src: in.voltage }
- { op: div, dst: r1, a: r0, b: 2 }
- { op: branch, cmp: ge, a: r1, b: 0.25, target: 4 }
- { op: wait, on: timer }
- { op: send }
- { op: forward, to: output, value: r1 }
- { op: log, label: rx, values: [r0, in.phase] }
- { op: transition, target: idle }
- { op: halt }
"#,
        )
        .unwrap();

        assert_eq!(program.len(), 9);
        assert_eq!(
            program[1],
            Instruction::Div {
                dst: Register(1),
                a: Operand::Reg(Register(0)),
                b: Operand::Imm(2.0)
            }
        );
        assert_eq!(program[3], Instruction::Wait { on: WaitCondition::Timer });
        assert_eq!(
            program[4],
            Instruction::Send {
                amplitude: None,
                phase: None
            }
        );
        assert_eq!(program[8].opcode(), Opcode::Halt);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let result: Result<Vec<Instruction>, _> = serde_yaml::from_str("- { op: teleport }");
        assert!(result.is_err());
    }

    #[test]
    fn test_binary_ops() {
        assert_eq!(BinaryOp::Sub.apply(5.0, 2.0), Ok(3.0));
        assert_eq!(BinaryOp::Rem.apply(7.0, 4.0), Ok(3.0));
        assert!(BinaryOp::Div.apply(1.0, 0.0).is_err());
        assert!(BinaryOp::Rem.apply(1.0, 0.0).is_err());
        assert!(BinaryOp::Mul.apply(f64::MAX, 2.0).is_err());
        assert_eq!(UnaryOp::Floor.apply(2.7), Ok(2.0));
        assert!(UnaryOp::Sqrt.apply(-1.0).is_err());
    }

    #[test]
    fn test_registers_listed() {
        let inst = Instruction::Add {
            dst: Register(2),
            a: Operand::Reg(Register(0)),
            b: Operand::Imm(1.0),
        };
        assert_eq!(inst.registers(), vec![Register(2), Register(0)]);
        let log = Instruction::Log {
            label: None,
            values: vec![Operand::Reg(Register(5)), Operand::Input(InputField::Phase)],
        };
        assert_eq!(log.registers(), vec![Register(5)]);
    }

    #[test]
    fn test_comparisons() {
        assert!(Comparison::Lt.holds(1.0, 2.0));
        assert!(!Comparison::Gt.holds(1.0, 2.0));
        assert!(Comparison::Eq.holds(0.5, 0.5));
        assert!(Comparison::Ne.holds(0.5, 0.25));
        assert!(Comparison::Le.holds(2.0, 2.0));
        assert!(Comparison::Ge.holds(3.0, 2.0));
    }
}
