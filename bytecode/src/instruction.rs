use std::fmt;

use crate::op::Op;

/// A decoded instruction with its operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Done,
    Nop,
    PushNil,
    PushInt { value: i32 },
    PushFloat { value: f64 },
    PushString { string: u16 },
    PushClosure { addr: u32 },
    PushTable,
    Dup,
    Pop,
    TablePut,
    TableGet,
    GlobalLoad { name: u16 },
    GlobalStore { name: u16 },
    LocalLoad { idx: u16 },
    LocalStore { idx: u16 },
    Call { argc: u8 },
    Ret0,
    Ret1,
    Jump { addr: u32 },
    JumpIfZero { addr: u32 },
    JumpIfNotZero { addr: u32 },
    Binary(BinaryOp),
    Neg,
    Not,
}

/// Two-operand instructions: `( lhs rhs -- result )`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinaryOp {
    pub const fn op(self) -> Op {
        match self {
            BinaryOp::Add => Op::Add,
            BinaryOp::Sub => Op::Sub,
            BinaryOp::Mul => Op::Mul,
            BinaryOp::Div => Op::Div,
            BinaryOp::Mod => Op::Mod,
            BinaryOp::And => Op::And,
            BinaryOp::Or => Op::Or,
            BinaryOp::Eq => Op::Eq,
            BinaryOp::Neq => Op::Neq,
            BinaryOp::Lt => Op::Lt,
            BinaryOp::Lte => Op::Lte,
            BinaryOp::Gt => Op::Gt,
            BinaryOp::Gte => Op::Gte,
        }
    }

    pub const fn from_op(op: Op) -> Option<Self> {
        Some(match op {
            Op::Add => BinaryOp::Add,
            Op::Sub => BinaryOp::Sub,
            Op::Mul => BinaryOp::Mul,
            Op::Div => BinaryOp::Div,
            Op::Mod => BinaryOp::Mod,
            Op::And => BinaryOp::And,
            Op::Or => BinaryOp::Or,
            Op::Eq => BinaryOp::Eq,
            Op::Neq => BinaryOp::Neq,
            Op::Lt => BinaryOp::Lt,
            Op::Lte => BinaryOp::Lte,
            Op::Gt => BinaryOp::Gt,
            Op::Gte => BinaryOp::Gte,
            _ => return None,
        })
    }
}

impl Instruction {
    pub const fn op(&self) -> Op {
        match self {
            Self::Done => Op::Done,
            Self::Nop => Op::Nop,
            Self::PushNil => Op::PushNil,
            Self::PushInt { .. } => Op::PushInt,
            Self::PushFloat { .. } => Op::PushFloat,
            Self::PushString { .. } => Op::PushString,
            Self::PushClosure { .. } => Op::PushClosure,
            Self::PushTable => Op::PushTable,
            Self::Dup => Op::Dup,
            Self::Pop => Op::Pop,
            Self::TablePut => Op::TablePut,
            Self::TableGet => Op::TableGet,
            Self::GlobalLoad { .. } => Op::GlobalLoad,
            Self::GlobalStore { .. } => Op::GlobalStore,
            Self::LocalLoad { .. } => Op::LocalLoad,
            Self::LocalStore { .. } => Op::LocalStore,
            Self::Call { .. } => Op::Call,
            Self::Ret0 => Op::Ret0,
            Self::Ret1 => Op::Ret1,
            Self::Jump { .. } => Op::Jump,
            Self::JumpIfZero { .. } => Op::JumpIfZero,
            Self::JumpIfNotZero { .. } => Op::JumpIfNotZero,
            Self::Binary(op) => op.op(),
            Self::Neg => Op::Neg,
            Self::Not => Op::Not,
        }
    }

    /// Encoded size, opcode byte included.
    pub const fn size(&self) -> usize {
        1 + self.op().operand_size()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PushInt { value } => write!(f, "PushInt {value}"),
            Self::PushFloat { value } => write!(f, "PushFloat {value}"),
            Self::PushString { string } => write!(f, "PushString #{string}"),
            Self::PushClosure { addr } => write!(f, "PushClosure @{addr}"),
            Self::GlobalLoad { name } => write!(f, "GlobalLoad #{name}"),
            Self::GlobalStore { name } => write!(f, "GlobalStore #{name}"),
            Self::LocalLoad { idx } => write!(f, "LocalLoad l{idx}"),
            Self::LocalStore { idx } => write!(f, "LocalStore l{idx}"),
            Self::Call { argc } => write!(f, "Call {argc}"),
            Self::Jump { addr } => write!(f, "Jump @{addr}"),
            Self::JumpIfZero { addr } => write!(f, "JumpIfZero @{addr}"),
            Self::JumpIfNotZero { addr } => write!(f, "JumpIfNotZero @{addr}"),
            other => write!(f, "{:?}", other.op()),
        }
    }
}
