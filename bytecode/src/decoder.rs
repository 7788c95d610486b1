use std::fmt;

use crate::instruction::{BinaryOp, Instruction};
use crate::op::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    InvalidOpcode { offset: usize, byte: u8 },
    Truncated { offset: usize, op: Op },
    OutOfBounds { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode { offset, byte } => {
                write!(f, "invalid opcode 0x{byte:02x} at offset {offset}")
            }
            Self::Truncated { offset, op } => {
                write!(f, "truncated {op:?} instruction at offset {offset}")
            }
            Self::OutOfBounds { offset } => {
                write!(f, "offset {offset} is outside the code section")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode the instruction starting at `offset`.
///
/// Returns the instruction and the offset of the next one. Code comes from
/// files written by an external toolchain, so every read is checked.
pub fn decode_at(code: &[u8], offset: usize) -> Result<(Instruction, usize), DecodeError> {
    let Some(&byte) = code.get(offset) else {
        return Err(DecodeError::OutOfBounds { offset });
    };
    let op = Op::try_from(byte).map_err(|byte| DecodeError::InvalidOpcode { offset, byte })?;
    let start = offset + 1;
    let end = start + op.operand_size();
    let Some(operands) = code.get(start..end) else {
        return Err(DecodeError::Truncated { offset, op });
    };

    let instruction = match op {
        Op::Done => Instruction::Done,
        Op::Nop => Instruction::Nop,
        Op::PushNil => Instruction::PushNil,
        Op::PushInt => Instruction::PushInt {
            value: i32::from_le_bytes(array(operands)),
        },
        Op::PushFloat => Instruction::PushFloat {
            value: f64::from_le_bytes(array(operands)),
        },
        Op::PushString => Instruction::PushString {
            string: u16::from_le_bytes(array(operands)),
        },
        Op::PushClosure => Instruction::PushClosure {
            addr: u32::from_le_bytes(array(operands)),
        },
        Op::PushTable => Instruction::PushTable,
        Op::Dup => Instruction::Dup,
        Op::Pop => Instruction::Pop,
        Op::TablePut => Instruction::TablePut,
        Op::TableGet => Instruction::TableGet,
        Op::GlobalLoad => Instruction::GlobalLoad {
            name: u16::from_le_bytes(array(operands)),
        },
        Op::GlobalStore => Instruction::GlobalStore {
            name: u16::from_le_bytes(array(operands)),
        },
        Op::LocalLoad => Instruction::LocalLoad {
            idx: u16::from_le_bytes(array(operands)),
        },
        Op::LocalStore => Instruction::LocalStore {
            idx: u16::from_le_bytes(array(operands)),
        },
        Op::Call => Instruction::Call { argc: operands[0] },
        Op::Ret0 => Instruction::Ret0,
        Op::Ret1 => Instruction::Ret1,
        Op::Jump => Instruction::Jump {
            addr: u32::from_le_bytes(array(operands)),
        },
        Op::JumpIfZero => Instruction::JumpIfZero {
            addr: u32::from_le_bytes(array(operands)),
        },
        Op::JumpIfNotZero => Instruction::JumpIfNotZero {
            addr: u32::from_le_bytes(array(operands)),
        },
        Op::Neg => Instruction::Neg,
        Op::Not => Instruction::Not,
        binary => match BinaryOp::from_op(binary) {
            Some(op) => Instruction::Binary(op),
            None => return Err(DecodeError::InvalidOpcode { offset, byte }),
        },
    };

    Ok((instruction, end))
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Sequential decoder over a code section, yielding `(offset, instruction)`.
///
/// Iteration stops after the first error.
pub struct BytecodeDecoder<'a> {
    code: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pos: 0,
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.code.len()
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.is_at_end() {
            return None;
        }
        let offset = self.pos;
        match decode_at(self.code, offset) {
            Ok((instruction, next)) => {
                self.pos = next;
                Some(Ok((offset, instruction)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
