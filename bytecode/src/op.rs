/// Bytecode opcodes.
///
/// The machine is stack based. Operands follow the opcode byte in
/// little-endian order. String operands index the program string table,
/// address operands are absolute byte offsets into the code section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// End of the top-level script body.
    Done = 0x00,

    Nop,

    /// Push `nil`.
    PushNil,

    /// Push an integer literal.
    /// Operands: `value:i32`
    PushInt,

    /// Push a float literal.
    /// Operands: `value:f64`
    PushFloat,

    /// Push a string from the string table.
    /// Operands: `string:u16`
    PushString,

    /// Push a closure over the function starting at `addr`.
    /// Operands: `addr:u32`
    PushClosure,

    /// Push a fresh empty table.
    PushTable,

    Dup,
    Pop,

    /// `( table key value -- )` store into a table. A `nil` value removes
    /// the key.
    TablePut,

    /// `( table key -- value )` read from a table, `nil` when absent.
    TableGet,

    /// Push the global named by a string-table entry.
    /// Operands: `name:u16`
    GlobalLoad,

    /// Pop into the global named by a string-table entry.
    /// Operands: `name:u16`
    GlobalStore,

    /// Push a local symbol of the current frame. Local 0 is the callee.
    /// Operands: `idx:u16`
    LocalLoad,

    /// Pop into a local symbol, growing the frame when needed.
    /// Operands: `idx:u16`
    LocalStore,

    /// `( closure arg1 .. argN -- result )`
    /// Operands: `argc:u8`
    Call,

    /// Return `nil` from the current function.
    Ret0,

    /// Return the top of the stack from the current function.
    Ret1,

    /// Operands: `addr:u32`
    Jump,

    /// Pop, jump when falsy.
    /// Operands: `addr:u32`
    JumpIfZero,

    /// Pop, jump when truthy.
    /// Operands: `addr:u32`
    JumpIfNotZero,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    And,
    Or,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Op {
    pub const COUNT: usize = Op::Gte as usize + 1;

    /// Size in bytes of the operands that follow this opcode.
    pub const fn operand_size(self) -> usize {
        match self {
            Op::PushInt | Op::PushClosure | Op::Jump | Op::JumpIfZero | Op::JumpIfNotZero => 4,
            Op::PushFloat => 8,
            Op::PushString | Op::GlobalLoad | Op::GlobalStore | Op::LocalLoad | Op::LocalStore => 2,
            Op::Call => 1,
            _ => 0,
        }
    }

    /// Whether the operand is a code address that must stay inside the code
    /// section.
    pub const fn has_address(self) -> bool {
        matches!(
            self,
            Op::PushClosure | Op::Jump | Op::JumpIfZero | Op::JumpIfNotZero
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
