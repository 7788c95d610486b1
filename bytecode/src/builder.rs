use crate::instruction::BinaryOp;
use crate::op::Op;

/// An address operand that has not been resolved yet.
///
/// Created by the jump and closure emitters. Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use]
pub struct Label {
    /// Position of the u32 address bytes in the buffer.
    addr_pos: usize,
}

/// Builds a code section byte sequence.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn emit_label(&mut self, op: Op) -> Label {
        self.emit_op(op);
        let addr_pos = self.buf.len();
        self.emit_u32(0);
        Label { addr_pos }
    }

    /// Patch `label` to point at the current offset.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len() as u32;
        self.buf[label.addr_pos..label.addr_pos + 4].copy_from_slice(&target.to_le_bytes());
    }

    pub fn done(&mut self) {
        self.emit_op(Op::Done);
    }

    pub fn nop(&mut self) {
        self.emit_op(Op::Nop);
    }

    pub fn push_nil(&mut self) {
        self.emit_op(Op::PushNil);
    }

    pub fn push_int(&mut self, value: i32) {
        self.emit_op(Op::PushInt);
        self.emit_u32(value as u32);
    }

    pub fn push_float(&mut self, value: f64) {
        self.emit_op(Op::PushFloat);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_string(&mut self, string: u16) {
        self.emit_op(Op::PushString);
        self.emit_u16(string);
    }

    /// `PushClosure` over a function whose address is bound later.
    pub fn push_closure(&mut self) -> Label {
        self.emit_label(Op::PushClosure)
    }

    /// `PushClosure` over an already known address.
    pub fn push_closure_at(&mut self, addr: usize) {
        self.emit_op(Op::PushClosure);
        self.emit_u32(addr as u32);
    }

    pub fn push_table(&mut self) {
        self.emit_op(Op::PushTable);
    }

    pub fn dup(&mut self) {
        self.emit_op(Op::Dup);
    }

    pub fn pop(&mut self) {
        self.emit_op(Op::Pop);
    }

    pub fn table_put(&mut self) {
        self.emit_op(Op::TablePut);
    }

    pub fn table_get(&mut self) {
        self.emit_op(Op::TableGet);
    }

    pub fn global_load(&mut self, name: u16) {
        self.emit_op(Op::GlobalLoad);
        self.emit_u16(name);
    }

    pub fn global_store(&mut self, name: u16) {
        self.emit_op(Op::GlobalStore);
        self.emit_u16(name);
    }

    pub fn local_load(&mut self, idx: u16) {
        self.emit_op(Op::LocalLoad);
        self.emit_u16(idx);
    }

    pub fn local_store(&mut self, idx: u16) {
        self.emit_op(Op::LocalStore);
        self.emit_u16(idx);
    }

    pub fn call(&mut self, argc: u8) {
        self.emit_op(Op::Call);
        self.emit_u8(argc);
    }

    pub fn ret0(&mut self) {
        self.emit_op(Op::Ret0);
    }

    pub fn ret1(&mut self) {
        self.emit_op(Op::Ret1);
    }

    pub fn jump(&mut self) -> Label {
        self.emit_label(Op::Jump)
    }

    pub fn jump_if_zero(&mut self) -> Label {
        self.emit_label(Op::JumpIfZero)
    }

    pub fn jump_if_not_zero(&mut self) -> Label {
        self.emit_label(Op::JumpIfNotZero)
    }

    /// Unconditional jump to an already emitted offset.
    pub fn jump_back(&mut self, target: usize) {
        self.emit_op(Op::Jump);
        self.emit_u32(target as u32);
    }

    pub fn binary(&mut self, op: BinaryOp) {
        self.emit_op(op.op());
    }

    pub fn neg(&mut self) {
        self.emit_op(Op::Neg);
    }

    pub fn not(&mut self) {
        self.emit_op(Op::Not);
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
